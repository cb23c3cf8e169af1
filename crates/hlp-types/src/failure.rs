//! Execution failure classification and retry bookkeeping.

use serde::{Deserialize, Serialize};

/// Why a unit attempt failed.
///
/// Workers return one of these; the retry predicate decides which classes
/// are worth retrying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutionFailure {
    /// Retryable per policy (I/O hiccups, throttling, flaky dependencies).
    #[error("transient execution error: {0}")]
    Transient(String),

    /// Bad input or a broken precondition. Retrying will not help.
    #[error("validation error: {0}")]
    Validation(String),

    /// The attempt exceeded its deadline.
    #[error("unit timed out after {0}s")]
    Timeout(u64),

    /// The unit's resource circuit is open; the attempt never reached it.
    #[error("circuit open for resource '{resource}' (retry in {retry_after_ms}ms)")]
    CircuitOpen { resource: String, retry_after_ms: u64 },
}

impl ExecutionFailure {
    /// Short class label for metrics and logs.
    pub fn class(&self) -> &'static str {
        match self {
            ExecutionFailure::Transient(_) => "transient",
            ExecutionFailure::Validation(_) => "validation",
            ExecutionFailure::Timeout(_) => "timeout",
            ExecutionFailure::CircuitOpen { .. } => "circuit_open",
        }
    }
}

/// Per-unit retry history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// Failed attempts that count against the retry budget.
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<ExecutionFailure>,
    /// Delay applied before the most recent retry, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delay_ms: Option<u64>,
    /// Derived from the idempotency key and risk tier; fixes the jitter draw.
    pub backoff_seed: u64,
    /// Attempts deferred by an open circuit (not counted in `attempt_count`).
    #[serde(default)]
    pub circuit_deferrals: u32,
}

impl RetryRecord {
    pub fn new(backoff_seed: u64) -> Self {
        Self {
            backoff_seed,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_and_class() {
        let f = ExecutionFailure::CircuitOpen {
            resource: "db".to_string(),
            retry_after_ms: 1500,
        };
        assert_eq!(f.class(), "circuit_open");
        assert!(f.to_string().contains("'db'"));
        assert_eq!(ExecutionFailure::Timeout(30).to_string(), "unit timed out after 30s");
    }

    #[test]
    fn failure_serializes_tagged() {
        let json = serde_json::to_value(ExecutionFailure::Transient("io".into())).unwrap();
        assert_eq!(json["kind"], "transient");
        assert_eq!(json["detail"], "io");
    }
}
