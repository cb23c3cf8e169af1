//! Rollback request, report and trigger types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How much of a plan a rollback request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackGranularity {
    /// Every unit of one phase, in reverse dependency order.
    Phase,
    /// All artifacts of one unit, newest first.
    Unit,
    /// Exactly one artifact. Unit state is left alone.
    Artifact,
}

impl std::fmt::Display for RollbackGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollbackGranularity::Phase => "phase",
            RollbackGranularity::Unit => "unit",
            RollbackGranularity::Artifact => "artifact",
        };
        write!(f, "{s}")
    }
}

/// An artifact whose compensation gave up after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackFailure {
    pub artifact_id: String,
    pub unit_id: String,
    pub error: String,
}

/// Outcome of one rollback request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub plan_id: Uuid,
    pub granularity: RollbackGranularity,
    pub target_id: String,
    /// Artifacts compensated by this run, in compensation order.
    pub succeeded: Vec<String>,
    pub failed: Vec<RollbackFailure>,
    /// Artifacts already compensated, or reported absent by their compensator.
    pub skipped: Vec<String>,
    /// Units moved to `rolled_back`, in processing order.
    pub units_rolled_back: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RollbackReport {
    pub fn new(plan_id: Uuid, granularity: RollbackGranularity, target_id: &str) -> Self {
        Self {
            plan_id,
            granularity,
            target_id: target_id.to_string(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            units_rolled_back: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// True when nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Condition that prompted a rollback decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackTrigger {
    ValidationFailure,
    ResourceExhaustion,
    SecurityViolation,
    Timeout,
    Manual,
}

/// Scope the trigger was raised at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackScope {
    Phase,
    PlanUnit,
    Artifact,
    EntireExecution,
}

/// Recommended response to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackAction {
    RollbackCurrentPhase,
    RescheduleWithBackoff,
    EmergencyStopAndRollback,
    SkipAndContinue,
}
