//! Plan domain types.
//!
//! A [`Plan`] is an ordered list of phases; each phase groups plan-units and
//! is the boundary for rollback. Plans are authored as YAML or JSON documents
//! and are validated before anything is scheduled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A complete execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// UUIDv7 assigned on submit when the document does not carry one.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Human-readable plan name.
    pub name: String,
    /// Free-form version string of the plan document.
    #[serde(default = "default_version")]
    pub version: String,
    /// Ordered phases.
    pub phases: Vec<PhaseDefinition>,
    /// Keep dispatching independent units after a unit fails permanently.
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Per-plan cap on concurrently running units (falls back to the executor default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Plan {
    /// Iterate over every unit of every phase, in document order.
    pub fn units(&self) -> impl Iterator<Item = &PlanUnitDefinition> {
        self.phases.iter().flat_map(|p| p.units.iter())
    }

    /// Total number of plan-units across all phases.
    pub fn unit_count(&self) -> usize {
        self.phases.iter().map(|p| p.units.len()).sum()
    }

    /// Find a unit definition by ID.
    pub fn unit(&self, unit_id: &str) -> Option<&PlanUnitDefinition> {
        self.units().find(|u| u.id == unit_id)
    }
}

/// A named group of plan-units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    /// Phase ID, unique within the plan.
    pub id: String,
    /// Display name (defaults to the ID).
    #[serde(default)]
    pub name: String,
    /// Phases that must fully complete first. Every unit of this phase
    /// implicitly depends on every unit of the listed phases.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// The phase's plan-units.
    #[serde(default)]
    pub units: Vec<PlanUnitDefinition>,
}

// ---------------------------------------------------------------------------
// Plan-unit
// ---------------------------------------------------------------------------

/// The atomic schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUnitDefinition {
    /// Unit ID, unique across the whole plan.
    pub id: String,
    /// Display name (defaults to the ID).
    #[serde(default)]
    pub name: String,
    /// Unit IDs this unit depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Stable key used to make side effects idempotent and to seed backoff jitter.
    /// Defaults to `{plan_id}:{unit_id}` when empty.
    #[serde(default)]
    pub idempotency_key: String,
    /// Risk classification driving the retry policy.
    #[serde(default)]
    pub risk_tier: RiskTier,
    /// Circuit breaker key for the external resource this unit calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Query handed to the semantic dependency resolver, if one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_query: Option<String>,
    /// Per-unit execution timeout in seconds (overrides the executor default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Opaque payload handed to the unit worker.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

/// Risk tier of a plan-unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Risk in `[0, 1]` used by risk-adaptive backoff.
    pub fn risk_score(self) -> f64 {
        match self {
            RiskTier::Low => 0.0,
            RiskTier::Medium => 0.25,
            RiskTier::High => 0.5,
            RiskTier::Critical => 1.0,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Stored plan summary
// ---------------------------------------------------------------------------

/// Lightweight listing entry for persisted plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub unit_count: usize,
    pub created_at: DateTime<Utc>,
}
