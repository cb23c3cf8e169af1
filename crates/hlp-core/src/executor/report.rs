//! Point-in-time views of a plan's execution state.

use hlp_types::artifact::{Artifact, ArtifactStatus};
use hlp_types::failure::RetryRecord;
use hlp_types::rollback::RollbackReport;
use hlp_types::state::{PhaseStatus, PlanStatus, UnitState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of one plan-unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit_id: String,
    pub phase_id: String,
    pub state: UnitState,
    /// Number of times the unit was handed to a worker.
    pub attempt: u32,
    pub retry: RetryRecord,
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Aggregated state of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase_id: String,
    pub name: String,
    pub status: PhaseStatus,
    pub units: Vec<UnitReport>,
}

/// Result of `status` and `wait`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStatusReport {
    pub plan_id: Uuid,
    pub name: String,
    pub status: PlanStatus,
    pub phases: Vec<PhaseReport>,
    /// Rollbacks run against this plan since it was loaded.
    #[serde(default)]
    pub rollbacks: Vec<RollbackReport>,
}

impl PlanStatusReport {
    pub fn phase(&self, phase_id: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }

    pub fn unit(&self, unit_id: &str) -> Option<&UnitReport> {
        self.units().find(|u| u.unit_id == unit_id)
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitReport> {
        self.phases.iter().flat_map(|p| p.units.iter())
    }

    /// Count of units in `state`.
    pub fn count(&self, state: UnitState) -> usize {
        self.units().filter(|u| u.state == state).count()
    }

    /// Artifacts whose compensation gave up.
    pub fn unresolved_artifacts(&self) -> Vec<&Artifact> {
        self.units()
            .flat_map(|u| u.artifacts.iter())
            .filter(|a| a.status == ArtifactStatus::RollbackFailed)
            .collect()
    }
}
