//! Lifecycle states for plan-units, phases and plans.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single plan-unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
    RollingBack,
    RolledBack,
    Aborted,
}

impl UnitState {
    /// Terminal states only leave via an explicit rollback (or never, for `Aborted`).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Completed | UnitState::RolledBack | UnitState::Aborted
        )
    }

    /// States in which the unit is owned by the scheduler loop.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            UnitState::Queued | UnitState::Running | UnitState::Retrying
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::Queued => "queued",
            UnitState::Running => "running",
            UnitState::Completed => "completed",
            UnitState::Failed => "failed",
            UnitState::Retrying => "retrying",
            UnitState::RollingBack => "rolling_back",
            UnitState::RolledBack => "rolled_back",
            UnitState::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UnitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UnitState::Pending),
            "queued" => Ok(UnitState::Queued),
            "running" => Ok(UnitState::Running),
            "completed" => Ok(UnitState::Completed),
            "failed" => Ok(UnitState::Failed),
            "retrying" => Ok(UnitState::Retrying),
            "rolling_back" => Ok(UnitState::RollingBack),
            "rolled_back" => Ok(UnitState::RolledBack),
            "aborted" => Ok(UnitState::Aborted),
            other => Err(format!("invalid unit state: '{other}'")),
        }
    }
}

/// Status of a phase, derived from its units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
    Aborted,
}

/// Status of a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
    /// At least one artifact could not be compensated.
    Degraded,
    /// Not running, but units were left mid-flight (e.g. after a crash). Resume it.
    Interrupted,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::RolledBack => "rolled_back",
            PlanStatus::Cancelled => "cancelled",
            PlanStatus::Degraded => "degraded",
            PlanStatus::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::RollingBack => "rolling_back",
            PhaseStatus::RolledBack => "rolled_back",
            PhaseStatus::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_state_round_trips_through_str() {
        for state in [
            UnitState::Pending,
            UnitState::RollingBack,
            UnitState::RolledBack,
            UnitState::Aborted,
        ] {
            let parsed: UnitState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("bogus".parse::<UnitState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(UnitState::Completed.is_terminal());
        assert!(UnitState::Aborted.is_terminal());
        assert!(!UnitState::Failed.is_terminal());
        assert!(!UnitState::RollingBack.is_terminal());
    }

    #[test]
    fn serde_matches_as_str() {
        let json = serde_json::to_string(&UnitState::RollingBack).unwrap();
        assert_eq!(json, "\"rolling_back\"");
    }
}
