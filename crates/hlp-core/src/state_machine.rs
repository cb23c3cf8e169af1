//! Plan-unit lifecycle rules and phase/plan status aggregation.
//!
//! ```text
//! PENDING -> QUEUED -> RUNNING -> COMPLETED | FAILED
//! FAILED -> RETRYING -> RUNNING
//! FAILED | COMPLETED | ROLLED_BACK -> ROLLING_BACK -> ROLLED_BACK
//! any non-terminal -> ABORTED
//! ```
//!
//! `COMPLETED` and `ROLLED_BACK` only accept the explicit rollback transition.
//! `ABORTED` accepts nothing.

use hlp_types::state::{PhaseStatus, PlanStatus, UnitState};
use thiserror::Error;

/// A transition the lifecycle does not allow. Indicates a scheduler defect or
/// corrupted state, so callers surface it instead of recovering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for unit '{unit_id}': {from} -> {to}")]
pub struct InvalidTransitionError {
    pub unit_id: String,
    pub from: UnitState,
    pub to: UnitState,
}

/// Whether `from -> to` is an allowed edge.
pub fn is_valid_transition(from: UnitState, to: UnitState) -> bool {
    use UnitState::*;

    match (from, to) {
        (Pending, Queued)
        | (Queued, Running)
        | (Running, Completed)
        | (Running, Failed)
        | (Failed, Retrying)
        | (Retrying, Running)
        | (Failed, RollingBack)
        | (Completed, RollingBack)
        | (RolledBack, RollingBack)
        | (RollingBack, RolledBack) => true,
        (from, Aborted) => !from.is_terminal(),
        _ => false,
    }
}

/// Validate a transition for `unit_id`.
pub fn check_transition(
    unit_id: &str,
    from: UnitState,
    to: UnitState,
) -> Result<(), InvalidTransitionError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(InvalidTransitionError {
            unit_id: unit_id.to_string(),
            from,
            to,
        })
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Derive a phase's status from its units' states.
pub fn phase_status(states: &[UnitState]) -> PhaseStatus {
    use UnitState::*;

    let any = |s: UnitState| states.contains(&s);

    if states.is_empty() {
        return PhaseStatus::Completed;
    }
    if any(RollingBack) {
        return PhaseStatus::RollingBack;
    }
    if any(Queued) || any(Running) || any(Retrying) {
        return PhaseStatus::Running;
    }
    if any(Failed) {
        return PhaseStatus::Failed;
    }
    if any(RolledBack) {
        return PhaseStatus::RolledBack;
    }
    if any(Aborted) {
        return PhaseStatus::Aborted;
    }
    if states.iter().all(|&s| s == Completed) {
        return PhaseStatus::Completed;
    }
    if states.iter().all(|&s| s == Pending) {
        return PhaseStatus::Pending;
    }
    PhaseStatus::Running
}

/// Derive a plan's status. Ordered by severity: an unresolved compensation
/// failure outranks everything else once the plan is idle.
pub fn plan_status(states: &[UnitState], active: bool, rollback_failed: bool) -> PlanStatus {
    use UnitState::*;

    let any = |s: UnitState| states.contains(&s);

    if active {
        return PlanStatus::Running;
    }
    if rollback_failed {
        return PlanStatus::Degraded;
    }
    if any(Failed) {
        return PlanStatus::Failed;
    }
    if any(RolledBack) || any(RollingBack) {
        return PlanStatus::RolledBack;
    }
    if any(Aborted) {
        return PlanStatus::Cancelled;
    }
    if states.iter().all(|&s| s == Completed) {
        return PlanStatus::Completed;
    }
    if states.iter().all(|&s| s == Pending) {
        return PlanStatus::Pending;
    }
    PlanStatus::Interrupted
}

#[cfg(test)]
mod tests {
    use super::*;
    use UnitState::*;

    #[test]
    fn happy_path_is_valid() {
        for (from, to) in [
            (Pending, Queued),
            (Queued, Running),
            (Running, Completed),
            (Running, Failed),
            (Failed, Retrying),
            (Retrying, Running),
        ] {
            assert!(is_valid_transition(from, to), "{from} -> {to}");
        }
    }

    #[test]
    fn rollback_edges() {
        assert!(is_valid_transition(Completed, RollingBack));
        assert!(is_valid_transition(Failed, RollingBack));
        assert!(is_valid_transition(RollingBack, RolledBack));
        // Re-running a rollback is allowed
        assert!(is_valid_transition(RolledBack, RollingBack));
        assert!(!is_valid_transition(Pending, RollingBack));
        assert!(!is_valid_transition(Running, RollingBack));
    }

    #[test]
    fn terminal_states_reject_other_edges() {
        assert!(!is_valid_transition(Completed, Running));
        assert!(!is_valid_transition(Completed, Failed));
        assert!(!is_valid_transition(RolledBack, Queued));
        for to in [Pending, Queued, Running, Completed, Failed, Retrying, RollingBack, RolledBack] {
            assert!(!is_valid_transition(Aborted, to), "aborted -> {to}");
        }
    }

    #[test]
    fn any_non_terminal_can_abort() {
        for from in [Pending, Queued, Running, Failed, Retrying, RollingBack] {
            assert!(is_valid_transition(from, Aborted), "{from} -> aborted");
        }
        assert!(!is_valid_transition(Completed, Aborted));
        assert!(!is_valid_transition(RolledBack, Aborted));
    }

    #[test]
    fn skipping_states_is_rejected() {
        let err = check_transition("u1", Pending, Running).unwrap_err();
        assert_eq!(err.from, Pending);
        assert_eq!(err.to, Running);
        assert!(err.to_string().contains("'u1'"));
        assert!(check_transition("u1", Pending, Completed).is_err());
        assert!(check_transition("u1", Retrying, Completed).is_err());
    }

    #[test]
    fn phase_status_aggregation() {
        assert_eq!(phase_status(&[]), PhaseStatus::Completed);
        assert_eq!(phase_status(&[Pending, Pending]), PhaseStatus::Pending);
        assert_eq!(phase_status(&[Completed, Pending]), PhaseStatus::Running);
        assert_eq!(phase_status(&[Completed, Failed, Pending]), PhaseStatus::Failed);
        assert_eq!(phase_status(&[Completed, Retrying]), PhaseStatus::Running);
        assert_eq!(phase_status(&[RolledBack, RolledBack, Pending]), PhaseStatus::RolledBack);
        assert_eq!(phase_status(&[Completed, RollingBack]), PhaseStatus::RollingBack);
        assert_eq!(phase_status(&[Completed, Completed]), PhaseStatus::Completed);
    }

    #[test]
    fn plan_status_aggregation() {
        assert_eq!(plan_status(&[Running], true, false), PlanStatus::Running);
        assert_eq!(plan_status(&[Completed, Completed], false, false), PlanStatus::Completed);
        assert_eq!(plan_status(&[Completed, Failed], false, false), PlanStatus::Failed);
        assert_eq!(plan_status(&[RolledBack, Pending], false, false), PlanStatus::RolledBack);
        assert_eq!(plan_status(&[RolledBack], false, true), PlanStatus::Degraded);
        assert_eq!(plan_status(&[Completed, Aborted], false, false), PlanStatus::Cancelled);
        assert_eq!(plan_status(&[Completed, Running], false, false), PlanStatus::Interrupted);
        assert_eq!(plan_status(&[], false, false), PlanStatus::Completed);
    }
}
