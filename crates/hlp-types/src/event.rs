//! Events published by the executor on its broadcast bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{PlanStatus, UnitState};

/// Observable executor activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    PlanSubmitted {
        plan_id: Uuid,
        unit_count: usize,
    },
    /// Emitted after the transition's checkpoint is durable.
    UnitTransitioned {
        plan_id: Uuid,
        unit_id: String,
        from: UnitState,
        to: UnitState,
        attempt: u32,
    },
    RetryScheduled {
        plan_id: Uuid,
        unit_id: String,
        delay_ms: u64,
        attempt_count: u32,
    },
    CircuitOpened {
        resource: String,
    },
    RollbackFinished {
        plan_id: Uuid,
        target_id: String,
        succeeded: usize,
        failed: usize,
    },
    PlanFinished {
        plan_id: Uuid,
        status: PlanStatus,
    },
}

impl ExecutorEvent {
    /// The plan this event belongs to. Circuit events are executor-wide.
    pub fn plan_id(&self) -> Option<Uuid> {
        match self {
            Self::PlanSubmitted { plan_id, .. }
            | Self::UnitTransitioned { plan_id, .. }
            | Self::RetryScheduled { plan_id, .. }
            | Self::RollbackFinished { plan_id, .. }
            | Self::PlanFinished { plan_id, .. } => Some(*plan_id),
            Self::CircuitOpened { .. } => None,
        }
    }

    /// Snake-case event name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanSubmitted { .. } => "plan_submitted",
            Self::UnitTransitioned { .. } => "unit_transitioned",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::RollbackFinished { .. } => "rollback_finished",
            Self::PlanFinished { .. } => "plan_finished",
        }
    }
}
