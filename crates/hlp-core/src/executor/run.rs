//! In-memory execution state of one plan.
//!
//! Every unit has its own async mutex; a transition holds it while the
//! checkpoint is written so the stored log and the in-memory state never
//! disagree. The dispatch gate serializes the scheduler loop against `cancel`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use hlp_types::artifact::{Artifact, ArtifactStatus};
use hlp_types::checkpoint::Checkpoint;
use hlp_types::failure::RetryRecord;
use hlp_types::plan::{Plan, PlanUnitDefinition};
use hlp_types::rollback::RollbackReport;
use hlp_types::state::UnitState;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::dag::PlanGraph;
use crate::retry::backoff_seed;
use crate::state_machine::{phase_status, plan_status};

use super::report::{PhaseReport, PlanStatusReport, UnitReport};

/// Mutable state of one unit.
#[derive(Debug, Clone)]
pub(crate) struct UnitRecord {
    pub state: UnitState,
    /// Sequence number of the last checkpoint written for this unit.
    pub seq: u64,
    pub attempt: u32,
    pub retry: RetryRecord,
    pub artifacts: Vec<Artifact>,
    pub last_error: Option<String>,
}

impl UnitRecord {
    pub fn new(unit: &PlanUnitDefinition) -> Self {
        Self {
            state: UnitState::Pending,
            seq: 0,
            attempt: 0,
            retry: RetryRecord::new(backoff_seed(&unit.idempotency_key, unit.risk_tier)),
            artifacts: Vec::new(),
            last_error: None,
        }
    }

    /// Rebuild from the unit's latest checkpoint.
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        let last_error = match checkpoint.state {
            UnitState::Failed | UnitState::Retrying => checkpoint
                .retry
                .last_failure
                .as_ref()
                .map(ToString::to_string),
            _ => None,
        };
        Self {
            state: checkpoint.state,
            seq: checkpoint.seq,
            attempt: checkpoint.attempt,
            retry: checkpoint.retry,
            artifacts: checkpoint.artifact_refs,
            last_error,
        }
    }

    pub fn has_outstanding_artifacts(&self) -> bool {
        self.artifacts.iter().any(Artifact::needs_compensation)
    }
}

/// Exclusive claim on a plan's rollback, released on drop.
pub(crate) struct RollbackLease<'a> {
    run: &'a PlanRun,
}

impl Drop for RollbackLease<'_> {
    fn drop(&mut self) {
        self.run.rolling_back.store(false, Ordering::SeqCst);
    }
}

/// A plan loaded into an executor.
pub(crate) struct PlanRun {
    pub plan: Plan,
    pub graph: PlanGraph,
    /// Unit definitions, indexed like `graph`.
    pub defs: Vec<PlanUnitDefinition>,
    pub units: Vec<Mutex<UnitRecord>>,
    /// Fired on halt or cancel; wakes pending retry timers.
    pub stop: CancellationToken,
    pub gate: Mutex<()>,
    pub halted: AtomicBool,
    pub cancelled: AtomicBool,
    pub active: AtomicBool,
    /// Held by the one rollback allowed to run against this plan at a time.
    rolling_back: AtomicBool,
    /// Set by an emergency stop: the automatic rollback covers every phase.
    escalated: AtomicBool,
    done: watch::Sender<bool>,
    fatal: StdMutex<Option<String>>,
    rollbacks: StdMutex<Vec<RollbackReport>>,
}

impl PlanRun {
    /// A fresh run with every unit pending.
    pub fn new(plan: Plan, graph: PlanGraph) -> Self {
        Self::with_records(plan, graph, &HashMap::new())
    }

    /// A run restored from replayed checkpoints. Units without a checkpoint
    /// start pending.
    pub fn with_records(
        plan: Plan,
        graph: PlanGraph,
        latest: &HashMap<String, Checkpoint>,
    ) -> Self {
        let defs: Vec<PlanUnitDefinition> = plan.units().cloned().collect();
        let units = defs
            .iter()
            .map(|def| {
                let record = match latest.get(&def.id) {
                    Some(cp) => UnitRecord::from_checkpoint(cp.clone()),
                    None => UnitRecord::new(def),
                };
                Mutex::new(record)
            })
            .collect();
        let (done, _) = watch::channel(false);
        Self {
            plan,
            graph,
            defs,
            units,
            stop: CancellationToken::new(),
            gate: Mutex::new(()),
            halted: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            active: AtomicBool::new(false),
            rolling_back: AtomicBool::new(false),
            escalated: AtomicBool::new(false),
            done,
            fatal: StdMutex::new(None),
            rollbacks: StdMutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.plan.id
    }

    pub fn unit_id(&self, idx: usize) -> &str {
        &self.defs[idx].id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_rolling_back(&self) -> bool {
        self.rolling_back.load(Ordering::SeqCst)
    }

    /// Claim the plan for a rollback. `None` while another rollback holds it.
    pub fn try_begin_rollback(&self) -> Option<RollbackLease<'_>> {
        self.rolling_back
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RollbackLease { run: self })
    }

    /// Busy plans accept no resume, cancel or second rollback.
    pub fn is_busy(&self) -> bool {
        self.is_active() || self.is_rolling_back()
    }

    pub fn is_stopped(&self) -> bool {
        self.halted.load(Ordering::SeqCst) || self.cancelled.load(Ordering::SeqCst)
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.stop.cancel();
    }

    /// Halt and widen the automatic rollback to the whole plan.
    pub fn emergency_stop(&self) {
        self.escalated.store(true, Ordering::SeqCst);
        self.halt();
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated.load(Ordering::SeqCst)
    }

    pub fn set_fatal(&self, message: String) {
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        fatal.get_or_insert(message);
    }

    pub fn fatal(&self) -> Option<String> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn push_rollback(&self, report: RollbackReport) {
        self.rollbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }

    pub fn mark_done(&self) {
        self.done.send_replace(true);
    }

    pub fn done_receiver(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Snapshot all unit records, in arena order.
    pub async fn snapshot(&self) -> Vec<UnitRecord> {
        let mut records = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            records.push(unit.lock().await.clone());
        }
        records
    }

    pub async fn report(&self) -> PlanStatusReport {
        let records = self.snapshot().await;
        let rollback_failed = records.iter().any(|r| {
            r.artifacts
                .iter()
                .any(|a| a.status == ArtifactStatus::RollbackFailed)
        });
        let states: Vec<UnitState> = records.iter().map(|r| r.state).collect();

        let phases = self
            .plan
            .phases
            .iter()
            .enumerate()
            .map(|(phase_idx, phase)| {
                let members = self.graph.units_in_phase(phase_idx);
                let units: Vec<UnitReport> = members
                    .iter()
                    .map(|&idx| {
                        let record = &records[idx];
                        UnitReport {
                            unit_id: self.defs[idx].id.clone(),
                            phase_id: phase.id.clone(),
                            state: record.state,
                            attempt: record.attempt,
                            retry: record.retry.clone(),
                            artifacts: record.artifacts.clone(),
                            last_error: record.last_error.clone(),
                        }
                    })
                    .collect();
                let phase_states: Vec<UnitState> = units.iter().map(|u| u.state).collect();
                PhaseReport {
                    phase_id: phase.id.clone(),
                    name: phase.name.clone(),
                    status: phase_status(&phase_states),
                    units,
                }
            })
            .collect();

        PlanStatusReport {
            plan_id: self.plan.id,
            name: self.plan.name.clone(),
            status: plan_status(&states, self.is_active(), rollback_failed),
            phases,
            rollbacks: self
                .rollbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
