//! Plan executor: DAG scheduling with durable checkpoints, retry, circuit
//! breaking and partial rollback.
//!
//! # Execution flow
//!
//! 1. `submit` validates the plan, merges resolver-supplied dependencies,
//!    persists the definition and spawns the plan's scheduler loop.
//! 2. Ready units (all dependencies COMPLETED) are dispatched while a worker
//!    slot is free. Every transition is checkpointed before it is visible.
//! 3. Failures go through the retry policy; open circuits defer the unit
//!    without consuming its retry budget.
//! 4. A permanent failure halts dispatch (unless `continue_on_failure`),
//!    in-flight units settle and, when `auto_rollback` is on, each failed
//!    phase is rolled back.
//! 5. `resume` rebuilds a plan from its checkpoint log after a restart.

pub mod report;
mod run;
mod scheduler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hlp_types::config::{ExecutorConfig, ExecutorSettings};
use hlp_types::event::ExecutorEvent;
use hlp_types::plan::Plan;
use hlp_types::rollback::{RollbackGranularity, RollbackReport};
use hlp_types::state::UnitState;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::checkpoint::{CheckpointError, CheckpointManager};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::compensator::CompensatorRegistry;
use crate::dag::PlanGraph;
use crate::definition::{PlanError, normalize_plan, validate_plan};
use crate::event::{EventBus, PlanSubscription};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::repository::checkpoint::CheckpointRepository;
use crate::resolver::BoxDependencyResolver;
use crate::retry::{RetryPolicyEngine, RetryPredicate};
use crate::rollback::RollbackManager;
use crate::state_machine::InvalidTransitionError;
use crate::worker::BoxUnitWorker;

pub use report::{PhaseReport, PlanStatusReport, UnitReport};
use run::PlanRun;

// ---------------------------------------------------------------------------
// PlanExecutor
// ---------------------------------------------------------------------------

/// Runs plans against a checkpoint store.
///
/// Generic over `S: CheckpointRepository` for storage flexibility. Cloning is
/// cheap and clones share all state, including loaded plans.
pub struct PlanExecutor<S: CheckpointRepository> {
    store: Arc<CheckpointManager<S>>,
    worker: Arc<BoxUnitWorker>,
    compensators: Arc<CompensatorRegistry>,
    retry: Arc<RetryPolicyEngine>,
    breakers: Arc<CircuitBreakerRegistry>,
    resolver: Option<Arc<BoxDependencyResolver>>,
    metrics: Arc<dyn MetricsSink>,
    events: EventBus,
    config: ExecutorConfig,
    runs: Arc<DashMap<Uuid, Arc<PlanRun>>>,
}

impl<S: CheckpointRepository> Clone for PlanExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            worker: Arc::clone(&self.worker),
            compensators: Arc::clone(&self.compensators),
            retry: Arc::clone(&self.retry),
            breakers: Arc::clone(&self.breakers),
            resolver: self.resolver.clone(),
            metrics: Arc::clone(&self.metrics),
            events: self.events.clone(),
            config: self.config.clone(),
            runs: Arc::clone(&self.runs),
        }
    }
}

impl<S: CheckpointRepository + 'static> PlanExecutor<S> {
    /// Create an executor with no compensators, no resolver and no metrics.
    pub fn new(repo: S, worker: BoxUnitWorker, settings: &ExecutorSettings) -> Self {
        Self {
            store: Arc::new(CheckpointManager::new(repo)),
            worker: Arc::new(worker),
            compensators: Arc::new(CompensatorRegistry::new()),
            retry: Arc::new(RetryPolicyEngine::new(settings.retry.clone())),
            breakers: Arc::new(CircuitBreakerRegistry::new(
                settings.circuit_breaker.clone(),
            )),
            resolver: None,
            metrics: Arc::new(NoopMetrics),
            events: EventBus::new(settings.executor.event_capacity),
            config: settings.executor.clone(),
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn with_compensators(mut self, compensators: CompensatorRegistry) -> Self {
        self.compensators = Arc::new(compensators);
        self
    }

    pub fn with_resolver(mut self, resolver: BoxDependencyResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the failure classification used by the retry policy.
    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        let config = self.retry.config().clone();
        self.retry = Arc::new(RetryPolicyEngine::with_predicate(config, predicate));
        self
    }

    /// Share circuit breakers with other executors.
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.store
    }

    /// Subscribe to unit transitions and plan outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.events.subscribe()
    }

    /// Subscribe to one plan's events. Subscribe before `submit` or `resume`
    /// to see the plan from its first transition.
    pub fn subscribe_plan(&self, plan_id: Uuid) -> PlanSubscription {
        self.events.subscribe_plan(plan_id)
    }

    // -----------------------------------------------------------------------
    // Plan lifecycle
    // -----------------------------------------------------------------------

    /// Validate, persist and start a plan. Returns its ID immediately; use
    /// [`wait`](Self::wait) to block until it finishes.
    pub async fn submit(&self, plan: Plan) -> Result<Uuid, ExecutorError> {
        let mut plan = plan;
        validate_plan(&plan)?;
        normalize_plan(&mut plan);
        PlanGraph::build(&plan)?;

        let plan_id = plan.id;
        if self.runs.contains_key(&plan_id) {
            return Err(ExecutorError::PlanExists(plan_id));
        }
        match self.store.load_plan(plan_id).await {
            Ok(_) => return Err(ExecutorError::PlanExists(plan_id)),
            Err(CheckpointError::PlanNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let plan = self.merge_resolved_dependencies(plan).await;
        let graph = PlanGraph::build(&plan)?;
        self.store.save_plan(&plan).await?;

        let unit_count = plan.unit_count();
        let run = Arc::new(PlanRun::new(plan, graph));
        match self.runs.entry(plan_id) {
            Entry::Occupied(_) => return Err(ExecutorError::PlanExists(plan_id)),
            Entry::Vacant(slot) => {
                run.active.store(true, Ordering::SeqCst);
                slot.insert(Arc::clone(&run));
            }
        }

        tracing::info!(plan_id = %plan_id, name = %run.plan.name, unit_count, "plan submitted");
        self.events.publish(ExecutorEvent::PlanSubmitted {
            plan_id,
            unit_count,
        });
        self.start(run);
        Ok(plan_id)
    }

    /// Current status of a plan, loading it from the checkpoint store if this
    /// executor has not seen it.
    pub async fn status(&self, plan_id: Uuid) -> Result<PlanStatusReport, ExecutorError> {
        let run = self.load_run(plan_id).await?;
        Ok(run.report().await)
    }

    /// Wait for a plan's scheduler loop to finish and return its final status.
    ///
    /// Returns [`ExecutorError::Fatal`] if the loop stopped on an invalid
    /// transition or a checkpoint write failure.
    pub async fn wait(&self, plan_id: Uuid) -> Result<PlanStatusReport, ExecutorError> {
        let run = self.load_run(plan_id).await?;
        if run.is_active() {
            let mut done = run.done_receiver();
            done.wait_for(|finished| *finished)
                .await
                .map_err(|e| ExecutorError::Fatal(e.to_string()))?;
        }
        if let Some(message) = run.fatal() {
            return Err(ExecutorError::Fatal(message));
        }
        Ok(run.report().await)
    }

    /// Stop dispatching and abort every unit that has not finished.
    ///
    /// In-flight workers are not interrupted; their results are discarded
    /// but any artifacts they report are recorded. Nothing is rolled back.
    pub async fn cancel(&self, plan_id: Uuid) -> Result<(), ExecutorError> {
        let run = self.load_run(plan_id).await?;
        if run.is_rolling_back() {
            return Err(ExecutorError::PlanActive(plan_id));
        }
        if !run.is_active() {
            tracing::debug!(plan_id = %plan_id, "cancel ignored, plan is not running");
            return Ok(());
        }

        run.cancelled.store(true, Ordering::SeqCst);
        run.stop.cancel();
        let _gate = run.gate.lock().await;

        let mut aborted = 0usize;
        for idx in 0..run.units.len() {
            let mut rec = run.units[idx].lock().await;
            if matches!(
                rec.state,
                UnitState::Pending | UnitState::Queued | UnitState::Running | UnitState::Retrying
            ) {
                self.transition(
                    &run,
                    idx,
                    &mut rec,
                    UnitState::Aborted,
                    Some("plan cancelled".to_string()),
                )
                .await?;
                aborted += 1;
            }
        }
        tracing::info!(plan_id = %plan_id, aborted, "plan cancelled");
        Ok(())
    }

    /// Restart a plan from its checkpoint log.
    ///
    /// Completed units are kept, interrupted units are retried under the
    /// retry policy and pending units whose dependencies are complete are
    /// queued.
    pub async fn resume(&self, plan_id: Uuid) -> Result<(), ExecutorError> {
        if self.runs.get(&plan_id).is_some_and(|r| r.is_busy()) {
            return Err(ExecutorError::PlanActive(plan_id));
        }

        let run = Arc::new(self.hydrate(plan_id).await?);
        match self.runs.entry(plan_id) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_busy() {
                    return Err(ExecutorError::PlanActive(plan_id));
                }
                run.active.store(true, Ordering::SeqCst);
                slot.insert(Arc::clone(&run));
            }
            Entry::Vacant(slot) => {
                run.active.store(true, Ordering::SeqCst);
                slot.insert(Arc::clone(&run));
            }
        }

        tracing::info!(plan_id = %plan_id, "resuming plan from checkpoints");
        self.start(run);
        Ok(())
    }

    /// Compensate a phase, a unit or a single artifact of an idle plan.
    ///
    /// Only one rollback runs per plan at a time; while it does, `resume`,
    /// `cancel` and further rollbacks return [`ExecutorError::PlanActive`].
    /// Safe to re-run: compensated artifacts are skipped and artifacts whose
    /// compensation failed before are retried.
    pub async fn rollback(
        &self,
        plan_id: Uuid,
        granularity: RollbackGranularity,
        target_id: &str,
    ) -> Result<RollbackReport, ExecutorError> {
        self.load_run(plan_id).await?;

        // Claimed under the map entry so a concurrent resume cannot swap the
        // run out between the lookup and the claim.
        let entry = self
            .runs
            .get(&plan_id)
            .ok_or(ExecutorError::PlanNotFound(plan_id))?;
        let run = Arc::clone(entry.value());
        let lease = run.try_begin_rollback();
        drop(entry);

        let Some(_lease) = lease else {
            return Err(ExecutorError::PlanActive(plan_id));
        };
        if run.is_active() {
            return Err(ExecutorError::PlanActive(plan_id));
        }
        self.run_rollback(&run, granularity, target_id).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn start(&self, run: Arc<PlanRun>) {
        let executor = self.clone();
        tokio::spawn(executor.drive(run));
    }

    /// The in-memory run, or one rebuilt from the store.
    async fn load_run(&self, plan_id: Uuid) -> Result<Arc<PlanRun>, ExecutorError> {
        if let Some(run) = self.runs.get(&plan_id).map(|r| Arc::clone(r.value())) {
            return Ok(run);
        }
        let run = Arc::new(self.hydrate(plan_id).await?);
        Ok(Arc::clone(self.runs.entry(plan_id).or_insert(run).value()))
    }

    async fn hydrate(&self, plan_id: Uuid) -> Result<PlanRun, ExecutorError> {
        let plan = self.store.load_plan(plan_id).await.map_err(|e| match e {
            CheckpointError::PlanNotFound(id) => ExecutorError::PlanNotFound(id),
            other => ExecutorError::Checkpoint(other),
        })?;
        let graph = PlanGraph::build(&plan)?;
        let latest = self.store.replay(plan_id).await?;
        tracing::debug!(
            plan_id = %plan_id,
            checkpointed_units = latest.len(),
            "rebuilt plan from checkpoints"
        );
        Ok(PlanRun::with_records(plan, graph, &latest))
    }

    /// Ask the resolver for extra dependencies and bake them into the plan.
    ///
    /// The resolver is advisory: errors, timeouts, unknown unit IDs and
    /// induced cycles all leave the statically declared dependencies in place.
    async fn merge_resolved_dependencies(&self, plan: Plan) -> Plan {
        let Some(resolver) = &self.resolver else {
            return plan;
        };

        let known: HashSet<&str> = plan.units().map(|u| u.id.as_str()).collect();
        let budget = Duration::from_millis(self.config.resolver_timeout_ms);
        let mut extra: HashMap<String, Vec<String>> = HashMap::new();

        for unit in plan.units() {
            let Some(query) = unit.dependency_query.as_deref() else {
                continue;
            };
            let resolved = match tokio::time::timeout(budget, resolver.resolve(query)).await {
                Ok(Ok(ids)) => ids,
                Ok(Err(e)) => {
                    tracing::warn!(
                        unit_id = %unit.id,
                        error = %e,
                        "dependency resolver failed, using static dependencies"
                    );
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        unit_id = %unit.id,
                        timeout_ms = self.config.resolver_timeout_ms,
                        "dependency resolver timed out, using static dependencies"
                    );
                    continue;
                }
            };

            if let Some(unknown) = resolved.iter().find(|id| !known.contains(id.as_str())) {
                tracing::warn!(
                    unit_id = %unit.id,
                    unknown = %unknown,
                    "dependency resolver returned an unknown unit, using static dependencies"
                );
                continue;
            }
            let added: Vec<String> = resolved
                .into_iter()
                .filter(|id| *id != unit.id && !unit.depends_on.contains(id))
                .collect();
            if !added.is_empty() {
                extra.insert(unit.id.clone(), added);
            }
        }

        if extra.is_empty() {
            return plan;
        }

        let mut candidate = plan.clone();
        for phase in &mut candidate.phases {
            for unit in &mut phase.units {
                if let Some(added) = extra.remove(&unit.id) {
                    unit.depends_on.extend(added);
                }
            }
        }
        match PlanGraph::build(&candidate) {
            Ok(_) => {
                tracing::debug!(plan_id = %candidate.id, "merged resolved dependencies");
                candidate
            }
            Err(e) => {
                tracing::warn!(
                    plan_id = %plan.id,
                    error = %e,
                    "resolved dependencies are invalid, using static dependencies"
                );
                plan
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rollback
    // -----------------------------------------------------------------------

    async fn run_rollback(
        &self,
        run: &PlanRun,
        granularity: RollbackGranularity,
        target_id: &str,
    ) -> Result<RollbackReport, ExecutorError> {
        let manager = RollbackManager::new(
            Arc::clone(&self.compensators),
            (*self.retry).clone(),
            Arc::clone(&self.metrics),
        );
        let unknown = || ExecutorError::UnknownTarget {
            granularity,
            target_id: target_id.to_string(),
        };
        let mut report = RollbackReport::new(run.id(), granularity, target_id);

        match granularity {
            RollbackGranularity::Phase => {
                let phase = run.graph.phase_index(target_id).ok_or_else(unknown)?;
                for idx in run.graph.reverse_order_in_phase(phase) {
                    self.rollback_unit(run, idx, &manager, &mut report).await?;
                }
            }
            RollbackGranularity::Unit => {
                let idx = run.graph.index_of(target_id).ok_or_else(unknown)?;
                self.rollback_unit(run, idx, &manager, &mut report).await?;
            }
            RollbackGranularity::Artifact => {
                if !self
                    .rollback_artifact(run, target_id, &manager, &mut report)
                    .await?
                {
                    return Err(unknown());
                }
            }
        }

        report.finished_at = Some(Utc::now());
        tracing::info!(
            plan_id = %run.id(),
            granularity = %granularity,
            target_id = %target_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "rollback finished"
        );
        self.events.publish(ExecutorEvent::RollbackFinished {
            plan_id: run.id(),
            target_id: target_id.to_string(),
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
        });
        run.push_rollback(report.clone());
        Ok(report)
    }

    async fn rollback_unit(
        &self,
        run: &PlanRun,
        idx: usize,
        manager: &RollbackManager,
        report: &mut RollbackReport,
    ) -> Result<(), ExecutorError> {
        let def = &run.defs[idx];
        let mut rec = run.units[idx].lock().await;
        let outstanding = rec.has_outstanding_artifacts();

        let restate = match rec.state {
            UnitState::RolledBack if !outstanding => {
                report
                    .skipped
                    .extend(rec.artifacts.iter().map(|a| a.id.clone()));
                return Ok(());
            }
            UnitState::Completed | UnitState::Failed | UnitState::RolledBack => {
                self.transition(
                    run,
                    idx,
                    &mut rec,
                    UnitState::RollingBack,
                    Some("rollback requested".to_string()),
                )
                .await?;
                true
            }
            // Interrupted rollback
            UnitState::RollingBack => true,
            // Aborted or never finished: compensate whatever it left behind
            _ if outstanding => false,
            _ => return Ok(()),
        };

        let tier = def.risk_tier;
        let seed = rec.retry.backoff_seed;
        manager
            .compensate_unit(&mut rec.artifacts, tier, seed, report)
            .await;

        if restate {
            self.transition(run, idx, &mut rec, UnitState::RolledBack, None)
                .await?;
            report.units_rolled_back.push(def.id.clone());
        } else {
            self.write_checkpoint(run, idx, &mut rec, Some("artifacts compensated".to_string()))
                .await?;
        }
        Ok(())
    }

    /// Compensate one artifact by ID. Returns `false` if no unit owns it.
    async fn rollback_artifact(
        &self,
        run: &PlanRun,
        artifact_id: &str,
        manager: &RollbackManager,
        report: &mut RollbackReport,
    ) -> Result<bool, ExecutorError> {
        for idx in 0..run.units.len() {
            let mut rec = run.units[idx].lock().await;
            let Some(pos) = rec.artifacts.iter().position(|a| a.id == artifact_id) else {
                continue;
            };
            let tier = run.defs[idx].risk_tier;
            let seed = rec.retry.backoff_seed;
            manager
                .compensate_artifact(&mut rec.artifacts[pos], tier, seed, report)
                .await;
            self.write_checkpoint(
                run,
                idx,
                &mut rec,
                Some(format!("artifact '{artifact_id}' rolled back")),
            )
            .await?;
            return Ok(true);
        }
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from executor operations.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The plan was rejected before scheduling.
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// Checkpoint persistence error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The scheduler attempted a transition the lifecycle forbids.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),

    #[error("plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("plan already exists: {0}")]
    PlanExists(Uuid),

    /// The operation needs the plan to be idle.
    #[error("plan is still running: {0}")]
    PlanActive(Uuid),

    #[error("unknown {granularity} '{target_id}'")]
    UnknownTarget {
        granularity: RollbackGranularity,
        target_id: String,
    },

    /// The scheduler loop stopped on an unrecoverable error.
    #[error("plan execution aborted: {0}")]
    Fatal(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
