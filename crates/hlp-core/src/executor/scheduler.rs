//! The per-plan scheduler loop.
//!
//! One task per plan owns the ready queue. Units run on spawned tasks gated by
//! a semaphore sized to the plan's `max_in_flight`; results and retry timers
//! come back to the loop over an mpsc channel. Retry waits never hold a
//! worker slot.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use hlp_types::artifact::{Artifact, ArtifactSpec, ArtifactStatus};
use hlp_types::checkpoint::Checkpoint;
use hlp_types::event::ExecutorEvent;
use hlp_types::failure::{ExecutionFailure, RetryRecord};
use hlp_types::plan::PlanUnitDefinition;
use hlp_types::rollback::{RollbackAction, RollbackGranularity, RollbackScope, RollbackTrigger};
use hlp_types::state::UnitState;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::event::EventBus;
use crate::metrics::{self, MetricsSink};
use crate::repository::checkpoint::CheckpointRepository;
use crate::rollback::{evaluate_trigger, trigger_for};
use crate::state_machine::check_transition;
use crate::worker::{UnitContext, UnitOutput};

use super::run::{PlanRun, UnitRecord};
use super::{ExecutorError, PlanExecutor};

/// Messages delivered to the scheduler loop.
enum LoopEvent {
    Finished {
        idx: usize,
        result: Result<UnitOutput, ExecutionFailure>,
    },
    RetryDue {
        idx: usize,
    },
}

/// Loop-local bookkeeping.
struct LoopState {
    ready: VecDeque<usize>,
    completed: Vec<bool>,
    in_flight: usize,
    timers: usize,
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl<S: CheckpointRepository + 'static> PlanExecutor<S> {
    /// Drive a plan until nothing is left to dispatch, then publish its outcome.
    pub(super) async fn drive(self, run: Arc<PlanRun>) {
        let plan_id = run.id();
        match self.run_loop(&run).await {
            Ok(()) => {
                let halted = run.halted.load(Ordering::SeqCst);
                let cancelled = run.cancelled.load(Ordering::SeqCst);
                if halted && !cancelled && self.config.auto_rollback {
                    self.rollback_failed_phases(&run).await;
                }
            }
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "plan execution aborted");
                run.set_fatal(e.to_string());
                run.halt();
            }
        }

        run.active.store(false, Ordering::SeqCst);
        let report = run.report().await;
        let status = report.status.to_string();
        self.metrics
            .emit(metrics::PLANS_FINISHED, 1.0, &[("status", status.as_str())]);
        self.events.publish(ExecutorEvent::PlanFinished {
            plan_id,
            status: report.status,
        });
        tracing::info!(plan_id = %plan_id, status = %status, "plan finished");
        run.mark_done();
    }

    async fn run_loop(&self, run: &Arc<PlanRun>) -> Result<(), ExecutorError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slots = run
            .plan
            .max_in_flight
            .unwrap_or(self.config.max_in_flight)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(slots));
        let mut state = LoopState {
            ready: VecDeque::new(),
            completed: vec![false; run.graph.len()],
            in_flight: 0,
            timers: 0,
            tx,
        };

        {
            let _gate = run.gate.lock().await;
            self.recover(run, &mut state).await?;
        }

        loop {
            {
                let _gate = run.gate.lock().await;
                self.dispatch_ready(run, &mut state, &semaphore).await?;
            }

            let drained = state.ready.is_empty() || run.is_stopped();
            if state.in_flight == 0 && state.timers == 0 && drained {
                break;
            }

            let Some(event) = rx.recv().await else {
                break;
            };
            let _gate = run.gate.lock().await;
            match event {
                LoopEvent::Finished { idx, result } => {
                    self.on_finished(run, &mut state, idx, result).await?;
                }
                LoopEvent::RetryDue { idx } => {
                    self.on_retry_due(run, &mut state, idx).await?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Startup and crash recovery
    // -----------------------------------------------------------------------

    /// Seed the ready queue from the units' current states.
    ///
    /// For a fresh plan this queues the roots. After a restart, units that
    /// were running are failed as interrupted and go through the retry
    /// policy; completed units are never re-executed.
    async fn recover(&self, run: &PlanRun, state: &mut LoopState) -> Result<(), ExecutorError> {
        let order = run.graph.topological_order().to_vec();

        for &idx in &order {
            let mut rec = run.units[idx].lock().await;
            match rec.state {
                UnitState::Completed => state.completed[idx] = true,
                UnitState::Queued | UnitState::Retrying => state.ready.push_back(idx),
                UnitState::Running => {
                    tracing::warn!(
                        plan_id = %run.id(),
                        unit_id = %run.unit_id(idx),
                        "unit was running when the executor stopped"
                    );
                    let failure =
                        ExecutionFailure::Transient("interrupted before completion".to_string());
                    let delay = self.fail_unit(run, idx, &mut rec, failure).await?;
                    if !self.settle_failure(run, idx, &mut rec, delay, state).await? {
                        self.on_permanent_failure(run, idx, &rec);
                    }
                }
                UnitState::Failed => {
                    let delay = rec.retry.last_failure.clone().and_then(|failure| {
                        self.retry_delay(&run.defs[idx], &rec.retry, &failure)
                    });
                    if !self.settle_failure(run, idx, &mut rec, delay, state).await? {
                        self.on_permanent_failure(run, idx, &rec);
                    }
                }
                UnitState::Pending
                | UnitState::RollingBack
                | UnitState::RolledBack
                | UnitState::Aborted => {}
            }
        }

        for &idx in &order {
            if !run.graph.is_ready(idx, |d| state.completed[d]) {
                continue;
            }
            let mut rec = run.units[idx].lock().await;
            if rec.state == UnitState::Pending {
                self.transition(run, idx, &mut rec, UnitState::Queued, None)
                    .await?;
                state.ready.push_back(idx);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn dispatch_ready(
        &self,
        run: &PlanRun,
        state: &mut LoopState,
        semaphore: &Arc<Semaphore>,
    ) -> Result<(), ExecutorError> {
        if run.is_stopped() {
            while let Some(idx) = state.ready.pop_front() {
                let mut rec = run.units[idx].lock().await;
                if matches!(rec.state, UnitState::Queued | UnitState::Retrying) {
                    self.transition(
                        run,
                        idx,
                        &mut rec,
                        UnitState::Aborted,
                        Some("plan halted".to_string()),
                    )
                    .await?;
                }
            }
            return Ok(());
        }

        while !state.ready.is_empty() {
            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                break;
            };
            let Some(idx) = state.ready.pop_front() else {
                break;
            };
            let inputs = collect_inputs(run, idx).await;

            let mut rec = run.units[idx].lock().await;
            if !matches!(rec.state, UnitState::Queued | UnitState::Retrying) {
                continue;
            }
            let def = &run.defs[idx];

            let admission = def
                .resource
                .as_ref()
                .map(|resource| self.breakers.try_acquire(resource));
            if let Some(Err(open)) = admission {
                let resource = &open.resource;
                self.metrics.emit(
                    metrics::CIRCUIT_REJECTIONS,
                    1.0,
                    &[("resource", resource.as_str())],
                );
                self.transition(
                    run,
                    idx,
                    &mut rec,
                    UnitState::Running,
                    Some(format!("circuit check for '{resource}'")),
                )
                .await?;
                let failure = ExecutionFailure::CircuitOpen {
                    resource: resource.clone(),
                    retry_after_ms: open.retry_after.as_millis() as u64,
                };
                let delay = self.fail_unit(run, idx, &mut rec, failure).await?;
                if !self.settle_failure(run, idx, &mut rec, delay, state).await? {
                    self.on_permanent_failure(run, idx, &rec);
                }
                continue;
            }

            // Dropped unrecorded if the dispatch fails before the worker starts
            let call = def.resource.as_ref().map(|resource| self.breaker_call(resource));

            rec.attempt += 1;
            self.transition(run, idx, &mut rec, UnitState::Running, None)
                .await?;
            state.in_flight += 1;
            let tier = def.risk_tier.to_string();
            self.metrics
                .emit(metrics::UNITS_DISPATCHED, 1.0, &[("risk_tier", tier.as_str())]);
            self.emit_in_flight(run, state.in_flight);

            let ctx = UnitContext {
                plan_id: run.id(),
                unit: def.clone(),
                attempt: rec.attempt,
                inputs,
            };
            drop(rec);

            let timeout_secs = def
                .timeout_secs
                .unwrap_or(self.config.default_unit_timeout_secs);
            self.spawn_unit(idx, ctx, timeout_secs, permit, call, state.tx.clone());
        }
        Ok(())
    }

    fn breaker_call(&self, resource: &str) -> BreakerCall {
        BreakerCall {
            breakers: Arc::clone(&self.breakers),
            metrics: Arc::clone(&self.metrics),
            events: self.events.clone(),
            resource: resource.to_string(),
            recorded: false,
        }
    }

    /// Run one attempt on its own task. The breaker outcome is recorded there,
    /// so it lands even if the scheduler loop has already stopped.
    fn spawn_unit(
        &self,
        idx: usize,
        ctx: UnitContext,
        timeout_secs: u64,
        permit: OwnedSemaphorePermit,
        call: Option<BreakerCall>,
        tx: mpsc::UnboundedSender<LoopEvent>,
    ) {
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            let _permit = permit;
            // Inner task so a panicking worker still reports back
            let task = tokio::spawn(async move {
                tokio::time::timeout(Duration::from_secs(timeout_secs), worker.execute(ctx)).await
            });
            let result = match task.await {
                Ok(Ok(result)) => result,
                Ok(Err(_elapsed)) => Err(ExecutionFailure::Timeout(timeout_secs)),
                Err(e) => Err(ExecutionFailure::Transient(format!("worker task failed: {e}"))),
            };
            if let Some(call) = call {
                call.record(&result);
            }
            let _ = tx.send(LoopEvent::Finished { idx, result });
        });
    }

    fn emit_in_flight(&self, run: &PlanRun, in_flight: usize) {
        let plan_id = run.id().to_string();
        self.metrics.emit(
            metrics::UNITS_IN_FLIGHT,
            in_flight as f64,
            &[("plan_id", plan_id.as_str())],
        );
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    async fn on_finished(
        &self,
        run: &PlanRun,
        state: &mut LoopState,
        idx: usize,
        result: Result<UnitOutput, ExecutionFailure>,
    ) -> Result<(), ExecutorError> {
        state.in_flight = state.in_flight.saturating_sub(1);
        self.emit_in_flight(run, state.in_flight);

        let def = &run.defs[idx];
        let duplicates = match &result {
            Ok(output) => duplicate_artifact_ids(run, idx, &output.artifacts).await,
            Err(_) => Vec::new(),
        };

        let mut rec = run.units[idx].lock().await;
        if rec.state != UnitState::Running {
            // Aborted while in flight: the result is discarded but its
            // artifacts stay on record for a later rollback.
            let late = result.ok().filter(|output| !output.artifacts.is_empty());
            if let Some(output) = late {
                if !duplicates.is_empty() {
                    tracing::warn!(
                        plan_id = %run.id(),
                        unit_id = %def.id,
                        duplicates = ?duplicates,
                        "late result reuses artifact ids"
                    );
                }
                rec.artifacts = applied_artifacts(&def.id, output.artifacts);
                self.write_checkpoint(
                    run,
                    idx,
                    &mut rec,
                    Some("result arrived after abort".to_string()),
                )
                .await?;
            }
            return Ok(());
        }

        let result = match result {
            Ok(output) if !duplicates.is_empty() => {
                tracing::error!(
                    plan_id = %run.id(),
                    unit_id = %def.id,
                    duplicates = ?duplicates,
                    "unit reported artifact ids already in use"
                );
                // Only uniquely addressable artifacts can be rolled back by ID
                let kept = output
                    .artifacts
                    .into_iter()
                    .filter(|spec| !duplicates.contains(&spec.id))
                    .collect();
                rec.artifacts = applied_artifacts(&def.id, kept);
                Err(ExecutionFailure::Validation(format!(
                    "artifact ids already in use: {}",
                    duplicates.join(", ")
                )))
            }
            other => other,
        };

        match result {
            Ok(output) => {
                rec.artifacts = applied_artifacts(&def.id, output.artifacts);
                rec.last_error = None;
                self.transition(run, idx, &mut rec, UnitState::Completed, None)
                    .await?;
                drop(rec);
                state.completed[idx] = true;
                self.promote_dependents(run, state, idx).await?;
            }
            Err(failure) => {
                let delay = self.fail_unit(run, idx, &mut rec, failure).await?;
                if !self.settle_failure(run, idx, &mut rec, delay, state).await? {
                    self.on_permanent_failure(run, idx, &rec);
                }
            }
        }
        Ok(())
    }

    async fn on_retry_due(
        &self,
        run: &PlanRun,
        state: &mut LoopState,
        idx: usize,
    ) -> Result<(), ExecutorError> {
        state.timers = state.timers.saturating_sub(1);
        let mut rec = run.units[idx].lock().await;
        if rec.state != UnitState::Retrying {
            return Ok(());
        }
        if run.is_stopped() {
            self.transition(
                run,
                idx,
                &mut rec,
                UnitState::Aborted,
                Some("plan halted".to_string()),
            )
            .await?;
        } else {
            state.ready.push_back(idx);
        }
        Ok(())
    }

    /// Queue dependents of a completed unit whose dependencies are now all done.
    async fn promote_dependents(
        &self,
        run: &PlanRun,
        state: &mut LoopState,
        idx: usize,
    ) -> Result<(), ExecutorError> {
        if run.is_stopped() {
            return Ok(());
        }
        for &dependent in &run.graph.node(idx).dependents {
            if !run.graph.is_ready(dependent, |d| state.completed[d]) {
                continue;
            }
            let mut rec = run.units[dependent].lock().await;
            if rec.state == UnitState::Pending {
                self.transition(run, dependent, &mut rec, UnitState::Queued, None)
                    .await?;
                state.ready.push_back(dependent);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Failure handling
    // -----------------------------------------------------------------------

    /// Record a failed attempt (RUNNING -> FAILED) and decide on a retry.
    async fn fail_unit(
        &self,
        run: &PlanRun,
        idx: usize,
        rec: &mut UnitRecord,
        failure: ExecutionFailure,
    ) -> Result<Option<Duration>, ExecutorError> {
        let def = &run.defs[idx];
        self.metrics.emit(
            metrics::UNIT_FAILURES,
            1.0,
            &[("class", failure.class())],
        );

        match failure {
            ExecutionFailure::CircuitOpen { .. } => rec.retry.circuit_deferrals += 1,
            _ => rec.retry.attempt_count += 1,
        }
        let message = failure.to_string();
        rec.retry.last_failure = Some(failure.clone());
        rec.last_error = Some(message.clone());
        self.transition(run, idx, rec, UnitState::Failed, Some(message))
            .await?;

        Ok(self.retry_delay(def, &rec.retry, &failure))
    }

    /// Retry delay for a failure, or `None` when it is permanent.
    ///
    /// Open-circuit deferrals are bounded separately and never consume the
    /// retry budget.
    fn retry_delay(
        &self,
        def: &PlanUnitDefinition,
        record: &RetryRecord,
        failure: &ExecutionFailure,
    ) -> Option<Duration> {
        match failure {
            ExecutionFailure::CircuitOpen { retry_after_ms, .. } => {
                (record.circuit_deferrals <= self.config.max_circuit_deferrals)
                    .then(|| Duration::from_millis(*retry_after_ms))
            }
            _ => self.retry.next_delay(def, record, failure),
        }
    }

    /// React to a unit that failed for good, as its rollback trigger demands.
    ///
    /// Phase-level actions halt the plan unless it continues on failure; an
    /// emergency stop halts it regardless and rolls back every phase.
    fn on_permanent_failure(&self, run: &PlanRun, idx: usize, rec: &UnitRecord) {
        let unit_id = run.unit_id(idx);
        let trigger = rec
            .retry
            .last_failure
            .as_ref()
            .map_or(RollbackTrigger::ValidationFailure, trigger_for);
        let action = evaluate_trigger(trigger, RollbackScope::PlanUnit);
        match action {
            RollbackAction::SkipAndContinue => {}
            RollbackAction::EmergencyStopAndRollback => {
                tracing::error!(
                    plan_id = %run.id(),
                    unit_id = %unit_id,
                    ?trigger,
                    "emergency stop after permanent unit failure"
                );
                run.emergency_stop();
            }
            // The retry budget already covered rescheduling
            RollbackAction::RollbackCurrentPhase | RollbackAction::RescheduleWithBackoff => {
                if !run.plan.continue_on_failure {
                    tracing::warn!(
                        plan_id = %run.id(),
                        unit_id = %unit_id,
                        ?trigger,
                        "halting plan after permanent unit failure"
                    );
                    run.halt();
                }
            }
        }
    }

    /// Move a FAILED unit on: schedule its retry, abort it if the plan has
    /// halted, or leave it failed. Returns `false` for a permanent failure.
    async fn settle_failure(
        &self,
        run: &PlanRun,
        idx: usize,
        rec: &mut UnitRecord,
        delay: Option<Duration>,
        state: &mut LoopState,
    ) -> Result<bool, ExecutorError> {
        let unit_id = run.unit_id(idx).to_string();
        let Some(delay) = delay else {
            tracing::warn!(
                plan_id = %run.id(),
                unit_id = %unit_id,
                attempts = rec.retry.attempt_count,
                error = rec.last_error.as_deref().unwrap_or_default(),
                "unit failed permanently"
            );
            return Ok(false);
        };

        if run.is_stopped() {
            self.transition(
                run,
                idx,
                rec,
                UnitState::Aborted,
                Some("plan halted".to_string()),
            )
            .await?;
            return Ok(true);
        }

        let delay_ms = delay.as_millis() as u64;
        rec.retry.last_delay_ms = Some(delay_ms);
        self.transition(
            run,
            idx,
            rec,
            UnitState::Retrying,
            Some(format!("retry in {delay_ms}ms")),
        )
        .await?;
        self.metrics
            .emit(metrics::RETRIES, 1.0, &[("unit_id", unit_id.as_str())]);
        self.events.publish(ExecutorEvent::RetryScheduled {
            plan_id: run.id(),
            unit_id,
            delay_ms,
            attempt_count: rec.retry.attempt_count,
        });

        state.timers += 1;
        let tx = state.tx.clone();
        let stop = run.stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.cancelled() => {}
            }
            let _ = tx.send(LoopEvent::RetryDue { idx });
        });
        Ok(true)
    }

    /// Roll back every phase that holds a permanently failed unit, or the
    /// whole plan after an emergency stop.
    async fn rollback_failed_phases(&self, run: &PlanRun) {
        let Some(_lease) = run.try_begin_rollback() else {
            tracing::warn!(plan_id = %run.id(), "rollback already in progress, skipping automatic rollback");
            return;
        };
        let phases: Vec<usize> = if run.is_escalated() {
            // Every phase, dependents' phases first
            let mut phases = Vec::new();
            for &idx in run.graph.topological_order().iter().rev() {
                let phase = run.graph.node(idx).phase;
                if !phases.contains(&phase) {
                    phases.push(phase);
                }
            }
            phases
        } else {
            let records = run.snapshot().await;
            let mut phases: Vec<usize> = records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.state == UnitState::Failed)
                .map(|(idx, _)| run.graph.node(idx).phase)
                .collect();
            phases.sort_unstable();
            phases.dedup();
            phases
        };

        for phase in phases {
            let phase_id = run.graph.phase_ids()[phase].clone();
            tracing::info!(plan_id = %run.id(), phase_id = %phase_id, "rolling back failed phase");
            if let Err(e) = self
                .run_rollback(run, RollbackGranularity::Phase, &phase_id)
                .await
            {
                tracing::error!(plan_id = %run.id(), phase_id = %phase_id, error = %e, "automatic rollback failed");
                run.set_fatal(e.to_string());
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Validate, persist, then apply a state change.
    ///
    /// The checkpoint is written before the new state becomes visible; an
    /// invalid edge or a failed write leaves the unit untouched.
    pub(super) async fn transition(
        &self,
        run: &PlanRun,
        idx: usize,
        rec: &mut UnitRecord,
        to: UnitState,
        reason: Option<String>,
    ) -> Result<(), ExecutorError> {
        let from = rec.state;
        let unit_id = run.unit_id(idx);
        check_transition(unit_id, from, to)?;

        let seq = self.persist(run, idx, rec, to, reason).await?;
        rec.seq = seq;
        rec.state = to;

        tracing::debug!(
            plan_id = %run.id(),
            unit_id = %unit_id,
            from = %from,
            to = %to,
            attempt = rec.attempt,
            "unit transition"
        );
        self.events.publish(ExecutorEvent::UnitTransitioned {
            plan_id: run.id(),
            unit_id: unit_id.to_string(),
            from,
            to,
            attempt: rec.attempt,
        });
        Ok(())
    }

    /// Checkpoint the unit's current record without changing its state.
    pub(super) async fn write_checkpoint(
        &self,
        run: &PlanRun,
        idx: usize,
        rec: &mut UnitRecord,
        reason: Option<String>,
    ) -> Result<(), ExecutorError> {
        rec.seq = self.persist(run, idx, rec, rec.state, reason).await?;
        Ok(())
    }

    async fn persist(
        &self,
        run: &PlanRun,
        idx: usize,
        rec: &UnitRecord,
        state: UnitState,
        reason: Option<String>,
    ) -> Result<u64, ExecutorError> {
        let checkpoint = Checkpoint {
            plan_id: run.id(),
            unit_id: run.unit_id(idx).to_string(),
            seq: rec.seq + 1,
            state,
            attempt: rec.attempt,
            retry: rec.retry.clone(),
            artifact_refs: rec.artifacts.clone(),
            reason,
            timestamp: Utc::now(),
        };
        if self.store.record(&checkpoint).await? {
            self.metrics.emit(metrics::CHECKPOINTS_WRITTEN, 1.0, &[]);
        }
        Ok(checkpoint.seq)
    }
}

/// A call admitted by a resource's circuit breaker.
///
/// Dropping it without an outcome frees the half-open probe slot it may hold.
struct BreakerCall {
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<dyn MetricsSink>,
    events: EventBus,
    resource: String,
    recorded: bool,
}

impl BreakerCall {
    fn record(mut self, result: &Result<UnitOutput, ExecutionFailure>) {
        let resource = self.resource.as_str();
        match result {
            Ok(_) => self.breakers.record_success(resource),
            // The worker never reached the resource
            Err(ExecutionFailure::CircuitOpen { .. }) => return,
            Err(_) => {
                if self.breakers.record_failure(resource) {
                    self.metrics
                        .emit(metrics::CIRCUIT_TRIPS, 1.0, &[("resource", resource)]);
                    self.events.publish(ExecutorEvent::CircuitOpened {
                        resource: resource.to_string(),
                    });
                }
            }
        }
        self.recorded = true;
    }
}

impl Drop for BreakerCall {
    fn drop(&mut self) {
        if !self.recorded {
            self.breakers.release(&self.resource);
        }
    }
}

/// Artifacts of the unit's direct dependencies, all of which are completed.
async fn collect_inputs(run: &PlanRun, idx: usize) -> Vec<Artifact> {
    let mut inputs = Vec::new();
    for &dep in &run.graph.node(idx).deps {
        let rec = run.units[dep].lock().await;
        if rec.state == UnitState::Completed {
            inputs.extend(
                rec.artifacts
                    .iter()
                    .filter(|a| a.status == ArtifactStatus::Applied)
                    .cloned(),
            );
        }
    }
    inputs
}

/// Artifact IDs in `specs` that another unit of the plan already owns or
/// that `specs` repeats.
async fn duplicate_artifact_ids(run: &PlanRun, idx: usize, specs: &[ArtifactSpec]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();
    for spec in specs {
        if !seen.insert(spec.id.as_str()) && !duplicates.contains(&spec.id) {
            duplicates.push(spec.id.clone());
        }
    }
    for (other, unit) in run.units.iter().enumerate() {
        if other == idx {
            continue;
        }
        let rec = unit.lock().await;
        for artifact in &rec.artifacts {
            if seen.contains(artifact.id.as_str()) && !duplicates.contains(&artifact.id) {
                duplicates.push(artifact.id.clone());
            }
        }
    }
    duplicates
}

fn applied_artifacts(unit_id: &str, specs: Vec<ArtifactSpec>) -> Vec<Artifact> {
    specs
        .into_iter()
        .enumerate()
        .map(|(sequence, spec)| Artifact::applied(spec, unit_id, sequence as u32))
        .collect()
}
