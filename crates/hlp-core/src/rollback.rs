//! Partial rollback: artifact compensation with bounded retry.
//!
//! The manager undoes artifacts through the compensator registered for their
//! type. Each compensation is retried with the owning unit's retry policy;
//! once that is exhausted the artifact is marked `rollback_failed` and the
//! rollback carries on with the next artifact. Unit state changes and
//! ordering across units are driven by the executor.

use std::sync::Arc;

use hlp_types::artifact::{Artifact, ArtifactStatus};
use hlp_types::failure::ExecutionFailure;
use hlp_types::plan::RiskTier;
use hlp_types::rollback::{
    RollbackAction, RollbackFailure, RollbackReport, RollbackScope, RollbackTrigger,
};

use crate::compensator::{CompensationOutcome, CompensatorRegistry};
use crate::metrics::{self, MetricsSink};
use crate::retry::RetryPolicyEngine;

/// Compensates artifacts and records the outcome in a [`RollbackReport`].
pub struct RollbackManager {
    compensators: Arc<CompensatorRegistry>,
    retry: RetryPolicyEngine,
    metrics: Arc<dyn MetricsSink>,
}

impl RollbackManager {
    pub fn new(
        compensators: Arc<CompensatorRegistry>,
        retry: RetryPolicyEngine,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            compensators,
            retry,
            metrics,
        }
    }

    /// Compensate every outstanding artifact of one unit, newest first.
    pub async fn compensate_unit(
        &self,
        artifacts: &mut [Artifact],
        tier: RiskTier,
        seed: u64,
        report: &mut RollbackReport,
    ) {
        let mut order: Vec<usize> = (0..artifacts.len()).collect();
        order.sort_by(|&a, &b| artifacts[b].sequence.cmp(&artifacts[a].sequence));
        for idx in order {
            self.compensate_artifact(&mut artifacts[idx], tier, seed, report)
                .await;
        }
    }

    /// Compensate a single artifact, updating its status in place.
    pub async fn compensate_artifact(
        &self,
        artifact: &mut Artifact,
        tier: RiskTier,
        seed: u64,
        report: &mut RollbackReport,
    ) {
        if !artifact.needs_compensation() {
            report.skipped.push(artifact.id.clone());
            return;
        }

        let Some(compensator) = self.compensators.get(&artifact.artifact_type) else {
            let error = format!(
                "no compensator registered for artifact type '{}'",
                artifact.artifact_type
            );
            self.give_up(artifact, error, report);
            return;
        };

        let max_attempts = self.retry.max_attempts(tier).max(1);
        let mut failures = 0u32;
        loop {
            match compensator.compensate(artifact).await {
                Ok(CompensationOutcome::Undone) => {
                    artifact.status = ArtifactStatus::Compensated;
                    artifact.error = None;
                    report.succeeded.push(artifact.id.clone());
                    self.emit(artifact, "compensated");
                    tracing::info!(
                        artifact_id = %artifact.id,
                        unit_id = %artifact.unit_id,
                        attempts = failures + 1,
                        "artifact compensated"
                    );
                    return;
                }
                Ok(CompensationOutcome::AlreadyAbsent) => {
                    artifact.status = ArtifactStatus::Absent;
                    artifact.error = None;
                    report.skipped.push(artifact.id.clone());
                    self.emit(artifact, "absent");
                    return;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= max_attempts {
                        self.give_up(artifact, e.to_string(), report);
                        return;
                    }
                    let delay = self.retry.delay_for(tier, failures, seed);
                    tracing::warn!(
                        artifact_id = %artifact.id,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "compensation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn give_up(&self, artifact: &mut Artifact, error: String, report: &mut RollbackReport) {
        tracing::error!(
            artifact_id = %artifact.id,
            unit_id = %artifact.unit_id,
            error = %error,
            "artifact rollback failed"
        );
        artifact.status = ArtifactStatus::RollbackFailed;
        artifact.error = Some(error.clone());
        report.failed.push(RollbackFailure {
            artifact_id: artifact.id.clone(),
            unit_id: artifact.unit_id.clone(),
            error,
        });
        self.emit(artifact, "failed");
    }

    fn emit(&self, artifact: &Artifact, outcome: &str) {
        self.metrics.emit(
            metrics::ROLLBACK_ARTIFACTS,
            1.0,
            &[
                ("artifact_type", artifact.artifact_type.as_str()),
                ("outcome", outcome),
            ],
        );
    }
}

/// Trigger raised by a unit whose failure is permanent.
pub fn trigger_for(failure: &ExecutionFailure) -> RollbackTrigger {
    match failure {
        ExecutionFailure::Validation(_) => RollbackTrigger::ValidationFailure,
        ExecutionFailure::Timeout(_) => RollbackTrigger::Timeout,
        ExecutionFailure::Transient(_) | ExecutionFailure::CircuitOpen { .. } => {
            RollbackTrigger::ResourceExhaustion
        }
    }
}

/// Recommended response to a rollback trigger raised at `scope`.
///
/// Unknown combinations default to an emergency stop.
pub fn evaluate_trigger(trigger: RollbackTrigger, scope: RollbackScope) -> RollbackAction {
    use RollbackAction::*;

    let action = match (trigger, scope) {
        (RollbackTrigger::ValidationFailure, RollbackScope::Phase | RollbackScope::PlanUnit) => {
            RollbackCurrentPhase
        }
        (RollbackTrigger::ValidationFailure, RollbackScope::Artifact) => SkipAndContinue,
        (
            RollbackTrigger::ResourceExhaustion,
            RollbackScope::Phase | RollbackScope::PlanUnit | RollbackScope::Artifact,
        ) => RescheduleWithBackoff,
        (RollbackTrigger::SecurityViolation, _) => EmergencyStopAndRollback,
        _ => EmergencyStopAndRollback,
    };
    tracing::debug!(?trigger, ?scope, ?action, "evaluated rollback trigger");
    action
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use hlp_types::artifact::ArtifactSpec;
    use hlp_types::config::RetryPolicyConfig;
    use hlp_types::rollback::RollbackGranularity;
    use uuid::Uuid;

    use crate::compensator::{CompensationError, Compensator};
    use crate::metrics::RecordingMetrics;

    /// Fails `fail_first` times, then succeeds.
    struct Flaky {
        fail_first: u32,
        calls: Arc<AtomicU32>,
    }

    impl Compensator for Flaky {
        async fn compensate(
            &self,
            _artifact: &Artifact,
        ) -> Result<CompensationOutcome, CompensationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(CompensationError(format!("attempt {n} failed")))
            } else {
                Ok(CompensationOutcome::Undone)
            }
        }
    }

    struct Gone;

    impl Compensator for Gone {
        async fn compensate(
            &self,
            _artifact: &Artifact,
        ) -> Result<CompensationOutcome, CompensationError> {
            Ok(CompensationOutcome::AlreadyAbsent)
        }
    }

    fn manager(registry: CompensatorRegistry) -> (RollbackManager, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::new());
        let retry = RetryPolicyEngine::new(RetryPolicyConfig {
            base_delay_ms: 10,
            ..RetryPolicyConfig::default()
        });
        (
            RollbackManager::new(Arc::new(registry), retry, metrics.clone()),
            metrics,
        )
    }

    fn report() -> RollbackReport {
        RollbackReport::new(Uuid::now_v7(), RollbackGranularity::Unit, "u")
    }

    fn artifacts(types: &[&str]) -> Vec<Artifact> {
        types
            .iter()
            .enumerate()
            .map(|(i, t)| Artifact::applied(ArtifactSpec::new(format!("art-{i}"), *t), "u", i as u32))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn compensates_in_reverse_creation_order() {
        let mut registry = CompensatorRegistry::new();
        registry.register(
            "file",
            Flaky {
                fail_first: 0,
                calls: Arc::new(AtomicU32::new(0)),
            },
        );
        let (manager, _) = manager(registry);
        let mut arts = artifacts(&["file", "file", "file"]);
        let mut report = report();

        manager
            .compensate_unit(&mut arts, RiskTier::Medium, 1, &mut report)
            .await;

        assert_eq!(report.succeeded, vec!["art-2", "art-1", "art-0"]);
        assert!(arts.iter().all(|a| a.status == ArtifactStatus::Compensated));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_compensation_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = CompensatorRegistry::new();
        registry.register(
            "file",
            Flaky {
                fail_first: 2,
                calls: calls.clone(),
            },
        );
        let (manager, metrics) = manager(registry);
        let mut arts = artifacts(&["file"]);
        let mut report = report();

        manager
            .compensate_artifact(&mut arts[0], RiskTier::Low, 1, &mut report)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(report.is_clean());
        assert_eq!(metrics.total(metrics::ROLLBACK_ARTIFACTS), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_compensation_is_recorded_and_rollback_continues() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = CompensatorRegistry::new();
        registry.register(
            "db",
            Flaky {
                fail_first: u32::MAX,
                calls: calls.clone(),
            },
        );
        registry.register("file", Gone);
        let (manager, _) = manager(registry);
        let mut arts = artifacts(&["file", "db"]);
        let mut report = report();

        manager
            .compensate_unit(&mut arts, RiskTier::Critical, 1, &mut report)
            .await;

        // CRITICAL allows two attempts
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].artifact_id, "art-1");
        assert_eq!(arts[1].status, ArtifactStatus::RollbackFailed);
        assert!(arts[1].error.is_some());
        assert_eq!(report.skipped, vec!["art-0"]);
        assert_eq!(arts[0].status, ArtifactStatus::Absent);
    }

    #[tokio::test]
    async fn missing_compensator_fails_artifact() {
        let (manager, _) = manager(CompensatorRegistry::new());
        let mut arts = artifacts(&["bucket"]);
        let mut report = report();
        manager
            .compensate_artifact(&mut arts[0], RiskTier::Low, 1, &mut report)
            .await;
        assert!(report.failed[0].error.contains("no compensator"));
    }

    #[tokio::test]
    async fn already_compensated_is_skipped() {
        let (manager, _) = manager(CompensatorRegistry::new());
        let mut arts = artifacts(&["file"]);
        arts[0].status = ArtifactStatus::Compensated;
        let mut report = report();
        manager
            .compensate_artifact(&mut arts[0], RiskTier::Low, 1, &mut report)
            .await;
        assert_eq!(report.skipped, vec!["art-0"]);
        assert!(report.succeeded.is_empty());
    }

    #[test]
    fn trigger_mapping() {
        assert_eq!(
            evaluate_trigger(RollbackTrigger::ValidationFailure, RollbackScope::PlanUnit),
            RollbackAction::RollbackCurrentPhase
        );
        assert_eq!(
            evaluate_trigger(RollbackTrigger::ValidationFailure, RollbackScope::Artifact),
            RollbackAction::SkipAndContinue
        );
        assert_eq!(
            evaluate_trigger(RollbackTrigger::ResourceExhaustion, RollbackScope::Phase),
            RollbackAction::RescheduleWithBackoff
        );
        assert_eq!(
            evaluate_trigger(RollbackTrigger::SecurityViolation, RollbackScope::Artifact),
            RollbackAction::EmergencyStopAndRollback
        );
        assert_eq!(
            evaluate_trigger(RollbackTrigger::Timeout, RollbackScope::Phase),
            RollbackAction::EmergencyStopAndRollback
        );
    }

    #[test]
    fn failures_map_to_triggers() {
        assert_eq!(
            trigger_for(&ExecutionFailure::Validation("bad".into())),
            RollbackTrigger::ValidationFailure
        );
        assert_eq!(trigger_for(&ExecutionFailure::Timeout(3)), RollbackTrigger::Timeout);
        assert_eq!(
            trigger_for(&ExecutionFailure::Transient("reset".into())),
            RollbackTrigger::ResourceExhaustion
        );
        assert_eq!(
            trigger_for(&ExecutionFailure::CircuitOpen {
                resource: "db".into(),
                retry_after_ms: 10,
            }),
            RollbackTrigger::ResourceExhaustion
        );
    }
}
