//! Built-in worker and compensator used by `hlpx run`.
//!
//! Units do no real work. Each unit's `payload` scripts what the attempt
//! reports, which makes plans runnable end to end without a backend:
//!
//! ```yaml
//! payload:
//!   sleep_ms: 250
//!   artifacts:
//!     - id: web-config
//!       artifact_type: file
//!   fail: transient      # or validation
//!   fail_attempts: 1     # fail only the first attempt (omit to always fail)
//! ```
//!
//! An artifact whose `reference` contains `"compensate": "fail"` or
//! `"compensate": "absent"` drives the compensator the same way.

use std::time::Duration;

use hlp_core::compensator::{CompensationError, CompensationOutcome, Compensator};
use hlp_core::worker::{UnitContext, UnitOutput, UnitWorker};
use hlp_types::artifact::{Artifact, ArtifactSpec};
use hlp_types::failure::ExecutionFailure;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SimulatedFailure {
    Transient,
    Validation,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UnitScript {
    sleep_ms: u64,
    artifacts: Vec<ArtifactSpec>,
    fail: Option<SimulatedFailure>,
    fail_attempts: Option<u32>,
}

impl UnitScript {
    fn from_payload(payload: &serde_json::Value) -> Result<Self, ExecutionFailure> {
        if payload.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| ExecutionFailure::Validation(format!("invalid unit payload: {e}")))
    }

    fn failure_for(&self, attempt: u32) -> Option<ExecutionFailure> {
        let kind = self.fail?;
        if self.fail_attempts.is_some_and(|n| attempt > n) {
            return None;
        }
        let message = format!("simulated failure on attempt {attempt}");
        Some(match kind {
            SimulatedFailure::Transient => ExecutionFailure::Transient(message),
            SimulatedFailure::Validation => ExecutionFailure::Validation(message),
        })
    }
}

/// Executes units according to their payload script.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedWorker;

impl UnitWorker for SimulatedWorker {
    async fn execute(&self, ctx: UnitContext) -> Result<UnitOutput, ExecutionFailure> {
        let script = UnitScript::from_payload(&ctx.unit.payload)?;
        tracing::debug!(
            plan_id = %ctx.plan_id,
            unit_id = %ctx.unit.id,
            attempt = ctx.attempt,
            inputs = ctx.inputs.len(),
            "simulating unit"
        );

        if script.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.sleep_ms)).await;
        }
        if let Some(failure) = script.failure_for(ctx.attempt) {
            return Err(failure);
        }
        Ok(UnitOutput::with_artifacts(script.artifacts))
    }
}

/// Logs every compensation. Honors `reference.compensate` overrides.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCompensator;

impl Compensator for LoggingCompensator {
    async fn compensate(
        &self,
        artifact: &Artifact,
    ) -> Result<CompensationOutcome, CompensationError> {
        let mode = artifact
            .reference
            .get("compensate")
            .and_then(|v| v.as_str())
            .unwrap_or("undo");
        match mode {
            "fail" => Err(CompensationError(format!(
                "simulated compensation failure for '{}'",
                artifact.id
            ))),
            "absent" => Ok(CompensationOutcome::AlreadyAbsent),
            _ => {
                tracing::info!(
                    artifact_id = %artifact.id,
                    artifact_type = %artifact.artifact_type,
                    unit_id = %artifact.unit_id,
                    "compensated artifact"
                );
                Ok(CompensationOutcome::Undone)
            }
        }
    }
}
