//! Unit worker port: the thing that actually performs a plan-unit.
//!
//! Follows the same blanket-impl pattern as the other ports:
//! 1. `UnitWorker` uses native async fn in traits (RPITIT)
//! 2. `UnitWorkerDyn` is the object-safe twin with boxed futures
//! 3. `BoxUnitWorker` wraps `Box<dyn UnitWorkerDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use hlp_types::artifact::{Artifact, ArtifactSpec};
use hlp_types::failure::ExecutionFailure;
use hlp_types::plan::PlanUnitDefinition;
use uuid::Uuid;

/// Everything a worker gets for one attempt.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub plan_id: Uuid,
    pub unit: PlanUnitDefinition,
    /// 1-based dispatch count for this unit.
    pub attempt: u32,
    /// Artifacts of completed upstream units.
    pub inputs: Vec<Artifact>,
}

/// What a successful attempt produced, in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOutput {
    pub artifacts: Vec<ArtifactSpec>,
}

impl UnitOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_artifacts(artifacts: Vec<ArtifactSpec>) -> Self {
        Self { artifacts }
    }
}

/// Executes plan-units.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait UnitWorker: Send + Sync {
    fn execute(
        &self,
        ctx: UnitContext,
    ) -> impl Future<Output = Result<UnitOutput, ExecutionFailure>> + Send;
}

/// Object-safe version of [`UnitWorker`] with boxed futures.
pub trait UnitWorkerDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        ctx: UnitContext,
    ) -> Pin<Box<dyn Future<Output = Result<UnitOutput, ExecutionFailure>> + Send + 'a>>;
}

impl<T: UnitWorker> UnitWorkerDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        ctx: UnitContext,
    ) -> Pin<Box<dyn Future<Output = Result<UnitOutput, ExecutionFailure>> + Send + 'a>> {
        Box::pin(self.execute(ctx))
    }
}

/// Type-erased worker, so executors are not generic over the worker type.
pub struct BoxUnitWorker {
    inner: Box<dyn UnitWorkerDyn + Send + Sync>,
}

impl BoxUnitWorker {
    pub fn new<T: UnitWorker + 'static>(worker: T) -> Self {
        Self {
            inner: Box::new(worker),
        }
    }

    pub async fn execute(&self, ctx: UnitContext) -> Result<UnitOutput, ExecutionFailure> {
        self.inner.execute_boxed(ctx).await
    }
}

impl std::fmt::Debug for BoxUnitWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxUnitWorker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoWorker;

    impl UnitWorker for EchoWorker {
        async fn execute(&self, ctx: UnitContext) -> Result<UnitOutput, ExecutionFailure> {
            if ctx.unit.id == "bad" {
                return Err(ExecutionFailure::Validation("bad unit".to_string()));
            }
            Ok(UnitOutput::with_artifacts(vec![ArtifactSpec::new(
                format!("{}-out", ctx.unit.id),
                "file",
            )]))
        }
    }

    fn ctx(id: &str) -> UnitContext {
        UnitContext {
            plan_id: Uuid::now_v7(),
            unit: serde_json::from_value(serde_json::json!({ "id": id })).unwrap(),
            attempt: 1,
            inputs: vec![],
        }
    }

    #[tokio::test]
    async fn boxed_worker_delegates() {
        let worker = BoxUnitWorker::new(EchoWorker);
        let out = worker.execute(ctx("a")).await.unwrap();
        assert_eq!(out.artifacts[0].id, "a-out");

        let err = worker.execute(ctx("bad")).await.unwrap_err();
        assert_eq!(err.class(), "validation");
    }
}
