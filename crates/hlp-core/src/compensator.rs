//! Compensator port and the registry that maps artifact types to compensators.
//!
//! A compensator undoes one artifact. It must be idempotent: compensating an
//! artifact that is already gone reports [`CompensationOutcome::AlreadyAbsent`]
//! instead of failing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use hlp_types::artifact::Artifact;
use thiserror::Error;

/// Successful compensation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    Undone,
    AlreadyAbsent,
}

/// A compensation attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compensation failed: {0}")]
pub struct CompensationError(pub String);

/// Undoes artifacts of one type.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait Compensator: Send + Sync {
    fn compensate(
        &self,
        artifact: &Artifact,
    ) -> impl Future<Output = Result<CompensationOutcome, CompensationError>> + Send;
}

/// Object-safe version of [`Compensator`] with boxed futures.
pub trait CompensatorDyn: Send + Sync {
    fn compensate_boxed<'a>(
        &'a self,
        artifact: &'a Artifact,
    ) -> Pin<Box<dyn Future<Output = Result<CompensationOutcome, CompensationError>> + Send + 'a>>;
}

impl<T: Compensator> CompensatorDyn for T {
    fn compensate_boxed<'a>(
        &'a self,
        artifact: &'a Artifact,
    ) -> Pin<Box<dyn Future<Output = Result<CompensationOutcome, CompensationError>> + Send + 'a>>
    {
        Box::pin(self.compensate(artifact))
    }
}

/// Type-erased compensator.
pub struct BoxCompensator {
    inner: Box<dyn CompensatorDyn + Send + Sync>,
}

impl BoxCompensator {
    pub fn new<T: Compensator + 'static>(compensator: T) -> Self {
        Self {
            inner: Box::new(compensator),
        }
    }

    pub async fn compensate(
        &self,
        artifact: &Artifact,
    ) -> Result<CompensationOutcome, CompensationError> {
        self.inner.compensate_boxed(artifact).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Compensators keyed by `artifact_type`, with an optional catch-all.
#[derive(Default)]
pub struct CompensatorRegistry {
    by_type: HashMap<String, BoxCompensator>,
    fallback: Option<BoxCompensator>,
}

impl CompensatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the compensator for an artifact type, replacing any previous one.
    pub fn register<T: Compensator + 'static>(
        &mut self,
        artifact_type: impl Into<String>,
        compensator: T,
    ) -> &mut Self {
        self.by_type
            .insert(artifact_type.into(), BoxCompensator::new(compensator));
        self
    }

    /// Compensator used for types with no registered entry.
    pub fn set_fallback<T: Compensator + 'static>(&mut self, compensator: T) -> &mut Self {
        self.fallback = Some(BoxCompensator::new(compensator));
        self
    }

    pub fn get(&self, artifact_type: &str) -> Option<&BoxCompensator> {
        self.by_type.get(artifact_type).or(self.fallback.as_ref())
    }

    pub fn artifact_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_type.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for CompensatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensatorRegistry")
            .field("artifact_types", &self.artifact_types())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlp_types::artifact::ArtifactSpec;

    struct Fixed(CompensationOutcome);

    impl Compensator for Fixed {
        async fn compensate(
            &self,
            _artifact: &Artifact,
        ) -> Result<CompensationOutcome, CompensationError> {
            Ok(self.0)
        }
    }

    fn artifact(artifact_type: &str) -> Artifact {
        Artifact::applied(ArtifactSpec::new("x", artifact_type), "u", 0)
    }

    #[tokio::test]
    async fn lookup_by_type_then_fallback() {
        let mut registry = CompensatorRegistry::new();
        registry.register("file", Fixed(CompensationOutcome::Undone));
        assert!(registry.get("bucket").is_none());

        registry.set_fallback(Fixed(CompensationOutcome::AlreadyAbsent));
        let file = registry.get("file").unwrap();
        assert_eq!(
            file.compensate(&artifact("file")).await.unwrap(),
            CompensationOutcome::Undone
        );
        let other = registry.get("bucket").unwrap();
        assert_eq!(
            other.compensate(&artifact("bucket")).await.unwrap(),
            CompensationOutcome::AlreadyAbsent
        );
        assert_eq!(registry.artifact_types(), vec!["file"]);
    }
}
