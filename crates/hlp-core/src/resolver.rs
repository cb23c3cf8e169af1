//! Semantic dependency resolver port.
//!
//! An optional backend (e.g. a knowledge graph) can contribute extra
//! dependencies for units that carry a `dependency_query`. The executor treats
//! it as advisory: errors, timeouts, unknown IDs and induced cycles all fall
//! back to the statically declared dependencies.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency resolution failed: {0}")]
pub struct ResolverError(pub String);

/// Resolves a semantic query to a list of unit IDs the querying unit depends on.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait DependencyResolver: Send + Sync {
    fn resolve(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<Vec<String>, ResolverError>> + Send;
}

/// Object-safe version of [`DependencyResolver`] with boxed futures.
pub trait DependencyResolverDyn: Send + Sync {
    fn resolve_boxed<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ResolverError>> + Send + 'a>>;
}

impl<T: DependencyResolver> DependencyResolverDyn for T {
    fn resolve_boxed<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ResolverError>> + Send + 'a>> {
        Box::pin(self.resolve(query))
    }
}

/// Type-erased resolver.
pub struct BoxDependencyResolver {
    inner: Box<dyn DependencyResolverDyn + Send + Sync>,
}

impl BoxDependencyResolver {
    pub fn new<T: DependencyResolver + 'static>(resolver: T) -> Self {
        Self {
            inner: Box::new(resolver),
        }
    }

    pub async fn resolve(&self, query: &str) -> Result<Vec<String>, ResolverError> {
        self.inner.resolve_boxed(query).await
    }
}

impl std::fmt::Debug for BoxDependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDependencyResolver").finish_non_exhaustive()
    }
}
