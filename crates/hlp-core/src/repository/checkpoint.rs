//! Checkpoint repository trait definition.
//!
//! Defines the storage interface for submitted plans and their append-only
//! checkpoint log. The infrastructure layer (hlp-infra) implements this trait
//! with compressed SQLite persistence.

use hlp_types::checkpoint::{Checkpoint, CheckpointKey, CheckpointStats};
use hlp_types::error::RepositoryError;
use hlp_types::plan::{Plan, PlanSummary};
use uuid::Uuid;

/// Repository trait for plan and checkpoint persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Plans
    // -----------------------------------------------------------------------

    /// Upsert a plan definition (insert or replace by ID).
    fn save_plan(
        &self,
        plan: &Plan,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a plan definition by its UUID.
    fn get_plan(
        &self,
        plan_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Plan>, RepositoryError>> + Send;

    /// List stored plans, newest first.
    fn list_plans(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PlanSummary>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Append a checkpoint. Returns `false` (and changes nothing) when a
    /// checkpoint with the same `(plan_id, unit_id, seq)` already exists.
    fn append_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All checkpoints of a plan, ordered by unit ID then sequence.
    fn list_checkpoints(
        &self,
        plan_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Identity and timestamp of every stored checkpoint (for retention).
    fn list_checkpoint_keys(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<CheckpointKey>, RepositoryError>> + Send;

    /// Delete the given checkpoints. Returns the number removed.
    fn delete_checkpoints(
        &self,
        keys: &[CheckpointKey],
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Storage statistics.
    fn stats(
        &self,
    ) -> impl std::future::Future<Output = Result<CheckpointStats, RepositoryError>> + Send;
}
