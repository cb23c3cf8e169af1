//! Durable checkpoint manager for plan execution state.
//!
//! Wraps a `CheckpointRepository` to provide a higher-level API: record unit
//! transitions, replay the log into per-unit snapshots after a restart, and
//! apply the retention policy.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use hlp_types::checkpoint::{Checkpoint, CheckpointKey, CheckpointStats, RetentionPolicy};
use hlp_types::plan::{Plan, PlanSummary};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::checkpoint::CheckpointRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints for plans.
///
/// Generic over `R: CheckpointRepository` so it works with any storage backend
/// (SQLite, in-memory). Every unit transition is persisted here before the
/// scheduler makes it visible.
pub struct CheckpointManager<R: CheckpointRepository> {
    repo: R,
}

impl<R: CheckpointRepository> CheckpointManager<R> {
    /// Create a new checkpoint manager backed by the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Plans
    // -----------------------------------------------------------------------

    /// Persist a submitted plan so it can be resumed later.
    pub async fn save_plan(&self, plan: &Plan) -> Result<(), CheckpointError> {
        self.repo
            .save_plan(plan)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(plan_id = %plan.id, name = %plan.name, "saved plan definition");
        Ok(())
    }

    /// Load a plan, failing if it was never submitted.
    pub async fn load_plan(&self, plan_id: Uuid) -> Result<Plan, CheckpointError> {
        self.repo
            .get_plan(&plan_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::PlanNotFound(plan_id))
    }

    pub async fn list_plans(&self) -> Result<Vec<PlanSummary>, CheckpointError> {
        self.repo
            .list_plans()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Record one unit transition. Returns `false` if the same checkpoint was
    /// already stored (an idempotent rewrite).
    ///
    /// A different checkpoint already stored under the same
    /// `(plan_id, unit_id, seq)` is a [`CheckpointError::Conflict`]; the stored
    /// row is left untouched.
    pub async fn record(&self, checkpoint: &Checkpoint) -> Result<bool, CheckpointError> {
        let inserted = self
            .repo
            .append_checkpoint(checkpoint)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        if !inserted {
            let stored = self
                .history(checkpoint.plan_id)
                .await?
                .into_iter()
                .find(|cp| cp.unit_id == checkpoint.unit_id && cp.seq == checkpoint.seq);
            if !stored.is_some_and(|cp| same_transition(&cp, checkpoint)) {
                tracing::error!(
                    plan_id = %checkpoint.plan_id,
                    unit_id = %checkpoint.unit_id,
                    seq = checkpoint.seq,
                    "checkpoint conflicts with the stored one"
                );
                return Err(CheckpointError::Conflict {
                    plan_id: checkpoint.plan_id,
                    unit_id: checkpoint.unit_id.clone(),
                    seq: checkpoint.seq,
                });
            }
        }

        tracing::debug!(
            plan_id = %checkpoint.plan_id,
            unit_id = %checkpoint.unit_id,
            seq = checkpoint.seq,
            state = %checkpoint.state,
            attempt = checkpoint.attempt,
            inserted,
            "checkpointed unit transition"
        );

        Ok(inserted)
    }

    /// Full checkpoint log of a plan.
    pub async fn history(&self, plan_id: Uuid) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.repo
            .list_checkpoints(&plan_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Latest checkpoint of every unit that has one.
    pub async fn replay(
        &self,
        plan_id: Uuid,
    ) -> Result<HashMap<String, Checkpoint>, CheckpointError> {
        let log = self.history(plan_id).await?;
        Ok(replay_checkpoints(log))
    }

    /// Delete checkpoints outside the retention policy. Returns the number removed.
    pub async fn prune(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<u64, CheckpointError> {
        let keys = self
            .repo
            .list_checkpoint_keys()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        let doomed = select_prunable(keys, policy, now);
        if doomed.is_empty() {
            return Ok(0);
        }
        let removed = self
            .repo
            .delete_checkpoints(&doomed)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::info!(removed, "pruned checkpoints");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CheckpointStats, CheckpointError> {
        self.repo
            .stats()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

/// Equal in everything but the write timestamp.
fn same_transition(a: &Checkpoint, b: &Checkpoint) -> bool {
    a.plan_id == b.plan_id
        && a.unit_id == b.unit_id
        && a.seq == b.seq
        && a.state == b.state
        && a.attempt == b.attempt
        && a.retry == b.retry
        && a.artifact_refs == b.artifact_refs
        && a.reason == b.reason
}

// ---------------------------------------------------------------------------
// Replay and retention
// ---------------------------------------------------------------------------

/// Fold a checkpoint log into the latest checkpoint per unit.
///
/// Order of the input does not matter and duplicates collapse, so replaying
/// the same log any number of times gives the same result.
pub fn replay_checkpoints(
    log: impl IntoIterator<Item = Checkpoint>,
) -> HashMap<String, Checkpoint> {
    let mut latest: HashMap<String, Checkpoint> = HashMap::new();
    for checkpoint in log {
        match latest.get(&checkpoint.unit_id) {
            Some(existing) if existing.seq >= checkpoint.seq => {}
            _ => {
                latest.insert(checkpoint.unit_id.clone(), checkpoint);
            }
        }
    }
    latest
}

/// Pick the checkpoints a retention policy removes.
///
/// Per unit, a checkpoint is pruned when it is older than `max_age_days` or
/// falls outside the newest `max_count`. The newest checkpoint of each unit is
/// never pruned.
pub fn select_prunable(
    keys: Vec<CheckpointKey>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<CheckpointKey> {
    let cutoff = now - chrono::Duration::days(i64::from(policy.max_age_days));
    let keep_count = policy.max_count.max(1);

    let mut per_unit: BTreeMap<(Uuid, String), Vec<CheckpointKey>> = BTreeMap::new();
    for key in keys {
        per_unit
            .entry((key.plan_id, key.unit_id.clone()))
            .or_default()
            .push(key);
    }

    let mut doomed = Vec::new();
    for (_, mut unit_keys) in per_unit {
        unit_keys.sort_by(|a, b| b.seq.cmp(&a.seq));
        for (rank, key) in unit_keys.into_iter().enumerate() {
            if rank == 0 {
                continue;
            }
            if rank >= keep_count || key.timestamp < cutoff {
                doomed.push(key);
            }
        }
    }
    doomed
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("repository error: {0}")]
    Repository(String),

    #[error("plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("checkpoint {seq} of unit '{unit_id}' in plan {plan_id} conflicts with the stored one")]
    Conflict {
        plan_id: Uuid,
        unit_id: String,
        seq: u64,
    },
}
