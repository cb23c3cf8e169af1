//! In-memory checkpoint repository.
//!
//! Keeps plans and checkpoints in `DashMap`s. Nothing is compressed, so raw
//! and stored byte counts are equal.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hlp_types::checkpoint::{Checkpoint, CheckpointKey, CheckpointStats};
use hlp_types::error::RepositoryError;
use hlp_types::plan::{Plan, PlanSummary};
use uuid::Uuid;

use super::checkpoint::CheckpointRepository;

type UnitLog = BTreeMap<(String, u64), Checkpoint>;

/// Shared in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointRepository {
    plans: Arc<DashMap<Uuid, (Plan, DateTime<Utc>)>>,
    checkpoints: Arc<DashMap<Uuid, UnitLog>>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn save_plan(&self, plan: &Plan) -> Result<(), RepositoryError> {
        let created_at = self
            .plans
            .get(&plan.id)
            .map(|entry| entry.1)
            .unwrap_or_else(Utc::now);
        self.plans.insert(plan.id, (plan.clone(), created_at));
        Ok(())
    }

    async fn get_plan(&self, plan_id: &Uuid) -> Result<Option<Plan>, RepositoryError> {
        Ok(self.plans.get(plan_id).map(|entry| entry.0.clone()))
    }

    async fn list_plans(&self) -> Result<Vec<PlanSummary>, RepositoryError> {
        let mut plans: Vec<PlanSummary> = self
            .plans
            .iter()
            .map(|entry| {
                let (plan, created_at) = entry.value();
                PlanSummary {
                    id: plan.id,
                    name: plan.name.clone(),
                    version: plan.version.clone(),
                    unit_count: plan.unit_count(),
                    created_at: *created_at,
                }
            })
            .collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(plans)
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool, RepositoryError> {
        let mut log = self.checkpoints.entry(checkpoint.plan_id).or_default();
        let key = (checkpoint.unit_id.clone(), checkpoint.seq);
        if log.contains_key(&key) {
            return Ok(false);
        }
        log.insert(key, checkpoint.clone());
        Ok(true)
    }

    async fn list_checkpoints(&self, plan_id: &Uuid) -> Result<Vec<Checkpoint>, RepositoryError> {
        Ok(self
            .checkpoints
            .get(plan_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_checkpoint_keys(&self) -> Result<Vec<CheckpointKey>, RepositoryError> {
        Ok(self
            .checkpoints
            .iter()
            .flat_map(|log| {
                log.values()
                    .map(|c| CheckpointKey {
                        plan_id: c.plan_id,
                        unit_id: c.unit_id.clone(),
                        seq: c.seq,
                        timestamp: c.timestamp,
                    })
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    async fn delete_checkpoints(&self, keys: &[CheckpointKey]) -> Result<u64, RepositoryError> {
        let mut removed = 0;
        for key in keys {
            if let Some(mut log) = self.checkpoints.get_mut(&key.plan_id) {
                if log.remove(&(key.unit_id.clone(), key.seq)).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<CheckpointStats, RepositoryError> {
        let mut stats = CheckpointStats {
            plans: self.plans.len() as u64,
            ..CheckpointStats::default()
        };
        for log in self.checkpoints.iter() {
            for checkpoint in log.values() {
                let size = serde_json::to_vec(checkpoint)
                    .map(|v| v.len() as u64)
                    .unwrap_or(0);
                stats.checkpoints += 1;
                stats.raw_bytes += size;
                stats.stored_bytes += size;
            }
        }
        Ok(stats)
    }
}
