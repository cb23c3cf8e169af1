//! Checkpoint records and retention types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::failure::RetryRecord;
use crate::state::UnitState;

/// Immutable snapshot of one unit after a state change.
///
/// Checkpoints are append-only and keyed by `(plan_id, unit_id, seq)`, where
/// `seq` is the unit's transition index. Writing a key that already exists is
/// a no-op, so re-recording the same transition after a crash is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub plan_id: Uuid,
    pub unit_id: String,
    /// Per-unit transition index, starting at 1.
    pub seq: u64,
    pub state: UnitState,
    /// Execution attempt the transition belongs to (number of dispatches so far).
    pub attempt: u32,
    pub retry: RetryRecord,
    /// Every artifact the unit owns at this point, with its current status.
    #[serde(default)]
    pub artifact_refs: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Minimal identity of a stored checkpoint, used by retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub plan_id: Uuid,
    pub unit_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
}

/// Retention limits. Whichever limit binds first prunes a checkpoint; the
/// newest checkpoint of every unit is always kept so replay stays possible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Newest checkpoints kept per unit.
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

fn default_max_age_days() -> u32 {
    7
}

fn default_max_count() -> usize {
    5
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            max_count: default_max_count(),
        }
    }
}

/// Storage statistics for the checkpoint store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub checkpoints: u64,
    pub plans: u64,
    /// Uncompressed JSON bytes.
    pub raw_bytes: u64,
    /// Bytes actually stored.
    pub stored_bytes: u64,
}

impl CheckpointStats {
    /// Stored / raw, or 1.0 for an empty store.
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            1.0
        } else {
            self.stored_bytes as f64 / self.raw_bytes as f64
        }
    }
}
