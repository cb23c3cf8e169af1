//! SQLite checkpoint repository implementation.
//!
//! Implements `CheckpointRepository` from `hlp-core` using sqlx with split
//! read/write pools. Plan definitions are stored as JSON text; checkpoints as
//! gzip-compressed JSON with a SHA-256 checksum (see [`crate::codec`]).

use chrono::{DateTime, Utc};
use hlp_core::repository::checkpoint::CheckpointRepository;
use hlp_types::checkpoint::{Checkpoint, CheckpointKey, CheckpointStats};
use hlp_types::error::RepositoryError;
use hlp_types::plan::{Plan, PlanSummary};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use crate::codec;

/// SQLite-backed implementation of `CheckpointRepository`.
#[derive(Clone)]
pub struct SqliteCheckpointRepository {
    pool: DatabasePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PlanSummary, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let unit_count: i64 = row.try_get("unit_count").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;
    Ok(PlanSummary {
        id: parse_uuid(&id)?,
        name: row.try_get("name").map_err(query_err)?,
        version: row.try_get("version").map_err(query_err)?,
        unit_count: unit_count as usize,
        created_at: parse_datetime(&created_at)?,
    })
}

fn checkpoint_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let payload: Vec<u8> = row.try_get("payload").map_err(query_err)?;
    let checksum: String = row.try_get("checksum").map_err(query_err)?;
    let checkpoint: Checkpoint = codec::decode(&payload, &checksum)?;

    // The key columns are authoritative; a payload that disagrees was
    // written under the wrong key.
    let unit_id: String = row.try_get("unit_id").map_err(query_err)?;
    let seq: i64 = row.try_get("seq").map_err(query_err)?;
    if checkpoint.unit_id != unit_id || checkpoint.seq != seq as u64 {
        return Err(RepositoryError::Corrupt(format!(
            "payload of checkpoint ({unit_id}, {seq}) belongs to ({}, {})",
            checkpoint.unit_id, checkpoint.seq
        )));
    }
    Ok(checkpoint)
}

// ---------------------------------------------------------------------------
// CheckpointRepository implementation
// ---------------------------------------------------------------------------

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save_plan(&self, plan: &Plan) -> Result<(), RepositoryError> {
        let definition = serde_json::to_string(plan)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize plan: {e}")))?;

        sqlx::query(
            r#"INSERT INTO plans (id, name, version, unit_count, definition, created_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                   name = excluded.name,
                   version = excluded.version,
                   unit_count = excluded.unit_count,
                   definition = excluded.definition"#,
        )
        .bind(plan.id.to_string())
        .bind(&plan.name)
        .bind(&plan.version)
        .bind(plan.unit_count() as i64)
        .bind(&definition)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_plan(&self, plan_id: &Uuid) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM plans WHERE id = ?")
            .bind(plan_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let definition: String = row.try_get("definition").map_err(query_err)?;
                let plan: Plan = serde_json::from_str(&definition)
                    .map_err(|e| RepositoryError::Corrupt(format!("invalid plan JSON: {e}")))?;
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    async fn list_plans(&self) -> Result<Vec<PlanSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, version, unit_count, created_at FROM plans ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool, RepositoryError> {
        let encoded = codec::encode(checkpoint)?;

        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO checkpoints
                   (plan_id, unit_id, seq, state, payload, checksum, raw_size, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(checkpoint.plan_id.to_string())
        .bind(&checkpoint.unit_id)
        .bind(checkpoint.seq as i64)
        .bind(checkpoint.state.as_str())
        .bind(&encoded.bytes)
        .bind(&encoded.checksum)
        .bind(encoded.raw_len as i64)
        .bind(format_datetime(&checkpoint.timestamp))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_checkpoints(&self, plan_id: &Uuid) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT unit_id, seq, payload, checksum FROM checkpoints
               WHERE plan_id = ? ORDER BY unit_id, seq"#,
        )
        .bind(plan_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(checkpoint_from_row).collect()
    }

    async fn list_checkpoint_keys(&self) -> Result<Vec<CheckpointKey>, RepositoryError> {
        let rows = sqlx::query("SELECT plan_id, unit_id, seq, created_at FROM checkpoints")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let plan_id: String = row.try_get("plan_id").map_err(query_err)?;
                let seq: i64 = row.try_get("seq").map_err(query_err)?;
                let created_at: String = row.try_get("created_at").map_err(query_err)?;
                Ok(CheckpointKey {
                    plan_id: parse_uuid(&plan_id)?,
                    unit_id: row.try_get("unit_id").map_err(query_err)?,
                    seq: seq as u64,
                    timestamp: parse_datetime(&created_at)?,
                })
            })
            .collect()
    }

    async fn delete_checkpoints(&self, keys: &[CheckpointKey]) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let mut removed = 0;
        for key in keys {
            let result =
                sqlx::query("DELETE FROM checkpoints WHERE plan_id = ? AND unit_id = ? AND seq = ?")
                    .bind(key.plan_id.to_string())
                    .bind(&key.unit_id)
                    .bind(key.seq as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err)?;
            removed += result.rows_affected();
        }
        tx.commit().await.map_err(query_err)?;
        Ok(removed)
    }

    async fn stats(&self) -> Result<CheckpointStats, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS checkpoints,
                      COALESCE(SUM(raw_size), 0) AS raw_bytes,
                      COALESCE(SUM(LENGTH(payload)), 0) AS stored_bytes
               FROM checkpoints"#,
        )
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let plans: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM plans")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let checkpoints: i64 = row.try_get("checkpoints").map_err(query_err)?;
        let raw_bytes: i64 = row.try_get("raw_bytes").map_err(query_err)?;
        let stored_bytes: i64 = row.try_get("stored_bytes").map_err(query_err)?;
        Ok(CheckpointStats {
            checkpoints: checkpoints as u64,
            plans: plans.0 as u64,
            raw_bytes: raw_bytes as u64,
            stored_bytes: stored_bytes as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;
    use chrono::Duration;
    use hlp_core::checkpoint::CheckpointManager;
    use hlp_core::definition::parse_plan_yaml;
    use hlp_types::artifact::{Artifact, ArtifactSpec};
    use hlp_types::checkpoint::RetentionPolicy;
    use hlp_types::failure::{ExecutionFailure, RetryRecord};
    use hlp_types::state::UnitState;

    async fn test_repo() -> (SqliteCheckpointRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        (SqliteCheckpointRepository::new(pool), dir)
    }

    fn test_plan() -> Plan {
        parse_plan_yaml(
            r#"
name: release
phases:
  - id: build
    units:
      - id: compile
      - id: package
        depends_on: [compile]
"#,
        )
        .unwrap()
    }

    fn checkpoint(plan_id: Uuid, unit_id: &str, seq: u64, state: UnitState) -> Checkpoint {
        Checkpoint {
            plan_id,
            unit_id: unit_id.to_string(),
            seq,
            state,
            attempt: 1,
            retry: RetryRecord::new(42),
            artifact_refs: vec![],
            reason: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_plan() {
        let (repo, _dir) = test_repo().await;
        let plan = test_plan();
        repo.save_plan(&plan).await.unwrap();

        let loaded = repo.get_plan(&plan.id).await.unwrap().unwrap();
        assert_eq!(loaded, plan);
        assert!(repo.get_plan(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_plan_upserts() {
        let (repo, _dir) = test_repo().await;
        let mut plan = test_plan();
        repo.save_plan(&plan).await.unwrap();
        plan.name = "release-2".to_string();
        repo.save_plan(&plan).await.unwrap();

        let plans = repo.list_plans().await.unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].name, "release-2");
        assert_eq!(plans[0].unit_count, 2);
    }

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let (repo, _dir) = test_repo().await;
        let plan = test_plan();
        repo.save_plan(&plan).await.unwrap();

        let cp = checkpoint(plan.id, "compile", 1, UnitState::Queued);
        assert!(repo.append_checkpoint(&cp).await.unwrap());

        let mut rewrite = cp.clone();
        rewrite.state = UnitState::Running;
        assert!(!repo.append_checkpoint(&rewrite).await.unwrap());

        let stored = repo.list_checkpoints(&plan.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].state, UnitState::Queued);
    }

    #[tokio::test]
    async fn test_manager_rejects_conflicting_rewrite() {
        let (repo, _dir) = test_repo().await;
        let manager = CheckpointManager::new(repo);
        let plan = test_plan();
        manager.save_plan(&plan).await.unwrap();

        let mut cp = checkpoint(plan.id, "compile", 1, UnitState::Completed);
        cp.artifact_refs = vec![Artifact::applied(
            ArtifactSpec::new("bin", "file"),
            "compile",
            0,
        )];
        assert!(manager.record(&cp).await.unwrap());
        assert!(!manager.record(&cp).await.unwrap());

        let mut changed = cp.clone();
        changed.reason = Some("rewritten".to_string());
        let err = manager.record(&changed).await.unwrap_err();
        assert!(matches!(
            err,
            hlp_core::checkpoint::CheckpointError::Conflict { seq: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_checkpoints_roundtrip_typed_failure() {
        let (repo, _dir) = test_repo().await;
        let plan = test_plan();
        repo.save_plan(&plan).await.unwrap();

        let mut cp = checkpoint(plan.id, "compile", 2, UnitState::Failed);
        cp.retry.attempt_count = 1;
        cp.retry.last_failure = Some(ExecutionFailure::Timeout(30));
        cp.artifact_refs = vec![Artifact::applied(
            ArtifactSpec::new("bin/app", "file"),
            "compile",
            0,
        )];
        repo.append_checkpoint(&cp).await.unwrap();

        let stored = repo.list_checkpoints(&plan.id).await.unwrap();
        assert_eq!(stored[0].retry.last_failure, Some(ExecutionFailure::Timeout(30)));
        assert_eq!(stored[0].artifact_refs[0].id, "bin/app");
    }

    #[tokio::test]
    async fn test_list_orders_by_unit_then_seq() {
        let (repo, _dir) = test_repo().await;
        let plan = test_plan();
        repo.save_plan(&plan).await.unwrap();

        for (unit, seq) in [("package", 1), ("compile", 2), ("compile", 1)] {
            repo.append_checkpoint(&checkpoint(plan.id, unit, seq, UnitState::Queued))
                .await
                .unwrap();
        }

        let keys: Vec<(String, u64)> = repo
            .list_checkpoints(&plan.id)
            .await
            .unwrap()
            .into_iter()
            .map(|cp| (cp.unit_id, cp.seq))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("compile".to_string(), 1),
                ("compile".to_string(), 2),
                ("package".to_string(), 1)
            ]
        );
    }

    #[tokio::test]
    async fn test_tampered_checksum_is_rejected() {
        let (repo, _dir) = test_repo().await;
        let plan = test_plan();
        repo.save_plan(&plan).await.unwrap();
        repo.append_checkpoint(&checkpoint(plan.id, "compile", 1, UnitState::Queued))
            .await
            .unwrap();

        sqlx::query("UPDATE checkpoints SET checksum = 'deadbeef'")
            .execute(&repo.pool.writer)
            .await
            .unwrap();

        let err = repo.list_checkpoints(&plan.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupt(_)), "got: {err}");
    }

    #[tokio::test]
    async fn test_delete_and_keys() {
        let (repo, _dir) = test_repo().await;
        let plan = test_plan();
        repo.save_plan(&plan).await.unwrap();
        for seq in 1..=3 {
            repo.append_checkpoint(&checkpoint(plan.id, "compile", seq, UnitState::Queued))
                .await
                .unwrap();
        }

        let keys = repo.list_checkpoint_keys().await.unwrap();
        assert_eq!(keys.len(), 3);

        let doomed: Vec<CheckpointKey> = keys.into_iter().filter(|k| k.seq < 3).collect();
        assert_eq!(repo.delete_checkpoints(&doomed).await.unwrap(), 2);
        assert_eq!(repo.delete_checkpoints(&doomed).await.unwrap(), 0);
        assert_eq!(repo.list_checkpoints(&plan.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_report_compression() {
        let (repo, _dir) = test_repo().await;
        let plan = test_plan();
        repo.save_plan(&plan).await.unwrap();

        let mut cp = checkpoint(plan.id, "compile", 1, UnitState::Completed);
        cp.artifact_refs = (0..50)
            .map(|i| Artifact::applied(ArtifactSpec::new(format!("obj/{i}.o"), "file"), "compile", i))
            .collect();
        repo.append_checkpoint(&cp).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.plans, 1);
        assert_eq!(stats.checkpoints, 1);
        assert!(stats.raw_bytes > 0);
        assert!(stats.compression_ratio() < 0.5, "ratio: {}", stats.compression_ratio());
    }

    #[tokio::test]
    async fn test_manager_replay_and_prune_over_sqlite() {
        let (repo, _dir) = test_repo().await;
        let manager = CheckpointManager::new(repo);
        let plan = test_plan();
        manager.save_plan(&plan).await.unwrap();

        let old = Utc::now() - Duration::days(30);
        for (seq, state) in [
            (1, UnitState::Queued),
            (2, UnitState::Running),
            (3, UnitState::Completed),
        ] {
            let mut cp = checkpoint(plan.id, "compile", seq, state);
            cp.timestamp = old;
            manager.record(&cp).await.unwrap();
        }

        let latest = manager.replay(plan.id).await.unwrap();
        assert_eq!(latest["compile"].state, UnitState::Completed);

        let removed = manager
            .prune(&RetentionPolicy::default(), Utc::now())
            .await.unwrap();
        assert_eq!(removed, 2);
        let latest = manager.replay(plan.id).await.unwrap();
        assert_eq!(latest["compile"].seq, 3);
    }
}
