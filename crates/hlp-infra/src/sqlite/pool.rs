//! SQLite connection pools for the checkpoint database.
//!
//! Checkpoint appends are serialized through a one-connection writer pool;
//! replay and status reads share a read-only pool. The database runs in WAL
//! mode so readers never block the scheduler's writes.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// File name of the checkpoint database inside the data directory.
pub const DATABASE_FILE: &str = "hlp.db";

/// Connection settings for [`DatabasePool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub reader_connections: u32,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reader_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Reader/writer pool pair over one database file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open the pools with default settings and apply pending migrations.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::with_config(database_url, PoolConfig::default()).await
    }

    /// Open `{data_dir}/hlp.db`, creating it if needed.
    pub async fn open(data_dir: &Path) -> Result<Self, sqlx::Error> {
        Self::new(&database_url(data_dir)).await
    }

    pub async fn with_config(database_url: &str, config: PoolConfig) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        // Migrations must finish before any read-only connection opens
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(config.reader_connections.max(1))
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(
            url = database_url,
            readers = config.reader_connections,
            "checkpoint database ready"
        );
        Ok(Self { reader, writer })
    }

    /// Fold the write-ahead log back into the database file and truncate it.
    ///
    /// Returns the number of WAL frames that were checkpointed.
    pub async fn compact(&self) -> Result<i64, sqlx::Error> {
        let (busy, _log_frames, checkpointed): (i64, i64, i64) =
            sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
                .fetch_one(&self.writer)
                .await?;
        if busy != 0 {
            tracing::debug!("wal checkpoint could not complete, readers still active");
        }
        Ok(checkpointed.max(0))
    }

    /// Close both pools, waiting for open connections to finish.
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

/// Database URL for the checkpoint store inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}
