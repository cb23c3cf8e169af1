//! Application state wiring the executor to its infrastructure.
//!
//! The executor is generic over the checkpoint repository; `AppState` pins it
//! to the SQLite implementation and the built-in simulated worker.

use std::path::PathBuf;
use std::sync::Arc;

use hlp_core::checkpoint::CheckpointManager;
use hlp_core::compensator::CompensatorRegistry;
use hlp_core::executor::PlanExecutor;
use hlp_core::worker::BoxUnitWorker;
use hlp_infra::config::{load_settings, resolve_data_dir};
use hlp_infra::sqlite::checkpoint::SqliteCheckpointRepository;
use hlp_infra::sqlite::pool::DatabasePool;
use hlp_observe::metrics::TracingMetricsSink;
use hlp_types::config::ExecutorSettings;

use crate::simulate::{LoggingCompensator, SimulatedWorker};

pub type ConcreteExecutor = PlanExecutor<SqliteCheckpointRepository>;

/// Shared application state used by every command.
#[derive(Clone)]
pub struct AppState {
    pub executor: ConcreteExecutor,
    pub settings: ExecutorSettings,
    pub pool: DatabasePool,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load settings, open the database and
    /// build the executor.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let settings = load_settings(&data_dir).await;
        let pool = DatabasePool::open(&data_dir).await?;
        let repo = SqliteCheckpointRepository::new(pool.clone());

        let mut compensators = CompensatorRegistry::new();
        compensators.set_fallback(LoggingCompensator);

        let executor = PlanExecutor::new(repo, BoxUnitWorker::new(SimulatedWorker), &settings)
            .with_compensators(compensators)
            .with_metrics(Arc::new(TracingMetricsSink::new()));

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            executor,
            settings,
            pool,
            data_dir,
        })
    }

    pub fn checkpoints(&self) -> &CheckpointManager<SqliteCheckpointRepository> {
        self.executor.checkpoints()
    }
}
