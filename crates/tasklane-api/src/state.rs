//! Application state wiring the instance service to its infra backends.
//!
//! `ProcessInstanceService` is generic over its ports; `AppState` pins it to
//! SQLite for instances and the directory, and YAML files for models.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tasklane_core::service::ProcessInstanceService;
use tasklane_infra::config::{load_engine_config, models_dir, resolve_data_dir};
use tasklane_infra::models::FsModelStore;
use tasklane_infra::sqlite::directory::SqliteDirectory;
use tasklane_infra::sqlite::instance::SqliteInstanceRepository;
use tasklane_infra::sqlite::pool::DatabasePool;

pub type ConcreteInstanceService =
    ProcessInstanceService<SqliteInstanceRepository, FsModelStore, SqliteDirectory>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConcreteInstanceService>,
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory and build the state from it.
    pub async fn init() -> anyhow::Result<Self> {
        Self::init_at(&resolve_data_dir()).await
    }

    /// Connect to `{data_dir}/tasklane.db`, load config and models.
    pub async fn init_at(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let config = load_engine_config(data_dir).await;
        let models_dir = models_dir(&config, data_dir);
        let models = FsModelStore::load(&models_dir)?;

        let pool = DatabasePool::open(data_dir, &config.storage).await?;
        let service = ProcessInstanceService::new(
            SqliteInstanceRepository::new(pool.clone()),
            models,
            SqliteDirectory::new(pool),
            config,
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state initialized");
        Ok(Self {
            service: Arc::new(service),
            data_dir: data_dir.to_path_buf(),
            models_dir,
        })
    }
}
