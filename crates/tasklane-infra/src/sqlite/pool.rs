//! Connections to the instance database.
//!
//! Instance saves must be atomic and SQLite has one writer, so every change
//! set goes through a one-connection writer pool. Hydration and listings use
//! a separate read-only pool sized by `[storage]` in `config.toml`. The file
//! runs in WAL mode so readers never block the writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tasklane_types::config::StorageConfig;

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "tasklane.db";

#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
    path: PathBuf,
}

impl DatabasePool {
    /// Open (or create) `{data_dir}/tasklane.db` and bring its schema up to date.
    pub async fn open(data_dir: &Path, storage: &StorageConfig) -> Result<Self, sqlx::Error> {
        let path = data_dir.join(DATABASE_FILE);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(storage.busy_timeout_ms))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        // The read-only pool cannot create tables, so migrate first.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(storage.reader_connections.max(1))
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(
            path = %path.display(),
            readers = storage.reader_connections,
            "instance database open"
        );
        Ok(Self {
            reader,
            writer,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for in-flight queries and close every connection.
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let pool = DatabasePool::open(dir.path(), &StorageConfig::default())
        .await
        .unwrap();
    // Keep the directory for the rest of the test process.
    std::mem::forget(dir);
    pool
}
