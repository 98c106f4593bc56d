//! Engine configuration types.
//!
//! `EngineConfig` represents the `config.toml` in the data directory. All
//! fields have defaults so an empty or missing file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::instance::StrategyKind;

/// Top-level configuration for the engine and CLI.
///
/// Loaded from `~/.tasklane/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Strategy used by `run` when the caller does not choose one.
    #[serde(default)]
    pub default_strategy: StrategyKind,

    /// Upper bound on tasks executed by a single run. Guards against
    /// unbounded loops in a model.
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: u32,

    /// Capacity of the engine event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Directory holding `*.yaml` process models. Defaults to `{data_dir}/models`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// The `[storage]` table: SQLite connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Read-only connections opened next to the single writer.
    #[serde(default = "default_reader_connections")]
    pub reader_connections: u32,

    /// How long a connection waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_reader_connections() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reader_connections: default_reader_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_max_steps_per_run() -> u32 {
    10_000
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::default(),
            max_steps_per_run: default_max_steps_per_run(),
            event_bus_capacity: default_event_bus_capacity(),
            models_dir: None,
            storage: StorageConfig::default(),
        }
    }
}
