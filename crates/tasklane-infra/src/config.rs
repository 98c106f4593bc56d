//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.tasklane/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use tasklane_types::config::EngineConfig;

/// Lower bound on `max_steps_per_run`.
const MIN_STEPS_PER_RUN: u32 = 1;

/// Lower bound on `storage.reader_connections`.
const MIN_READER_CONNECTIONS: u32 = 1;

/// Resolve the data directory.
///
/// `TASKLANE_DATA_DIR` wins, then `~/.tasklane`, then `.tasklane` in the
/// current directory.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TASKLANE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".tasklane");
    }

    PathBuf::from(".tasklane")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(mut config) => {
            config.max_steps_per_run = config.max_steps_per_run.max(MIN_STEPS_PER_RUN);
            config.storage.reader_connections =
                config.storage.reader_connections.max(MIN_READER_CONNECTIONS);
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Directory holding process model files.
pub fn models_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .models_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("models"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklane_types::instance::StrategyKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_steps_per_run, 10_000);
        assert_eq!(config.default_strategy, StrategyKind::Default);
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
default_strategy = "greedy"
max_steps_per_run = 250
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_strategy, StrategyKind::Greedy);
        assert_eq!(config.max_steps_per_run, 250);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_steps_per_run, 10_000);
    }

    #[tokio::test]
    async fn load_engine_config_enforces_step_floor() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "max_steps_per_run = 0")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_steps_per_run, MIN_STEPS_PER_RUN);
    }

    #[tokio::test]
    async fn load_engine_config_keeps_one_reader() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "[storage]\nreader_connections = 0\nbusy_timeout_ms = 250\n",
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.storage.reader_connections, MIN_READER_CONNECTIONS);
        assert_eq!(config.storage.busy_timeout_ms, 250);
    }

    #[test]
    fn models_dir_defaults_under_data_dir() {
        let config = EngineConfig::default();
        assert_eq!(
            models_dir(&config, Path::new("/srv/tasklane")),
            PathBuf::from("/srv/tasklane/models")
        );

        let config = EngineConfig {
            models_dir: Some(PathBuf::from("/opt/models")),
            ..EngineConfig::default()
        };
        assert_eq!(models_dir(&config, Path::new("/srv/tasklane")), PathBuf::from("/opt/models"));
    }
}
