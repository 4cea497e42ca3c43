//! Configuration loader for Flowdeck.
//!
//! Reads `config.toml` from the data directory (`~/.flowdeck/` by default)
//! and deserializes it into [`FlowdeckConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};

use flowdeck_types::config::FlowdeckConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "FLOWDECK_DATA_DIR";

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`FlowdeckConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
pub async fn load_config(data_dir: &Path) -> FlowdeckConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.toml found, using defaults");
            return FlowdeckConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return FlowdeckConfig::default();
        }
    };

    match toml::from_str::<FlowdeckConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            FlowdeckConfig::default()
        }
    }
}

/// The data directory: `$FLOWDECK_DATA_DIR`, else `~/.flowdeck`, else
/// `./.flowdeck` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    resolve_data_dir(std::env::var(DATA_DIR_ENV).ok(), dirs::home_dir())
}

fn resolve_data_dir(env_value: Option<String>, home: Option<PathBuf>) -> PathBuf {
    match env_value.filter(|v| !v.trim().is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => home
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowdeck"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.database_file, "flowdeck.db");
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_load_config_valid_toml() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
database_file = "ops.db"

[engine]
max_context_bytes = 2048

[scheduler]
report_missed_runs = false
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.database_file, "ops.db");
        assert_eq!(config.engine.max_context_bytes, 2048);
        assert!(!config.scheduler.report_missed_runs);
        assert!(config.scheduler.enabled);
    }

    #[tokio::test]
    async fn test_load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.database_file, "flowdeck.db");
    }

    #[test]
    fn test_resolve_data_dir() {
        assert_eq!(
            resolve_data_dir(Some("/srv/flowdeck".to_string()), Some(PathBuf::from("/home/u"))),
            PathBuf::from("/srv/flowdeck")
        );
        assert_eq!(
            resolve_data_dir(Some("  ".to_string()), Some(PathBuf::from("/home/u"))),
            PathBuf::from("/home/u/.flowdeck")
        );
        assert_eq!(resolve_data_dir(None, None), PathBuf::from("./.flowdeck"));
    }
}
