//! Configuration types for Flowdeck.
//!
//! `FlowdeckConfig` represents the top-level `config.toml` in the data
//! directory. Every field has a default so an empty or missing file is valid.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowdeckConfig {
    /// SQLite database file name, relative to the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Tenant used by the CLI when `--tenant` is not given.
    #[serde(default)]
    pub default_tenant: Option<Uuid>,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn default_database_file() -> String {
    "flowdeck.db".to_string()
}

impl Default for FlowdeckConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            default_tenant: None,
            engine: EngineSettings::default(),
            http: HttpSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

/// Execution engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Timeout applied to steps that do not set their own (5 minutes).
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Step results larger than this are replaced by a truncation marker.
    #[serde(default = "default_max_step_output_bytes")]
    pub max_step_output_bytes: usize,

    /// Executions whose accumulated step results exceed this fail.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// Capacity of the progress event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

fn default_max_step_output_bytes() -> usize {
    1_048_576
}

fn default_max_context_bytes() -> usize {
    10_485_760
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            max_step_output_bytes: default_max_step_output_bytes(),
            max_context_bytes: default_max_context_bytes(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

/// Outbound HTTP client settings for `call_api` and `send_webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("flowdeck/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Cron scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Run the cron scheduler at all (the `daemon` command requires it).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Re-register active schedules at startup.
    #[serde(default = "default_true")]
    pub restore_on_startup: bool,

    /// Write a warning to the audit log for fires missed while stopped.
    #[serde(default = "default_true")]
    pub report_missed_runs: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            restore_on_startup: true,
            report_missed_runs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = FlowdeckConfig::default();
        assert_eq!(config.database_file, "flowdeck.db");
        assert_eq!(config.engine.default_step_timeout_ms, 300_000);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(config.scheduler.enabled);
        assert!(config.default_tenant.is_none());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: FlowdeckConfig = toml::from_str("").unwrap();
        assert_eq!(config.database_file, "flowdeck.db");
        assert_eq!(config.engine.max_context_bytes, 10_485_760);
        assert!(config.scheduler.restore_on_startup);
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
database_file = "automation.db"
default_tenant = "0191e1a2-7c3b-7d4e-8f00-000000000001"

[engine]
default_step_timeout_ms = 60000

[http]
timeout_secs = 5

[scheduler]
enabled = false
"#;
        let config: FlowdeckConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_file, "automation.db");
        assert!(config.default_tenant.is_some());
        assert_eq!(config.engine.default_step_timeout_ms, 60_000);
        assert_eq!(config.engine.event_bus_capacity, 1024);
        assert_eq!(config.http.timeout_secs, 5);
        assert!(config.http.user_agent.starts_with("flowdeck/"));
        assert!(!config.scheduler.enabled);
        assert!(config.scheduler.report_missed_runs);
    }
}
