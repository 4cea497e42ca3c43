//! Cron schedule bindings for workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binds a workflow to a cron expression evaluated in a timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    /// 5-field (minute precision) or 6-field (with seconds) cron expression.
    pub cron_expression: String,
    /// `UTC` or a fixed offset such as `+05:30`.
    pub timezone: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `scheduleWorkflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression or a shorthand such as `every 5 minutes`.
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl ScheduleConfig {
    pub fn new(cron_expression: impl Into<String>) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            timezone: default_timezone(),
            is_active: true,
        }
    }

    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_config_defaults() {
        let config: ScheduleConfig =
            serde_json::from_str(r#"{"cron_expression": "0 9 * * *"}"#).unwrap();
        assert_eq!(config.timezone, "UTC");
        assert!(config.is_active);
    }

    #[test]
    fn test_schedule_config_builder() {
        let config = ScheduleConfig::new("0 9 * * 1").in_timezone("+02:00");
        assert_eq!(config.cron_expression, "0 9 * * 1");
        assert_eq!(config.timezone, "+02:00");
    }
}
