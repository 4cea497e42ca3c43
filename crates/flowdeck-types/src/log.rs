//! Append-only audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: '{other}'")),
        }
    }
}

/// An immutable audit entry scoped to tenant, workflow and optionally execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Filters for `getLogs`. All filters are conjunctive; results are newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub workflow_id: Option<Uuid>,
    #[serde(default)]
    pub execution_id: Option<Uuid>,
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            workflow_id: None,
            execution_id: None,
            level: None,
            since: None,
            until: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl LogQuery {
    pub fn for_workflow(workflow_id: Uuid) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            ..Self::default()
        }
    }

    /// Whether `entry` passes every filter (pagination aside).
    pub fn matches(&self, entry: &WorkflowLog) -> bool {
        self.workflow_id.is_none_or(|id| entry.workflow_id == id)
            && self
                .execution_id
                .is_none_or(|id| entry.execution_id == Some(id))
            && self.level.is_none_or(|level| entry.level == level)
            && self.since.is_none_or(|since| entry.created_at >= since)
            && self.until.is_none_or(|until| entry.created_at <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, execution_id: Option<Uuid>) -> WorkflowLog {
        WorkflowLog {
            id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            workflow_id: Uuid::nil(),
            execution_id,
            level,
            message: "step retry".to_string(),
            data: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("fatal".parse::<LogLevel>().is_err());
        assert!(LogLevel::Error > LogLevel::Info);
    }

    #[test]
    fn test_log_query_matches_level_and_execution() {
        let exec = Uuid::now_v7();
        let query = LogQuery {
            execution_id: Some(exec),
            level: Some(LogLevel::Error),
            ..LogQuery::default()
        };
        assert!(query.matches(&entry(LogLevel::Error, Some(exec))));
        assert!(!query.matches(&entry(LogLevel::Info, Some(exec))));
        assert!(!query.matches(&entry(LogLevel::Error, None)));
    }

    #[test]
    fn test_log_query_time_window() {
        let e = entry(LogLevel::Info, None);
        let query = LogQuery {
            since: Some(e.created_at + chrono::Duration::seconds(1)),
            ..LogQuery::default()
        };
        assert!(!query.matches(&e));
        let query = LogQuery {
            until: Some(e.created_at),
            ..LogQuery::default()
        };
        assert!(query.matches(&e));
    }
}
