//! Execution tracking types.
//!
//! A `WorkflowExecution` is one run of a workflow from trigger to terminal
//! state. Each step the engine reaches gets a `WorkflowStepExecution` row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of an execution. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: '{other}'")),
        }
    }
}

/// Status of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl StepExecutionStatus {
    /// Completed and skipped steps unblock their dependents.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
        }
    }
}

impl std::str::FromStr for StepExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "retrying" => Ok(Self::Retrying),
            other => Err(format!("unknown step execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Persisted execution context: the variables an execution started with
/// (secrets redacted) and the results of the steps it ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextRecord {
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub step_results: Map<String, Value>,
}

/// One run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    /// Definition version the execution snapshotted at start.
    pub workflow_version: u32,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default)]
    pub context: ExecutionContextRecord,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The outcome of one step within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    /// Step name (denormalized for display).
    pub step_name: String,
    pub status: StepExecutionStatus,
    /// Resolved config the handler received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Handler invocations so far (0 for skipped steps).
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filtered, paginated execution listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionQuery {
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

impl Default for ExecutionQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// An execution together with its step records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub execution: WorkflowExecution,
    pub steps: Vec<WorkflowStepExecution>,
}
