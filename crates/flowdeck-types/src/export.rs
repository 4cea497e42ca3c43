//! Portable workflow export document.
//!
//! The document carries no ids: steps reference each other through an
//! export-local `key`, and importing assigns fresh ids. Secret variable values
//! are replaced with [`REDACTED`] on export.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::{ActionKind, Condition, RetryPolicy, StepType, TriggerKind, VariableType};

/// Placeholder written in place of secret variable values.
pub const REDACTED: &str = "[REDACTED]";

/// Exported workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub steps: Vec<ExportedStep>,
    #[serde(default)]
    pub variables: Vec<ExportedVariable>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStep {
    /// Export-local identifier referenced by other steps' `dependsOn`.
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    #[serde(default)]
    pub config: Value,
    pub position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedVariable {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default)]
    pub is_secret: bool,
}

impl ExportedVariable {
    /// Whether the value is still the redaction placeholder.
    pub fn is_redacted(&self) -> bool {
        self.value.as_str() == Some(REDACTED)
    }
}

fn default_true() -> bool {
    true
}
