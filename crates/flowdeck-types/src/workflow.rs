//! Workflow definition types for Flowdeck.
//!
//! A `Workflow` is a tenant-scoped, versioned automation definition: a trigger,
//! a set of positioned steps, and the variables its templates can reference.
//! Steps, variables and schedules are stored as separate rows and mutated
//! independently; each mutation bumps the owning workflow's `version`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A named, versioned automation definition owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Owning tenant (community).
    pub tenant_id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The event class that starts executions of this workflow.
    pub trigger: TriggerKind,
    /// Trigger-specific configuration (event type, webhook secret, `when` filter).
    #[serde(default)]
    pub trigger_config: Value,
    /// Inactive workflows are not executed by any trigger.
    pub is_active: bool,
    /// Monotonic version, incremented on every definition mutation.
    pub version: u32,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extensible metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The event class starting an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Schedule,
    Webhook,
    Event,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "schedule" => Ok(Self::Schedule),
            "webhook" => Ok(Self::Webhook),
            "event" => Ok(Self::Event),
            other => Err(format!("unknown trigger kind: '{other}'")),
        }
    }
}

/// Input for creating a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_trigger")]
    pub trigger: TriggerKind,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl NewWorkflow {
    /// A manually triggered, active workflow with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            trigger: TriggerKind::Manual,
            trigger_config: Value::Null,
            is_active: true,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Partial update of a workflow's own fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger: Option<TriggerKind>,
    pub trigger_config: Option<Value>,
    pub is_active: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, Value>>,
}

fn default_trigger() -> TriggerKind {
    TriggerKind::Manual
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One unit of work inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Handler to dispatch to. Required for action-like step types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    /// Opaque handler configuration; may contain `{{path}}` templates.
    #[serde(default)]
    pub config: Value,
    /// Default ordering key (ascending).
    pub position: i32,
    /// Optional predicate gating the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Sibling step ids that must reach a satisfied state first.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    pub is_active: bool,
}

/// The kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Action,
    Condition,
    Loop,
    Parallel,
    Delay,
    Approval,
    Notification,
    Integration,
    Custom,
}

impl StepType {
    /// Step types that dispatch their `action` directly.
    pub fn requires_action(&self) -> bool {
        matches!(
            self,
            Self::Action | Self::Notification | Self::Integration | Self::Custom
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::Delay => "delay",
            Self::Approval => "approval",
            Self::Notification => "notification",
            Self::Integration => "integration",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of action handlers a step can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    SendNotification,
    CreateRecord,
    UpdateRecord,
    CallApi,
    Delay,
    CalculateValue,
    TransformData,
    SendWebhook,
    LogMessage,
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        Self::SendEmail,
        Self::SendNotification,
        Self::CreateRecord,
        Self::UpdateRecord,
        Self::CallApi,
        Self::Delay,
        Self::CalculateValue,
        Self::TransformData,
        Self::SendWebhook,
        Self::LogMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::SendNotification => "send_notification",
            Self::CreateRecord => "create_record",
            Self::UpdateRecord => "update_record",
            Self::CallApi => "call_api",
            Self::Delay => "delay",
            Self::CalculateValue => "calculate_value",
            Self::TransformData => "transform_data",
            Self::SendWebhook => "send_webhook",
            Self::LogMessage => "log_message",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown action kind: '{s}'"))
    }
}

/// A `{operator, left, right}` predicate. Operands may be literals or templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: ConditionOperator,
    #[serde(default)]
    pub left: Value,
    #[serde(default)]
    pub right: Value,
}

/// Comparison operator of a [`Condition`].
///
/// Unrecognized operator names are kept verbatim in `Other` so they survive
/// storage and export unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Exists,
    Other(String),
}

impl ConditionOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Contains => "contains",
            Self::Exists => "exists",
            Self::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for ConditionOperator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "contains" => Self::Contains,
            "exists" => Self::Exists,
            _ => Self::Other(value),
        }
    }
}

impl From<ConditionOperator> for String {
    fn from(value: ConditionOperator) -> Self {
        value.as_str().to_string()
    }
}

/// Per-step retry policy.
///
/// Backoff between attempts is `backoff_multiplier * 1000ms * attempts`,
/// i.e. linear in the number of failed attempts so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Input for adding a step to a workflow.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub name: String,
    pub step_type: StepType,
    pub action: Option<ActionKind>,
    pub config: Value,
    /// `None` appends after the current last position.
    pub position: Option<i32>,
    pub condition: Option<Condition>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    pub dependencies: Vec<Uuid>,
    pub is_active: bool,
}

impl NewStep {
    /// An active `action` step dispatching `action` with `config`.
    pub fn action(name: impl Into<String>, action: ActionKind, config: Value) -> Self {
        Self {
            name: name.into(),
            step_type: StepType::Action,
            action: Some(action),
            config,
            position: None,
            condition: None,
            retry_policy: None,
            timeout_ms: None,
            dependencies: Vec::new(),
            is_active: true,
        }
    }

    pub fn at_position(mut self, position: i32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn depends_on(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }
}

/// Partial update of a step. `None` leaves a field unchanged; the nested
/// options on `condition`/`timeout_ms` allow clearing.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub name: Option<String>,
    pub step_type: Option<StepType>,
    pub action: Option<Option<ActionKind>>,
    pub config: Option<Value>,
    pub position: Option<i32>,
    pub condition: Option<Option<Condition>>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_ms: Option<Option<u64>>,
    pub dependencies: Option<Vec<Uuid>>,
    pub is_active: Option<bool>,
}

impl StepUpdate {
    /// Apply this update to a step in place.
    pub fn apply_to(self, step: &mut WorkflowStep) {
        if let Some(name) = self.name {
            step.name = name;
        }
        if let Some(step_type) = self.step_type {
            step.step_type = step_type;
        }
        if let Some(action) = self.action {
            step.action = action;
        }
        if let Some(config) = self.config {
            step.config = config;
        }
        if let Some(position) = self.position {
            step.position = position;
        }
        if let Some(condition) = self.condition {
            step.condition = condition;
        }
        if let Some(retry_policy) = self.retry_policy {
            step.retry_policy = retry_policy;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            step.timeout_ms = timeout_ms;
        }
        if let Some(dependencies) = self.dependencies {
            step.dependencies = dependencies;
        }
        if let Some(is_active) = self.is_active {
            step.is_active = is_active;
        }
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A named value available to templates. `workflow_id = None` means the
/// variable is tenant-global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    pub is_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowVariable {
    /// Secret-typed variables are secret regardless of the flag.
    pub fn is_sensitive(&self) -> bool {
        self.is_secret || self.var_type == VariableType::Secret
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Json,
    Secret,
    File,
    /// Value is the name of another variable whose value it takes.
    Reference,
}

impl VariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "json",
            Self::Secret => "secret",
            Self::File => "file",
            Self::Reference => "reference",
        }
    }
}

impl FromStr for VariableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "json" => Ok(Self::Json),
            "secret" => Ok(Self::Secret),
            "file" => Ok(Self::File),
            "reference" => Ok(Self::Reference),
            other => Err(format!("unknown variable type: '{other}'")),
        }
    }
}

/// Input for `setVariable` (create or replace by name within its scope).
#[derive(Debug, Clone)]
pub struct NewVariable {
    pub workflow_id: Option<Uuid>,
    pub name: String,
    pub value: Value,
    pub var_type: VariableType,
    pub is_secret: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
