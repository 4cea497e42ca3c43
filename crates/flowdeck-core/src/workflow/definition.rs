//! Workflow definition validation and export document parsing.
//!
//! Validation combines the structural dependency checks from [`super::dag`]
//! with definition-level rules (non-empty name, action kinds present where
//! required, sane retry policies). A definition either passes completely or is
//! rejected with the first problem found.

use flowdeck_types::export::{ExportedStep, WorkflowExport};
use flowdeck_types::workflow::{ActionKind, Condition, RetryPolicy, StepType, Workflow, WorkflowStep};
use thiserror::Error;

use super::dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while validating or (de)serializing workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural or definition-level validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Dependency graph contains a cycle.
    #[error("{0}")]
    CycleDetected(String),

    /// A step references a dependency that is not a sibling step.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// Template or arithmetic expression error.
    #[error("expression error: {0}")]
    ExpressionError(String),
}

impl WorkflowError {
    /// Whether this error rejects a definition (as opposed to a parse or
    /// expression failure).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_) | Self::CycleDetected(_) | Self::UnknownDependency(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a workflow and its steps before execution.
///
/// Fails on an empty name, an empty step list, any invalid step, a dangling
/// dependency or a dependency cycle.
pub fn validate_workflow(workflow: &Workflow, steps: &[WorkflowStep]) -> Result<(), WorkflowError> {
    validate_name(&workflow.name)?;
    if steps.is_empty() {
        return Err(WorkflowError::ValidationError(format!(
            "workflow '{}' must have at least one step",
            workflow.name
        )));
    }
    for step in steps {
        validate_step(step)?;
    }
    dag::validate_dependencies(steps)
}

/// Definition-level checks on a single step.
pub fn validate_step(step: &WorkflowStep) -> Result<(), WorkflowError> {
    check_step_fields(
        &step.name,
        step.step_type,
        step.action,
        &step.retry_policy,
        step.timeout_ms,
        step.condition.as_ref(),
    )
}

/// Validate an export document before importing it.
///
/// An exported workflow may have no steps; keys must be unique and every
/// `dependsOn` entry must name another step's key without forming a cycle.
pub fn validate_export(doc: &WorkflowExport) -> Result<(), WorkflowError> {
    validate_name(&doc.name)?;
    for step in &doc.steps {
        validate_exported_step(step)?;
    }
    dag::check_references(&doc.steps)
}

fn validate_exported_step(step: &ExportedStep) -> Result<(), WorkflowError> {
    if step.key.trim().is_empty() {
        return Err(WorkflowError::ValidationError(format!(
            "step '{}' has an empty key",
            step.name
        )));
    }
    check_step_fields(
        &step.name,
        step.step_type,
        step.action,
        &step.retry_policy,
        step.timeout_ms,
        step.condition.as_ref(),
    )
}

fn validate_name(name: &str) -> Result<(), WorkflowError> {
    if name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_step_fields(
    name: &str,
    step_type: StepType,
    action: Option<ActionKind>,
    retry_policy: &RetryPolicy,
    timeout_ms: Option<u64>,
    condition: Option<&Condition>,
) -> Result<(), WorkflowError> {
    if name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "step name must not be empty".to_string(),
        ));
    }

    if step_type.requires_action() && action.is_none() {
        return Err(WorkflowError::ValidationError(format!(
            "step '{name}' of type '{step_type}' requires an action"
        )));
    }

    validate_retry_policy(name, retry_policy)?;

    if timeout_ms == Some(0) {
        return Err(WorkflowError::ValidationError(format!(
            "step '{name}' has a zero timeout"
        )));
    }

    if let Some(condition) = condition {
        if !condition.operator.is_known() {
            // Unknown operators evaluate to true at run time.
            tracing::warn!(
                step = %name,
                operator = %condition.operator.as_str(),
                "unknown condition operator; step will always run"
            );
        }
    }

    Ok(())
}

/// Reject policies that could never run or never finish backing off.
pub fn validate_retry_policy(step_name: &str, policy: &RetryPolicy) -> Result<(), WorkflowError> {
    if policy.max_attempts == 0 {
        return Err(WorkflowError::ValidationError(format!(
            "step '{step_name}': maxAttempts must be at least 1"
        )));
    }
    if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 0.0 {
        return Err(WorkflowError::ValidationError(format!(
            "step '{step_name}': backoffMultiplier must be a finite, non-negative number"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Export document (de)serialization
// ---------------------------------------------------------------------------

/// Serialization format of an export document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Yaml,
}

impl ExportFormat {
    /// Guess the format from a file extension (`.yaml`/`.yml` are YAML).
    pub fn from_extension(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(format!("unknown export format: '{other}'")),
        }
    }
}

/// Parse and validate an export document.
pub fn parse_export(text: &str, format: ExportFormat) -> Result<WorkflowExport, WorkflowError> {
    let doc: WorkflowExport = match format {
        ExportFormat::Json => {
            serde_json::from_str(text).map_err(|e| WorkflowError::ParseError(e.to_string()))?
        }
        ExportFormat::Yaml => {
            serde_yaml_ng::from_str(text).map_err(|e| WorkflowError::ParseError(e.to_string()))?
        }
    };
    validate_export(&doc)?;
    Ok(doc)
}

/// Serialize an export document.
pub fn serialize_export(doc: &WorkflowExport, format: ExportFormat) -> Result<String, WorkflowError> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(doc).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
        ExportFormat::Yaml => {
            serde_yaml_ng::to_string(doc).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowdeck_types::workflow::{ConditionOperator, TriggerKind};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn make_workflow(name: &str) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            name: name.to_string(),
            description: None,
            trigger: TriggerKind::Manual,
            trigger_config: Value::Null,
            is_active: true,
            version: 1,
            tags: vec![],
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn make_step(name: &str) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::now_v7(),
            workflow_id: Uuid::nil(),
            name: name.to_string(),
            step_type: StepType::Action,
            action: Some(ActionKind::LogMessage),
            config: json!({"message": "hi"}),
            position: 1,
            condition: None,
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
            dependencies: vec![],
            is_active: true,
        }
    }

    #[test]
    fn test_valid_workflow_passes() {
        let wf = make_workflow("welcome");
        assert!(validate_workflow(&wf, &[make_step("a")]).is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_workflow() {
        let wf = make_workflow("welcome");
        let err = validate_workflow(&wf, &[]).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_validation_rejects_empty_name() {
        let wf = make_workflow("  ");
        let err = validate_workflow(&wf, &[make_step("a")]).unwrap_err();
        assert!(err.to_string().contains("name must not be empty"));
    }

    #[test]
    fn test_validation_rejects_missing_action() {
        let mut step = make_step("a");
        step.action = None;
        let err = validate_step(&step).unwrap_err();
        assert!(err.to_string().contains("requires an action"));

        // Delay steps carry no action kind
        step.step_type = StepType::Delay;
        assert!(validate_step(&step).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_retry_policy() {
        let mut step = make_step("a");
        step.retry_policy.max_attempts = 0;
        assert!(validate_step(&step).is_err());

        step.retry_policy = RetryPolicy { max_attempts: 2, backoff_multiplier: f64::NAN };
        assert!(validate_step(&step).is_err());

        step.retry_policy.backoff_multiplier = -1.0;
        assert!(validate_step(&step).is_err());

        step.retry_policy.backoff_multiplier = 0.0;
        assert!(validate_step(&step).is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let mut step = make_step("a");
        step.timeout_ms = Some(0);
        assert!(validate_step(&step).unwrap_err().to_string().contains("zero timeout"));
    }

    #[test]
    fn test_unknown_operator_is_accepted() {
        let mut step = make_step("a");
        step.condition = Some(Condition {
            operator: ConditionOperator::Other("matches_regex".to_string()),
            left: json!("x"),
            right: json!("y"),
        });
        assert!(validate_step(&step).is_ok());
    }

    #[test]
    fn test_parse_export_json_and_yaml() {
        let json_doc = r#"{
            "name": "digest",
            "trigger": "manual",
            "steps": [
                {"key": "a", "name": "A", "type": "action", "action": "log_message", "position": 1},
                {"key": "b", "name": "B", "type": "delay", "position": 2, "dependsOn": ["a"],
                 "config": {"duration": 10}}
            ],
            "version": 4
        }"#;
        let doc = parse_export(json_doc, ExportFormat::Json).unwrap();
        assert_eq!(doc.steps.len(), 2);

        let yaml = serialize_export(&doc, ExportFormat::Yaml).unwrap();
        let back = parse_export(&yaml, ExportFormat::Yaml).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_parse_export_rejects_unknown_key_reference() {
        let json_doc = r#"{
            "name": "digest",
            "trigger": "manual",
            "steps": [
                {"key": "a", "name": "A", "type": "action", "action": "log_message",
                 "position": 1, "dependsOn": ["missing"]}
            ],
            "version": 1
        }"#;
        let err = parse_export(json_doc, ExportFormat::Json).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownDependency(_)));
    }

    #[test]
    fn test_parse_export_rejects_garbage() {
        let err = parse_export("{not json", ExportFormat::Json).unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("YAML".parse::<ExportFormat>().unwrap(), ExportFormat::Yaml);
        assert_eq!(
            ExportFormat::from_extension(std::path::Path::new("wf.yml")),
            ExportFormat::Yaml
        );
        assert_eq!(
            ExportFormat::from_extension(std::path::Path::new("wf.json")),
            ExportFormat::Json
        );
        assert!("toml".parse::<ExportFormat>().is_err());
    }
}
