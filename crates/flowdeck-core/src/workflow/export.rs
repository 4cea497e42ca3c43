//! Portable export documents and import planning.
//!
//! Export replaces step ids with readable export-local keys (derived from the
//! step name) and redacts secret variable values. Import validates the
//! document, assigns fresh step ids in dependency order, and drops redacted
//! variables unless the caller supplies their real values. Template
//! references to other steps (`{{steps.<id>...}}`) are rewritten in both
//! directions so imported workflows keep reading the right results.

use std::collections::{HashMap, HashSet};

use flowdeck_types::export::{ExportedStep, ExportedVariable, REDACTED, WorkflowExport};
use flowdeck_types::workflow::{
    Condition, NewStep, NewVariable, NewWorkflow, Workflow, WorkflowStep, WorkflowVariable,
};
use serde_json::Value;
use uuid::Uuid;

use super::dag;
use super::definition::{WorkflowError, validate_export};

/// Name under which a redacted webhook signing secret is reported and
/// supplied on import. Variable names never contain dots, so it cannot clash.
pub const TRIGGER_SECRET: &str = "triggerConfig.secret";

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Build the export document of a workflow.
pub fn build_export(
    workflow: &Workflow,
    steps: &[WorkflowStep],
    variables: &[WorkflowVariable],
) -> WorkflowExport {
    let mut ordered: Vec<&WorkflowStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.position);

    let mut used = HashSet::new();
    let keys: HashMap<String, String> = ordered
        .iter()
        .map(|s| (s.id.to_string(), unique_key(&s.name, &mut used)))
        .collect();
    let rename = |old: &str| keys.get(old).cloned();

    let exported_steps = ordered
        .iter()
        .map(|s| ExportedStep {
            key: keys[&s.id.to_string()].clone(),
            name: s.name.clone(),
            step_type: s.step_type,
            action: s.action,
            config: rewrite_step_refs(&s.config, &rename),
            position: s.position,
            condition: s.condition.as_ref().map(|c| rewrite_condition(c, &rename)),
            retry_policy: s.retry_policy,
            timeout_ms: s.timeout_ms,
            depends_on: s
                .dependencies
                .iter()
                .filter_map(|d| keys.get(&d.to_string()).cloned())
                .collect(),
            is_active: s.is_active,
        })
        .collect();

    let exported_variables = variables
        .iter()
        .map(|v| ExportedVariable {
            name: v.name.clone(),
            value: if v.is_sensitive() {
                Value::String(REDACTED.to_string())
            } else {
                v.value.clone()
            },
            var_type: v.var_type,
            is_secret: v.is_sensitive(),
        })
        .collect();

    WorkflowExport {
        name: workflow.name.clone(),
        description: workflow.description.clone(),
        trigger: workflow.trigger,
        trigger_config: redact_trigger_secret(&workflow.trigger_config),
        steps: exported_steps,
        variables: exported_variables,
        metadata: workflow.metadata.clone(),
        tags: workflow.tags.clone(),
        version: workflow.version,
    }
}

/// Trigger config with a non-empty `secret` replaced by the placeholder.
fn redact_trigger_secret(config: &Value) -> Value {
    let mut config = config.clone();
    if let Some(secret) = config.get_mut("secret") {
        if secret.as_str().is_some_and(|s| !s.is_empty()) {
            *secret = Value::String(REDACTED.to_string());
        }
    }
    config
}

/// Lowercase, dash-separated key from a step name, unique within `used`.
fn unique_key(name: &str, used: &mut HashSet<String>) -> String {
    let mut base = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            base.push(c.to_ascii_lowercase());
        } else if !base.ends_with('-') && !base.is_empty() {
            base.push('-');
        }
    }
    let base = match base.trim_end_matches('-') {
        "" => "step".to_string(),
        trimmed => trimmed.to_string(),
    };

    let mut key = base.clone();
    let mut n = 2;
    while used.contains(&key) {
        key = format!("{base}-{n}");
        n += 1;
    }
    used.insert(key.clone());
    key
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// A step to create, with its pre-assigned id.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: Uuid,
    pub key: String,
    pub step: NewStep,
}

/// Everything needed to recreate an exported workflow.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub workflow: NewWorkflow,
    /// Steps in dependency order; each depends only on earlier entries.
    pub steps: Vec<PlannedStep>,
    pub variables: Vec<NewVariable>,
    /// Names of secret variables skipped because no real value was supplied,
    /// plus [`TRIGGER_SECRET`] when the webhook secret was.
    pub skipped_variables: Vec<String>,
}

/// Validate `doc` and plan its import.
///
/// `secrets` supplies real values for redacted variables by name.
pub fn plan_import(
    doc: &WorkflowExport,
    secrets: &HashMap<String, Value>,
) -> Result<ImportPlan, WorkflowError> {
    validate_export(doc)?;
    let ordered = dag::dependency_order(&doc.steps)?;

    let ids: HashMap<String, Uuid> = doc
        .steps
        .iter()
        .map(|s| (s.key.clone(), Uuid::now_v7()))
        .collect();
    let rename = |key: &str| ids.get(key).map(Uuid::to_string);

    let steps = ordered
        .into_iter()
        .map(|s| PlannedStep {
            id: ids[&s.key],
            key: s.key.clone(),
            step: NewStep {
                name: s.name.clone(),
                step_type: s.step_type,
                action: s.action,
                config: rewrite_step_refs(&s.config, &rename),
                position: Some(s.position),
                condition: s.condition.as_ref().map(|c| rewrite_condition(c, &rename)),
                retry_policy: Some(s.retry_policy),
                timeout_ms: s.timeout_ms,
                dependencies: s.depends_on.iter().map(|k| ids[k]).collect(),
                is_active: s.is_active,
            },
        })
        .collect();

    let mut variables = Vec::new();
    let mut skipped_variables = Vec::new();
    for var in &doc.variables {
        let value = if var.is_redacted() {
            match secrets.get(&var.name) {
                Some(real) => real.clone(),
                None => {
                    skipped_variables.push(var.name.clone());
                    continue;
                }
            }
        } else {
            var.value.clone()
        };
        variables.push(NewVariable {
            workflow_id: None,
            name: var.name.clone(),
            value,
            var_type: var.var_type,
            is_secret: var.is_secret,
        });
    }

    // A webhook imported without its secret would accept unsigned
    // deliveries, so it stays inactive until the secret is set.
    let mut trigger_config = doc.trigger_config.clone();
    let mut is_active = true;
    if let Some(secret) = trigger_config.get_mut("secret") {
        if secret.as_str() == Some(REDACTED) {
            match secrets.get(TRIGGER_SECRET) {
                Some(real) => *secret = real.clone(),
                None => {
                    if let Value::Object(map) = &mut trigger_config {
                        map.remove("secret");
                    }
                    skipped_variables.push(TRIGGER_SECRET.to_string());
                    is_active = false;
                }
            }
        }
    }

    Ok(ImportPlan {
        workflow: NewWorkflow {
            name: doc.name.clone(),
            description: doc.description.clone(),
            trigger: doc.trigger,
            trigger_config,
            is_active,
            tags: doc.tags.clone(),
            metadata: doc.metadata.clone(),
        },
        steps,
        variables,
        skipped_variables,
    })
}

// ---------------------------------------------------------------------------
// Step reference rewriting
// ---------------------------------------------------------------------------

fn rewrite_condition(condition: &Condition, rename: &impl Fn(&str) -> Option<String>) -> Condition {
    Condition {
        operator: condition.operator.clone(),
        left: rewrite_step_refs(&condition.left, rename),
        right: rewrite_step_refs(&condition.right, rename),
    }
}

/// Rewrite step references inside every `{{...}}` token of `value`.
///
/// Both `steps.<ref>.rest` and a bare leading `<ref>.rest` are renamed.
fn rewrite_step_refs(value: &Value, rename: &impl Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(s) if s.contains("{{") => Value::String(rewrite_text(s, rename)),
        Value::Array(items) => Value::Array(items.iter().map(|v| rewrite_step_refs(v, rename)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), rewrite_step_refs(v, rename)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn rewrite_text(text: &str, rename: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..start + 2]);
        out.push_str(&rewrite_path(&after[..end], rename));
        out.push_str("}}");
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn rewrite_path(path: &str, rename: &impl Fn(&str) -> Option<String>) -> String {
    let trimmed = path.trim();
    let mut segments: Vec<String> = trimmed.split('.').map(str::to_string).collect();
    let target = if segments.first().map(String::as_str) == Some("steps") {
        1
    } else {
        0
    };
    match segments.get(target).and_then(|seg| rename(seg)) {
        Some(renamed) => {
            segments[target] = renamed;
            segments.join(".")
        }
        None => path.to_string(),
    }
}
