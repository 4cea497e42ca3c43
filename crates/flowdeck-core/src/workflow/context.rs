//! Run context of a single execution.
//!
//! `WorkflowContext` holds what an execution accumulates: the variables it
//! started with, the trigger payload, and the write-once results of the steps
//! it ran. Templates never read it directly; before each step the engine takes
//! an immutable [`ContextSnapshot`] that the resolver and condition evaluator
//! work against.

use std::collections::{HashMap, HashSet};

use flowdeck_types::config::EngineSettings;
use flowdeck_types::execution::ExecutionContextRecord;
use flowdeck_types::export::REDACTED;
use flowdeck_types::workflow::{VariableType, WorkflowVariable};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Upper bound on `reference` variable indirection.
const MAX_REFERENCE_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ContextError {
    /// A step result was already recorded for this execution.
    #[error("result for step '{0}' already recorded")]
    AlreadyRecorded(String),

    /// Accumulated step results exceed the configured budget.
    #[error("total context size ({size} bytes) exceeds maximum ({max} bytes)")]
    TooLarge { size: usize, max: usize },
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub max_step_output_bytes: usize,
    pub max_context_bytes: usize,
}

impl From<&EngineSettings> for ContextLimits {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_step_output_bytes: settings.max_step_output_bytes,
            max_context_bytes: settings.max_context_bytes,
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        (&EngineSettings::default()).into()
    }
}

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Mutable per-execution state.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    variables: Map<String, Value>,
    secret_names: HashSet<String>,
    trigger_data: Value,
    step_results: Map<String, Value>,
    results_size: usize,
    limits: ContextLimits,
}

impl WorkflowContext {
    /// Build the initial context.
    ///
    /// Workflow-scoped variables shadow tenant-global ones with the same name.
    /// `reference` variables take the value of the variable they name.
    pub fn new(
        global_variables: &[WorkflowVariable],
        workflow_variables: &[WorkflowVariable],
        trigger_data: Value,
        limits: ContextLimits,
    ) -> Self {
        let mut merged: Vec<&WorkflowVariable> = Vec::new();
        for var in global_variables.iter().chain(workflow_variables) {
            merged.retain(|existing| existing.name != var.name);
            merged.push(var);
        }

        let by_name: HashMap<&str, &WorkflowVariable> =
            merged.iter().map(|v| (v.name.as_str(), *v)).collect();

        let mut variables = Map::new();
        let mut secret_names = HashSet::new();
        for var in &merged {
            let value = follow_reference(&by_name, var);
            if var.is_sensitive() {
                secret_names.insert(var.name.clone());
            }
            variables.insert(var.name.clone(), value);
        }

        Self {
            variables,
            secret_names,
            trigger_data,
            step_results: Map::new(),
            results_size: 0,
            limits,
        }
    }

    /// Record a step's result.
    ///
    /// Results are write-once per step id. Outputs larger than the per-step
    /// limit are replaced with a truncation marker; exceeding the total budget
    /// is an error.
    pub fn record_result(&mut self, step_id: &str, output: Value) -> Result<(), ContextError> {
        if self.step_results.contains_key(step_id) {
            return Err(ContextError::AlreadyRecorded(step_id.to_string()));
        }

        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        let (stored, stored_size) = if size > self.limits.max_step_output_bytes {
            tracing::warn!(
                step_id,
                size,
                max = self.limits.max_step_output_bytes,
                "step output exceeds size limit, truncating"
            );
            let marker = json!({
                "_truncated": true,
                "_originalSize": size,
            });
            (marker, 64)
        } else {
            (output, size)
        };

        let total = self.results_size + stored_size;
        if total > self.limits.max_context_bytes {
            return Err(ContextError::TooLarge {
                size: total,
                max: self.limits.max_context_bytes,
            });
        }

        self.results_size = total;
        self.step_results.insert(step_id.to_string(), stored);
        Ok(())
    }

    pub fn result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }

    pub fn result_count(&self) -> usize {
        self.step_results.len()
    }

    pub fn trigger_data(&self) -> &Value {
        &self.trigger_data
    }

    /// Immutable lookup view for the next step.
    ///
    /// Flat keys: variables, then top-level trigger fields, then step results
    /// (later sources win). The namespaced roots `variables`, `trigger` and
    /// `steps` are always present and take precedence over flat keys of the
    /// same name.
    pub fn snapshot(&self) -> ContextSnapshot {
        let mut root = self.variables.clone();
        if let Value::Object(fields) = &self.trigger_data {
            for (key, value) in fields {
                root.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.step_results {
            root.insert(key.clone(), value.clone());
        }
        root.insert("variables".to_string(), Value::Object(self.variables.clone()));
        root.insert("trigger".to_string(), self.trigger_data.clone());
        root.insert("steps".to_string(), Value::Object(self.step_results.clone()));

        ContextSnapshot { root: Value::Object(root) }
    }

    /// Persistable form with secret variable values redacted.
    pub fn to_record(&self) -> ExecutionContextRecord {
        let variables = self
            .variables
            .iter()
            .map(|(name, value)| {
                if self.secret_names.contains(name) {
                    (name.clone(), json!(REDACTED))
                } else {
                    (name.clone(), value.clone())
                }
            })
            .collect();

        ExecutionContextRecord {
            variables,
            step_results: self.step_results.clone(),
        }
    }
}

/// Value of `var`, following `reference` variables to the variable they name.
///
/// Only targets that are themselves references are followed further. A
/// missing target is null; a chain deeper than [`MAX_REFERENCE_DEPTH`] stops
/// at the value its last hop reached.
fn follow_reference<'a>(
    by_name: &HashMap<&str, &'a WorkflowVariable>,
    var: &'a WorkflowVariable,
) -> Value {
    let mut current = var;
    for _ in 0..MAX_REFERENCE_DEPTH {
        if current.var_type != VariableType::Reference {
            return current.value.clone();
        }
        let Some(name) = current.value.as_str() else {
            return current.value.clone();
        };
        match by_name.get(name) {
            Some(target) => current = *target,
            None => return Value::Null,
        }
    }
    current.value.clone()
}

// ---------------------------------------------------------------------------
// ContextSnapshot
// ---------------------------------------------------------------------------

/// Immutable merged view used for template and condition lookups.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    root: Value,
}

impl ContextSnapshot {
    /// A snapshot over an arbitrary JSON object.
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Copy of this snapshot with `loop.item` and `loop.index` bound.
    pub fn with_loop(&self, item: &Value, index: usize) -> Self {
        let mut root = self.root.clone();
        if let Value::Object(map) = &mut root {
            map.insert("loop".to_string(), json!({"item": item, "index": index}));
        }
        Self { root }
    }

    /// Look up a dotted path. Numeric segments index arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.root, path)
    }

    /// Look up a dotted path, yielding `null` when unresolvable.
    pub fn get(&self, path: &str) -> Value {
        self.lookup(path).cloned().unwrap_or(Value::Null)
    }
}

/// Walk a dotted path through nested objects and arrays.
pub fn lookup_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        let segment = segment.trim();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn var(name: &str, value: Value, workflow: Option<Uuid>) -> WorkflowVariable {
        let now = Utc::now();
        WorkflowVariable {
            id: Uuid::now_v7(),
            tenant_id: Uuid::nil(),
            workflow_id: workflow,
            name: name.to_string(),
            value,
            var_type: VariableType::String,
            is_secret: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_workflow_variables_shadow_globals() {
        let wf = Some(Uuid::now_v7());
        let ctx = WorkflowContext::new(
            &[var("greeting", json!("hi"), None), var("region", json!("eu"), None)],
            &[var("greeting", json!("hello"), wf)],
            json!({}),
            ContextLimits::default(),
        );
        let snap = ctx.snapshot();
        assert_eq!(snap.get("greeting"), json!("hello"));
        assert_eq!(snap.get("region"), json!("eu"));
        assert_eq!(snap.get("variables.greeting"), json!("hello"));
    }

    #[test]
    fn test_trigger_and_results_take_precedence() {
        let mut ctx = WorkflowContext::new(
            &[var("name", json!("static"), None)],
            &[],
            json!({"name": "from-trigger", "memberId": 7}),
            ContextLimits::default(),
        );
        assert_eq!(ctx.snapshot().get("name"), json!("from-trigger"));
        assert_eq!(ctx.snapshot().get("trigger.memberId"), json!(7));

        ctx.record_result("name", json!("from-step")).unwrap();
        assert_eq!(ctx.snapshot().get("name"), json!("from-step"));
        assert_eq!(ctx.snapshot().get("steps.name"), json!("from-step"));
    }

    #[test]
    fn test_results_are_write_once() {
        let mut ctx = WorkflowContext::new(&[], &[], json!({}), ContextLimits::default());
        ctx.record_result("s1", json!({"ok": true})).unwrap();
        let err = ctx.record_result("s1", json!({"ok": false})).unwrap_err();
        assert!(matches!(err, ContextError::AlreadyRecorded(_)));
        assert_eq!(ctx.result("s1"), Some(&json!({"ok": true})));
        assert_eq!(ctx.result_count(), 1);
    }

    #[test]
    fn test_oversized_output_truncated() {
        let limits = ContextLimits { max_step_output_bytes: 16, max_context_bytes: 1024 };
        let mut ctx = WorkflowContext::new(&[], &[], json!({}), limits);
        ctx.record_result("big", json!("x".repeat(100))).unwrap();
        assert_eq!(ctx.result("big").unwrap()["_truncated"], true);
    }

    #[test]
    fn test_total_context_budget_enforced() {
        let limits = ContextLimits { max_step_output_bytes: 1000, max_context_bytes: 120 };
        let mut ctx = WorkflowContext::new(&[], &[], json!({}), limits);
        ctx.record_result("a", json!("y".repeat(80))).unwrap();
        let err = ctx.record_result("b", json!("y".repeat(80))).unwrap_err();
        assert!(matches!(err, ContextError::TooLarge { .. }));
    }

    #[test]
    fn test_secrets_redacted_in_record() {
        let mut secret = var("apiKey", json!("s3cr3t"), None);
        secret.is_secret = true;
        let ctx = WorkflowContext::new(
            &[secret, var("plain", json!("visible"), None)],
            &[],
            json!({}),
            ContextLimits::default(),
        );
        // Secrets stay usable at run time
        assert_eq!(ctx.snapshot().get("apiKey"), json!("s3cr3t"));

        let record = ctx.to_record();
        assert_eq!(record.variables["apiKey"], json!(REDACTED));
        assert_eq!(record.variables["plain"], json!("visible"));
    }

    #[test]
    fn test_reference_variables_follow_target() {
        let mut alias = var("contact", json!("adminEmail"), None);
        alias.var_type = VariableType::Reference;
        let ctx = WorkflowContext::new(
            &[var("adminEmail", json!("ops@example.com"), None), alias],
            &[],
            json!({}),
            ContextLimits::default(),
        );
        assert_eq!(ctx.snapshot().get("contact"), json!("ops@example.com"));
    }

    #[test]
    fn test_reference_to_value_matching_a_variable_name_stops() {
        // `support` is a plain string that happens to spell another variable's name
        let mut alias = var("contact", json!("support"), None);
        alias.var_type = VariableType::Reference;
        let ctx = WorkflowContext::new(
            &[
                var("support", json!("billing"), None),
                var("billing", json!("should-not-chain"), None),
                alias,
            ],
            &[],
            json!({}),
            ContextLimits::default(),
        );
        assert_eq!(ctx.snapshot().get("contact"), json!("billing"));
    }

    #[test]
    fn test_reference_chains_and_missing_targets() {
        let mut first = var("primary", json!("secondary"), None);
        first.var_type = VariableType::Reference;
        let mut second = var("secondary", json!("target"), None);
        second.var_type = VariableType::Reference;
        let mut dangling = var("dangling", json!("nowhere"), None);
        dangling.var_type = VariableType::Reference;
        let mut looping = var("looping", json!("looping"), None);
        looping.var_type = VariableType::Reference;

        let ctx = WorkflowContext::new(
            &[var("target", json!({"port": 8080}), None), first, second, dangling, looping],
            &[],
            json!({}),
            ContextLimits::default(),
        );
        let snap = ctx.snapshot();
        assert_eq!(snap.get("primary"), json!({"port": 8080}));
        assert_eq!(snap.get("secondary"), json!({"port": 8080}));
        assert_eq!(snap.get("dangling"), Value::Null);
        assert_eq!(snap.get("looping"), json!("looping"));
    }

    #[test]
    fn test_snapshot_lookup_paths() {
        let snap = ContextSnapshot::from_value(json!({
            "items": [{"name": "first"}, {"name": "second"}],
            "user": {"profile": {"age": 30}}
        }));
        assert_eq!(snap.get("items.1.name"), json!("second"));
        assert_eq!(snap.get("user.profile.age"), json!(30));
        assert_eq!(snap.get(" user . profile . age "), json!(30));
        assert_eq!(snap.get("user.missing.deeper"), Value::Null);
        assert_eq!(snap.get("items.9"), Value::Null);
        assert!(snap.lookup("").is_none());
    }

    #[test]
    fn test_snapshot_with_loop() {
        let snap = ContextSnapshot::from_value(json!({}));
        let looped = snap.with_loop(&json!({"id": 4}), 2);
        assert_eq!(looped.get("loop.item.id"), json!(4));
        assert_eq!(looped.get("loop.index"), json!(2));
        assert!(snap.lookup("loop").is_none());
    }
}
