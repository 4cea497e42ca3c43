//! Step runner: routes a step to the handler for its type.
//!
//! Action-like step types dispatch their action kind; the structural types
//! (condition, parallel, loop, approval, delay) are implemented here on top of
//! the same action handlers.

use flowdeck_types::workflow::{ActionKind, Condition, StepType, WorkflowStep};
use futures_util::future::try_join_all;
use serde_json::{Value, json};
use uuid::Uuid;

use super::actions::{self, ActionContext};
use super::collaborators::{ActionServices, CollaboratorError};
use super::condition;
use super::context::ContextSnapshot;
use super::resolver::TemplateResolver;

/// Default cap on loop iterations when `maxIterations` is not configured.
pub const DEFAULT_MAX_LOOP_ITERATIONS: usize = 1000;

/// Collection approval requests are stored in.
pub const APPROVALS_COLLECTION: &str = "approvals";

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Failure of a single step attempt. Every variant is eligible for retry.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid step config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    ActionFailed(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("step timed out after {0}ms")]
    Timeout(u64),
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes one attempt of a step.
#[derive(Debug, Clone)]
pub struct StepRunner {
    services: ActionServices,
}

impl StepRunner {
    pub fn new(services: ActionServices) -> Self {
        Self { services }
    }

    /// Run `step` once.
    ///
    /// `resolved` is the step config after template resolution against
    /// `snapshot`; types that re-resolve per item (loop) or evaluate raw
    /// operands (condition) read `step.config` directly.
    pub async fn run(
        &self,
        tenant_id: &Uuid,
        step: &WorkflowStep,
        resolved: &Value,
        snapshot: &ContextSnapshot,
    ) -> Result<Value, StepError> {
        let ctx = ActionContext {
            tenant_id,
            snapshot,
            services: &self.services,
        };

        match step.step_type {
            StepType::Action | StepType::Notification | StepType::Integration | StepType::Custom => {
                let kind = step.action.ok_or_else(|| {
                    StepError::InvalidConfig(format!(
                        "step '{}' of type '{}' has no action",
                        step.name, step.step_type
                    ))
                })?;
                actions::dispatch(kind, resolved, ctx).await
            }
            StepType::Delay => actions::dispatch(ActionKind::Delay, resolved, ctx).await,
            StepType::Condition => run_condition(step, snapshot),
            StepType::Parallel => run_parallel(resolved, ctx).await,
            StepType::Loop => run_loop(step, resolved, ctx).await,
            StepType::Approval => run_approval(step, resolved, ctx).await,
        }
    }
}

fn parse_action(value: Option<&Value>, what: &str) -> Result<ActionKind, StepError> {
    let name = value
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::InvalidConfig(format!("{what} needs an 'action'")))?;
    name.parse::<ActionKind>().map_err(StepError::InvalidConfig)
}

/// `config.condition` (or the config itself) as a predicate; result `{result}`.
fn run_condition(step: &WorkflowStep, snapshot: &ContextSnapshot) -> Result<Value, StepError> {
    let raw = step.config.get("condition").unwrap_or(&step.config);
    let predicate: Condition = serde_json::from_value(raw.clone())
        .map_err(|e| StepError::InvalidConfig(format!("invalid condition: {e}")))?;
    let result = condition::evaluate(&predicate, &TemplateResolver::new(snapshot));
    Ok(json!({"result": result}))
}

/// Run every branch concurrently; the first failure fails the join.
async fn run_parallel(resolved: &Value, ctx: ActionContext<'_>) -> Result<Value, StepError> {
    let branches = resolved
        .get("branches")
        .and_then(Value::as_array)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| StepError::InvalidConfig("parallel step needs 'branches'".to_string()))?;

    let mut calls = Vec::with_capacity(branches.len());
    for branch in branches {
        let kind = parse_action(branch.get("action"), "parallel branch")?;
        let config = branch.get("config").cloned().unwrap_or_else(|| json!({}));
        calls.push(async move { actions::dispatch(kind, &config, ctx).await });
    }

    let results = try_join_all(calls).await?;
    Ok(json!({"branches": results}))
}

/// Run the configured action once per item, binding `loop.item`/`loop.index`.
async fn run_loop(
    step: &WorkflowStep,
    resolved: &Value,
    ctx: ActionContext<'_>,
) -> Result<Value, StepError> {
    let items = resolved
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| StepError::InvalidConfig("loop step needs an 'items' array".to_string()))?;
    let kind = parse_action(resolved.get("action"), "loop step")?;
    let max = resolved
        .get("maxIterations")
        .and_then(Value::as_u64)
        .map(|m| m as usize)
        .unwrap_or(DEFAULT_MAX_LOOP_ITERATIONS);
    if items.len() > max {
        return Err(StepError::InvalidConfig(format!(
            "loop over {} items exceeds maxIterations ({max})",
            items.len()
        )));
    }

    let template = step.config.get("config").cloned().unwrap_or_else(|| json!({}));
    let mut iterations = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let scoped = ctx.snapshot.with_loop(item, index);
        let config = TemplateResolver::new(&scoped).resolve(&template);
        let iteration_ctx = ActionContext { snapshot: &scoped, ..ctx };
        iterations.push(actions::dispatch(kind, &config, iteration_ctx).await?);
    }

    Ok(json!({"count": iterations.len(), "iterations": iterations}))
}

/// Create a pending approval request and complete immediately.
async fn run_approval(
    step: &WorkflowStep,
    resolved: &Value,
    ctx: ActionContext<'_>,
) -> Result<Value, StepError> {
    let request = json!({
        "stepId": step.id,
        "stepName": step.name,
        "message": resolved.get("message").cloned().unwrap_or(Value::Null),
        "approvers": resolved.get("approvers").cloned().unwrap_or_else(|| json!([])),
        "status": "pending",
    });
    let record = ctx
        .services
        .records
        .create_record(ctx.tenant_id, APPROVALS_COLLECTION, &request)
        .await?;

    Ok(json!({
        "approvalId": record.get("id").cloned().unwrap_or(Value::Null),
        "status": "pending",
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::Recorder;
    use flowdeck_types::workflow::RetryPolicy;
    use std::sync::Arc;

    fn step(step_type: StepType, action: Option<ActionKind>, config: Value) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            name: "test-step".to_string(),
            step_type,
            action,
            config,
            position: 1,
            condition: None,
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
            dependencies: vec![],
            is_active: true,
        }
    }

    async fn run(recorder: &Arc<Recorder>, step: &WorkflowStep, ctx: Value) -> Result<Value, StepError> {
        let runner = StepRunner::new(recorder.services());
        let snapshot = ContextSnapshot::from_value(ctx);
        let resolved = TemplateResolver::new(&snapshot).resolve(&step.config);
        runner.run(&Uuid::now_v7(), step, &resolved, &snapshot).await
    }

    #[tokio::test]
    async fn test_action_step_dispatches_kind() {
        let recorder = Recorder::new();
        let s = step(
            StepType::Notification,
            Some(ActionKind::SendNotification),
            json!({"recipients": ["{{userId}}"], "message": "Welcome {{name}}"}),
        );
        let out = run(&recorder, &s, json!({"userId": "u1", "name": "Sam"})).await.unwrap();
        assert_eq!(out["sent"], true);
        let sent = recorder.notifications.lock().unwrap();
        assert_eq!(sent[0].recipients, vec!["u1".to_string()]);
        assert_eq!(sent[0].body, "Welcome Sam");
    }

    #[tokio::test]
    async fn test_action_step_without_kind_fails() {
        let recorder = Recorder::new();
        let s = step(StepType::Action, None, json!({}));
        assert!(matches!(
            run(&recorder, &s, json!({})).await,
            Err(StepError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_condition_step_reports_result() {
        let recorder = Recorder::new();
        let s = step(
            StepType::Condition,
            None,
            json!({"condition": {"operator": "greater_than", "left": "{{score}}", "right": 10}}),
        );
        assert_eq!(run(&recorder, &s, json!({"score": 12})).await.unwrap(), json!({"result": true}));
        assert_eq!(run(&recorder, &s, json!({"score": 2})).await.unwrap(), json!({"result": false}));
    }

    #[tokio::test]
    async fn test_parallel_step_joins_branches() {
        let recorder = Recorder::new();
        let s = step(
            StepType::Parallel,
            None,
            json!({"branches": [
                {"action": "send_email", "config": {"to": "a@example.com", "subject": "A"}},
                {"action": "log_message", "config": {"message": "side"}}
            ]}),
        );
        let out = run(&recorder, &s, json!({})).await.unwrap();
        assert_eq!(out["branches"].as_array().unwrap().len(), 2);
        assert_eq!(recorder.email_count(), 1);
    }

    #[tokio::test]
    async fn test_parallel_branch_failure_fails_join() {
        let recorder = Recorder::failing_email();
        let s = step(
            StepType::Parallel,
            None,
            json!({"branches": [
                {"action": "send_email", "config": {"to": "a@example.com", "subject": "A"}},
                {"action": "log_message", "config": {"message": "ok"}}
            ]}),
        );
        assert!(run(&recorder, &s, json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_loop_step_binds_item_and_index() {
        let recorder = Recorder::new();
        let s = step(
            StepType::Loop,
            None,
            json!({
                "items": "{{members}}",
                "action": "send_email",
                "config": {"to": "{{loop.item.email}}", "subject": "Hi #{{loop.index}}"}
            }),
        );
        let ctx = json!({"members": [{"email": "a@x.io"}, {"email": "b@x.io"}]});
        let out = run(&recorder, &s, ctx).await.unwrap();
        assert_eq!(out["count"], 2);
        let emails = recorder.emails.lock().unwrap();
        assert_eq!(emails[1].to, vec!["b@x.io".to_string()]);
        assert_eq!(emails[1].subject, "Hi #1");
    }

    #[tokio::test]
    async fn test_loop_step_respects_max_iterations() {
        let recorder = Recorder::new();
        let s = step(
            StepType::Loop,
            None,
            json!({"items": [1, 2, 3], "action": "log_message", "maxIterations": 2,
                   "config": {"message": "x"}}),
        );
        assert!(run(&recorder, &s, json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_approval_step_creates_pending_request() {
        let recorder = Recorder::new();
        let s = step(StepType::Approval, None, json!({"message": "Approve?", "approvers": ["mod"]}));
        let out = run(&recorder, &s, json!({})).await.unwrap();
        assert_eq!(out, json!({"approvalId": "rec-1", "status": "pending"}));
        let records = recorder.records.lock().unwrap();
        assert_eq!(records[0].0, APPROVALS_COLLECTION);
        assert_eq!(records[0].1["status"], "pending");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_step_type() {
        let recorder = Recorder::new();
        let s = step(StepType::Delay, None, json!({"duration": 1, "unit": "seconds"}));
        let out = run(&recorder, &s, json!({})).await.unwrap();
        assert_eq!(out["delayedMs"], 1000);
    }
}
