//! Trigger routing for event and webhook workflows.
//!
//! `TriggerRouter` turns external signals into executions:
//! - domain events go to every active `event` workflow whose
//!   `triggerConfig.eventType` matches and whose optional `triggerConfig.when`
//!   JEXL filter holds over `{event: payload}`;
//! - webhook deliveries go to one `webhook` workflow after its HMAC signature
//!   is checked against `triggerConfig.secret`.
//!
//! Signature checking is behind the `SignatureVerifier` trait so the crypto
//! lives in the infrastructure layer.

use std::sync::Arc;

use flowdeck_types::error::RepositoryError;
use flowdeck_types::workflow::{TriggerKind, Workflow};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::repository::{WorkflowFilter, WorkflowRepository};

use super::executor::{ExecutorError, WorkflowEngine};
use super::expression::FilterEvaluator;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} does not accept webhooks")]
    NotWebhookTriggered(Uuid),

    #[error("workflow {0} is inactive")]
    Inactive(Uuid),

    #[error("webhook signature missing or invalid")]
    InvalidSignature,

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Verifies a webhook signature over the raw request body.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, secret: &str, body: &[u8], signature: &str) -> bool;
}

/// An execution started by a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredRun {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
}

// ---------------------------------------------------------------------------
// TriggerRouter
// ---------------------------------------------------------------------------

pub struct TriggerRouter<R: WorkflowRepository> {
    repo: Arc<R>,
    engine: Arc<WorkflowEngine<R>>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl<R: WorkflowRepository + 'static> TriggerRouter<R> {
    pub fn new(
        repo: Arc<R>,
        engine: Arc<WorkflowEngine<R>>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            repo,
            engine,
            verifier,
        }
    }

    /// Start every matching event workflow. Runs proceed in the background;
    /// the started executions are returned.
    pub async fn dispatch_event(
        &self,
        tenant_id: &Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<Vec<TriggeredRun>, TriggerError> {
        let filter = WorkflowFilter {
            trigger: Some(TriggerKind::Event),
            is_active: Some(true),
        };
        let candidates = self.repo.list_workflows(tenant_id, &filter).await?;
        let matching = select_event_workflows(candidates, event_type, &payload);

        let trigger_data = json!({
            "trigger": "event",
            "eventType": event_type,
            "payload": payload,
        });

        let mut started = Vec::with_capacity(matching.len());
        for workflow_id in matching {
            match self
                .engine
                .start_workflow(tenant_id, &workflow_id, trigger_data.clone())
                .await
            {
                Ok(execution_id) => started.push(TriggeredRun {
                    workflow_id,
                    execution_id,
                }),
                // One broken workflow does not stop delivery to the others.
                Err(e) => {
                    tracing::warn!(%workflow_id, event_type, error = %e, "event workflow could not start");
                }
            }
        }

        tracing::info!(event_type, started = started.len(), "event dispatched");
        Ok(started)
    }

    /// Verify and start a webhook delivery for one workflow.
    pub async fn handle_webhook(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<TriggeredRun, TriggerError> {
        let workflow = self
            .repo
            .get_workflow(tenant_id, workflow_id)
            .await?
            .ok_or(TriggerError::WorkflowNotFound(*workflow_id))?;
        if workflow.trigger != TriggerKind::Webhook {
            return Err(TriggerError::NotWebhookTriggered(workflow.id));
        }
        if !workflow.is_active {
            return Err(TriggerError::Inactive(workflow.id));
        }

        if let Some(secret) = webhook_secret(&workflow) {
            let valid = signature.is_some_and(|sig| self.verifier.verify(secret, body, sig));
            if !valid {
                tracing::warn!(workflow_id = %workflow.id, "rejected webhook with bad signature");
                return Err(TriggerError::InvalidSignature);
            }
        }

        let payload = parse_body(body)?;
        let execution_id = self
            .engine
            .start_workflow(
                tenant_id,
                workflow_id,
                json!({"trigger": "webhook", "payload": payload}),
            )
            .await?;

        Ok(TriggeredRun {
            workflow_id: workflow.id,
            execution_id,
        })
    }
}

fn webhook_secret(workflow: &Workflow) -> Option<&str> {
    workflow
        .trigger_config
        .get("secret")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn parse_body(body: &[u8]) -> Result<Value, TriggerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| TriggerError::InvalidPayload(e.to_string()))
}

/// Ids of the workflows an event of `event_type` should start.
///
/// A `when` filter that fails to evaluate excludes the workflow.
fn select_event_workflows(candidates: Vec<Workflow>, event_type: &str, payload: &Value) -> Vec<Uuid> {
    let evaluator = FilterEvaluator::new();
    let filter_context = json!({"event": payload});

    candidates
        .into_iter()
        .filter(|wf| {
            wf.trigger_config.get("eventType").and_then(Value::as_str) == Some(event_type)
        })
        .filter(|wf| {
            let Some(when) = wf.trigger_config.get("when").and_then(Value::as_str) else {
                return true;
            };
            match evaluator.matches(when, &filter_context) {
                Ok(matched) => matched,
                Err(e) => {
                    tracing::warn!(workflow_id = %wf.id, when, error = %e, "when filter failed");
                    false
                }
            }
        })
        .map(|wf| wf.id)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
