//! Trigger subcommands: emit an event, deliver a webhook.
//!
//! Triggered runs execute in the background; unless `--no-wait` is given the
//! command follows their progress events until every run has finished.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;
use flowdeck_core::workflow::trigger::TriggeredRun;
use flowdeck_types::event::WorkflowEvent;
use flowdeck_types::execution::ExecutionStatus;
use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::execution::print_event;
use super::{parse_json_arg, print_json, resolve_workflow};
use crate::state::AppState;

pub async fn emit_event(
    state: &AppState,
    event_type: &str,
    payload: Option<&str>,
    no_wait: bool,
    json: bool,
) -> Result<()> {
    let payload = match payload {
        Some(raw) => parse_json_arg(raw, "event payload")?,
        None => Value::Null,
    };

    let receiver = state.workflow_service.subscribe();
    let runs = state
        .workflow_service
        .dispatch_event(&state.tenant_id, event_type, payload)
        .await?;

    if !json {
        println!();
        if runs.is_empty() {
            println!("  No active workflow listens for '{event_type}'.");
            println!();
            return Ok(());
        }
        println!(
            "  {} '{}' triggered {} workflow(s)",
            style(">").cyan().bold(),
            style(event_type).cyan(),
            runs.len()
        );
    }

    finish(state, receiver, &runs, no_wait, json).await
}

pub async fn deliver_webhook(
    state: &AppState,
    target: &str,
    body: Option<&str>,
    body_file: Option<&Path>,
    signature: Option<&str>,
    no_wait: bool,
    json: bool,
) -> Result<()> {
    let workflow = resolve_workflow(state, target).await?;
    let body: Vec<u8> = match (body, body_file) {
        (Some(raw), _) => raw.as_bytes().to_vec(),
        (None, Some(path)) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => Vec::new(),
    };

    let receiver = state.workflow_service.subscribe();
    let run = state
        .workflow_service
        .handle_webhook(&state.tenant_id, &workflow.id, &body, signature)
        .await?;

    if !json {
        println!();
        println!(
            "  {} Webhook accepted by '{}'",
            style(">").cyan().bold(),
            style(&workflow.name).cyan()
        );
    }

    finish(state, receiver, std::slice::from_ref(&run), no_wait, json).await
}

/// Report the started runs, optionally waiting for them to finish.
async fn finish(
    state: &AppState,
    receiver: broadcast::Receiver<WorkflowEvent>,
    runs: &[TriggeredRun],
    no_wait: bool,
    json: bool,
) -> Result<()> {
    if no_wait {
        if json {
            return print_json(&runs_json(runs, None));
        }
        for run in runs {
            println!("  Execution: {}", run.execution_id);
        }
        println!();
        return Ok(());
    }

    let pending: HashSet<Uuid> = runs.iter().map(|r| r.execution_id).collect();
    wait_for_executions(receiver, pending, |event| {
        if !json {
            print_event(event);
        }
    })
    .await;

    let mut statuses = Vec::with_capacity(runs.len());
    for run in runs {
        let detail = state
            .workflow_service
            .get_execution(&state.tenant_id, &run.execution_id)
            .await?;
        statuses.push(detail.execution.status);
    }

    if json {
        print_json(&runs_json(runs, Some(&statuses)))?;
    } else {
        println!();
    }

    let failed = statuses
        .iter()
        .filter(|s| **s == ExecutionStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{failed} of {} triggered execution(s) failed", runs.len());
    }
    Ok(())
}

/// Follow events until every pending execution has reached a terminal event.
///
/// Lagged receivers keep going; a closed channel ends the wait.
async fn wait_for_executions(
    mut receiver: broadcast::Receiver<WorkflowEvent>,
    mut pending: HashSet<Uuid>,
    mut on_event: impl FnMut(&WorkflowEvent),
) {
    while !pending.is_empty() {
        match receiver.recv().await {
            Ok(event) if pending.contains(&event.execution_id()) => {
                on_event(&event);
                if event.is_terminal() {
                    pending.remove(&event.execution_id());
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "trigger follower lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

fn runs_json(runs: &[TriggeredRun], statuses: Option<&[ExecutionStatus]>) -> Value {
    let items: Vec<Value> = runs
        .iter()
        .enumerate()
        .map(|(i, run)| {
            let mut item = json!({
                "workflowId": run.workflow_id,
                "executionId": run.execution_id,
            });
            if let Some(status) = statuses.and_then(|s| s.get(i)) {
                item["status"] = json!(status);
            }
            item
        })
        .collect();
    Value::Array(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(execution_id: Uuid) -> WorkflowEvent {
        WorkflowEvent::ExecutionCompleted {
            execution_id,
            workflow_id: Uuid::now_v7(),
            duration_ms: 5,
            steps_completed: 1,
        }
    }

    #[tokio::test]
    async fn test_wait_for_executions_until_all_terminal() {
        let (tx, rx) = broadcast::channel(16);
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let other = Uuid::now_v7();

        tx.send(completed(other)).unwrap();
        tx.send(completed(a)).unwrap();
        tx.send(completed(b)).unwrap();

        let mut seen = Vec::new();
        wait_for_executions(rx, HashSet::from([a, b]), |e| seen.push(e.execution_id())).await;
        assert_eq!(seen, vec![a, b]);
    }

    #[tokio::test]
    async fn test_wait_for_executions_ends_on_closed_channel() {
        let (tx, rx) = broadcast::channel::<WorkflowEvent>(4);
        drop(tx);
        let mut count = 0;
        wait_for_executions(rx, HashSet::from([Uuid::now_v7()]), |_| count += 1).await;
        assert_eq!(count, 0);
    }

    #[test]
    fn test_runs_json_includes_status_when_known() {
        let run = TriggeredRun {
            workflow_id: Uuid::nil(),
            execution_id: Uuid::nil(),
        };
        let value = runs_json(std::slice::from_ref(&run), Some(&[ExecutionStatus::Completed]));
        assert_eq!(value[0]["status"], json!("completed"));
        assert!(runs_json(&[run], None)[0].get("status").is_none());
    }
}
