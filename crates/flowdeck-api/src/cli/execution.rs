//! Execution subcommands: run, cancel, executions, execution, logs.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use flowdeck_core::event::EventBus;
use flowdeck_types::event::WorkflowEvent;
use flowdeck_types::execution::{ExecutionDetail, ExecutionQuery, ExecutionStatus};
use flowdeck_types::log::{LogLevel, LogQuery};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{parse_json_arg, print_json, resolve_workflow, resolve_workflow_id, styled_status, styled_step_status};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run_workflow(
    state: &AppState,
    target: &str,
    data: Option<&str>,
    data_file: Option<&Path>,
    detach: bool,
    json: bool,
) -> Result<()> {
    let service = &state.workflow_service;
    let tenant = &state.tenant_id;
    let workflow = resolve_workflow(state, target).await?;
    let trigger_data = read_trigger_data(data, data_file).await?;

    // Subscribe before starting so no progress event is missed.
    let receiver = service.subscribe();
    let execution_id = service
        .start_workflow(tenant, &workflow.id, trigger_data)
        .await?;

    if detach {
        if json {
            return print_json(&json!({"executionId": execution_id, "status": "running"}));
        }
        println!();
        println!(
            "  {} Started '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  Execution: {execution_id}");
        println!(
            "  Check progress: {}",
            style(format!("flowdeck execution {execution_id}")).dim()
        );
        println!();
        return Ok(());
    }

    if !json {
        println!();
        println!(
            "  {} Running '{}' ({})",
            style(">").cyan().bold(),
            style(&workflow.name).cyan(),
            style(execution_id).dim()
        );
    }

    let follow = EventBus::follow(receiver, execution_id, |event| {
        if !json {
            print_event(event);
        }
    });
    tokio::pin!(follow);

    tokio::select! {
        _ = &mut follow => {}
        _ = tokio::signal::ctrl_c() => {
            if !json {
                println!("  {} Cancelling...", style("!").yellow().bold());
            }
            service.cancel_execution(tenant, &execution_id).await?;
            follow.await;
        }
    }

    let detail = service.get_execution(tenant, &execution_id).await?;
    if json {
        print_json(&detail)?;
    } else {
        print_detail(&detail);
    }

    match detail.execution.status {
        ExecutionStatus::Failed => bail!(
            "Execution failed: {}",
            detail.execution.error.as_deref().unwrap_or("unknown error")
        ),
        ExecutionStatus::Cancelled => bail!("Execution was cancelled"),
        _ => Ok(()),
    }
}

/// Trigger data from `--data`, `--data-file`, or an empty object.
async fn read_trigger_data(data: Option<&str>, data_file: Option<&Path>) -> Result<Value> {
    if let Some(raw) = data {
        return parse_json_arg(raw, "trigger data");
    }
    if let Some(path) = data_file {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return parse_json_arg(&raw, "trigger data");
    }
    Ok(json!({}))
}

/// One styled line per progress event.
pub fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::ExecutionStarted {
            workflow_name,
            trigger,
            ..
        } => {
            println!("  {} {workflow_name} started ({trigger})", style("-").dim());
        }
        WorkflowEvent::StepStarted {
            step_name, attempt, ..
        } => {
            if *attempt > 1 {
                println!("    {} {step_name} (attempt {attempt})", style("~").yellow());
            } else {
                println!("    {} {step_name}", style("~").dim());
            }
        }
        WorkflowEvent::StepCompleted {
            step_name,
            duration_ms,
            ..
        } => {
            println!(
                "    {} {step_name} {}",
                style("✓").green(),
                style(format!("{duration_ms}ms")).dim()
            );
        }
        WorkflowEvent::StepSkipped {
            step_name, reason, ..
        } => {
            println!("    {} {step_name} skipped: {reason}", style("-").dim());
        }
        WorkflowEvent::StepRetrying {
            step_name,
            attempt,
            delay_ms,
            error,
            ..
        } => {
            println!(
                "    {} {step_name} attempt {attempt} failed, retrying in {delay_ms}ms: {error}",
                style("↻").yellow()
            );
        }
        WorkflowEvent::StepFailed {
            step_name, error, ..
        } => {
            println!("    {} {step_name}: {error}", style("✗").red());
        }
        WorkflowEvent::ExecutionCompleted {
            duration_ms,
            steps_completed,
            ..
        } => {
            println!(
                "  {} completed {steps_completed} step(s) in {duration_ms}ms",
                style("✓").green().bold()
            );
        }
        WorkflowEvent::ExecutionFailed { error, .. } => {
            println!("  {} failed: {error}", style("✗").red().bold());
        }
        WorkflowEvent::ExecutionCancelled { .. } => {
            println!("  {} cancelled", style("!").yellow().bold());
        }
    }
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn cancel_execution(state: &AppState, execution_id: &Uuid, json: bool) -> Result<()> {
    let cancelled = state
        .workflow_service
        .cancel_execution(&state.tenant_id, execution_id)
        .await?;

    if json {
        return print_json(&json!({"executionId": execution_id, "cancelled": cancelled}));
    }
    println!();
    if cancelled {
        println!(
            "  {} Cancelled execution {}",
            style("*").green().bold(),
            execution_id
        );
    } else {
        println!("  Execution {execution_id} already finished.");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

pub async fn list_executions(
    state: &AppState,
    target: &str,
    status: Option<&str>,
    limit: u32,
    offset: u32,
    json: bool,
) -> Result<()> {
    let workflow = resolve_workflow(state, target).await?;
    let query = ExecutionQuery {
        status: status
            .map(|s| s.parse::<ExecutionStatus>().map_err(|e| anyhow!(e)))
            .transpose()?,
        limit,
        offset,
    };
    let executions = state
        .workflow_service
        .get_executions(&state.tenant_id, &workflow.id, &query)
        .await?;

    if json {
        return print_json(&executions);
    }

    if executions.is_empty() {
        println!();
        println!("  No executions for '{}'.", workflow.name);
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Version"),
            Cell::new("Started"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for e in &executions {
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(styled_status(e.status)),
            Cell::new(e.workflow_version),
            Cell::new(e.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(e.duration_ms.map(|d| format!("{d}ms")).unwrap_or_default()),
            Cell::new(e.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn show_execution(state: &AppState, execution_id: &Uuid, json: bool) -> Result<()> {
    let detail = state
        .workflow_service
        .get_execution(&state.tenant_id, execution_id)
        .await?;

    if json {
        return print_json(&detail);
    }
    print_detail(&detail);
    Ok(())
}

fn print_detail(detail: &ExecutionDetail) {
    let execution = &detail.execution;
    println!();
    println!(
        "  Execution {} {}",
        style(execution.id).cyan(),
        styled_status(execution.status)
    );
    println!("  Workflow:  {} (v{})", execution.workflow_id, execution.workflow_version);
    println!("  Started:   {}", execution.started_at.to_rfc3339());
    if let Some(completed) = execution.completed_at {
        println!("  Completed: {}", completed.to_rfc3339());
    }
    if let Some(ms) = execution.duration_ms {
        println!("  Duration:  {ms}ms");
    }
    if let Some(err) = &execution.error {
        println!("  Error:     {}", style(err).red());
    }

    if !detail.steps.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Status"),
                Cell::new("Attempts"),
                Cell::new("Output"),
            ]);
        for step in &detail.steps {
            let output = match (&step.error, &step.output) {
                (Some(err), _) => err.clone(),
                (None, Some(out)) => truncate(&out.to_string(), 60),
                (None, None) => String::new(),
            };
            table.add_row(vec![
                Cell::new(&step.step_name),
                Cell::new(styled_step_status(step.status)),
                Cell::new(step.attempts),
                Cell::new(output),
            ]);
        }
        println!();
        println!("{table}");
    }
    println!();
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

pub async fn show_logs(
    state: &AppState,
    target: Option<&str>,
    execution_id: Option<Uuid>,
    level: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let query = LogQuery {
        workflow_id: resolve_workflow_id(state, target).await?,
        execution_id,
        level: level
            .map(|l| l.parse::<LogLevel>().map_err(|e| anyhow!(e)))
            .transpose()?,
        limit,
        ..LogQuery::default()
    };
    let logs = state
        .workflow_service
        .get_logs(&state.tenant_id, &query)
        .await?;

    if json {
        return print_json(&logs);
    }

    if logs.is_empty() {
        println!();
        println!("  No log entries.");
        println!();
        return Ok(());
    }

    println!();
    for entry in &logs {
        let level = match entry.level {
            LogLevel::Error => style(entry.level.as_str()).red().to_string(),
            LogLevel::Warn => style(entry.level.as_str()).yellow().to_string(),
            LogLevel::Info => style(entry.level.as_str()).green().to_string(),
            LogLevel::Debug => style(entry.level.as_str()).dim().to_string(),
        };
        println!(
            "  {} {:>5} {}",
            style(entry.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            level,
            entry.message
        );
        if let Some(data) = &entry.data {
            println!("        {}", style(truncate(&data.to_string(), 100)).dim());
        }
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_trigger_data_sources() {
        assert_eq!(read_trigger_data(None, None).await.unwrap(), json!({}));
        assert_eq!(
            read_trigger_data(Some(r#"{"a":1}"#), None).await.unwrap(),
            json!({"a": 1})
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        tokio::fs::write(&path, r#"{"email":"a@example.com"}"#)
            .await
            .unwrap();
        let data = read_trigger_data(None, Some(&path)).await.unwrap();
        assert_eq!(data["email"], "a@example.com");

        assert!(read_trigger_data(Some("not json"), None).await.is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
