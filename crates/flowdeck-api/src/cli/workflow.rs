//! Workflow definition subcommands: list, show, import, export, delete.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use flowdeck_core::repository::WorkflowFilter;
use flowdeck_core::workflow::definition::ExportFormat;
use flowdeck_types::workflow::TriggerKind;
use serde_json::{Value, json};

use super::{print_json, resolve_workflow};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list_workflows(
    state: &AppState,
    trigger: Option<&str>,
    active_only: bool,
    json: bool,
) -> Result<()> {
    let filter = WorkflowFilter {
        trigger: trigger
            .map(|t| t.parse::<TriggerKind>().map_err(|e| anyhow!(e)))
            .transpose()?,
        is_active: active_only.then_some(true),
    };
    let workflows = state
        .workflow_service
        .list_workflows(&state.tenant_id, &filter)
        .await?;

    if json {
        return print_json(&workflows);
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows found.");
        println!(
            "  Import one with: {}",
            style("flowdeck import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("ID"),
            Cell::new("Trigger"),
            Cell::new("Version"),
            Cell::new("Active"),
            Cell::new("Updated"),
        ]);

    for wf in &workflows {
        table.add_row(vec![
            Cell::new(&wf.name),
            Cell::new(wf.id),
            Cell::new(wf.trigger),
            Cell::new(wf.version),
            Cell::new(if wf.is_active { "yes" } else { "no" }),
            Cell::new(wf.updated_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

pub async fn show_workflow(state: &AppState, target: &str, json: bool) -> Result<()> {
    let service = &state.workflow_service;
    let tenant = &state.tenant_id;
    let workflow = resolve_workflow(state, target).await?;
    let steps = service.get_steps(tenant, &workflow.id).await?;
    let schedules = service.get_schedules(tenant, &workflow.id).await?;
    let variables = service.get_variables(tenant, Some(&workflow.id)).await?;

    if json {
        return print_json(&json!({
            "workflow": workflow,
            "steps": steps,
            "schedules": schedules,
            "variables": variables,
        }));
    }

    println!();
    println!(
        "  {} (v{}){}",
        style(&workflow.name).cyan().bold(),
        workflow.version,
        if workflow.is_active {
            String::new()
        } else {
            format!(" {}", style("inactive").red())
        }
    );
    println!("  ID:      {}", workflow.id);
    println!("  Trigger: {}", workflow.trigger);
    if !workflow.trigger_config.is_null() {
        println!("  Config:  {}", workflow.trigger_config);
    }
    if let Some(desc) = &workflow.description {
        println!("  About:   {desc}");
    }
    if !workflow.tags.is_empty() {
        println!("  Tags:    {}", workflow.tags.join(", "));
    }

    println!();
    if steps.is_empty() {
        println!("  No steps.");
    } else {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("#"),
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Type"),
                Cell::new("Action"),
                Cell::new("Depends on"),
                Cell::new("Retries"),
                Cell::new("Active"),
            ]);
        for step in &steps {
            let deps: Vec<&str> = step
                .dependencies
                .iter()
                .filter_map(|id| steps.iter().find(|s| s.id == *id).map(|s| s.name.as_str()))
                .collect();
            table.add_row(vec![
                Cell::new(step.position),
                Cell::new(&step.name),
                Cell::new(step.step_type),
                Cell::new(step.action.map(|a| a.to_string()).unwrap_or_default()),
                Cell::new(deps.join(", ")),
                Cell::new(step.retry_policy.max_attempts),
                Cell::new(if step.is_active { "yes" } else { "no" }),
            ]);
        }
        println!("{table}");
    }

    if !schedules.is_empty() {
        println!();
        println!("  {}", style("Schedules").bold());
        for s in &schedules {
            let next = s
                .next_run_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} ({}) {} next: {}",
                style(s.id).dim(),
                s.cron_expression,
                s.timezone,
                if s.is_active {
                    style("active").green().to_string()
                } else {
                    style("paused").yellow().to_string()
                },
                next
            );
        }
    }

    if !variables.is_empty() {
        println!();
        println!("  {}", style("Variables").bold());
        for v in &variables {
            println!("  {} = {} ({})", v.name, v.value, v.var_type.as_str());
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Import / export
// ---------------------------------------------------------------------------

pub async fn import_workflow(
    state: &AppState,
    file: &Path,
    format: Option<&str>,
    secret_args: &[String],
    json: bool,
) -> Result<()> {
    let format = match format {
        Some(f) => f.parse::<ExportFormat>().map_err(|e| anyhow!(e))?,
        None => ExportFormat::from_extension(file),
    };
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let secrets = parse_secret_args(secret_args)?;

    let outcome = state
        .workflow_service
        .import_workflow_text(&state.tenant_id, &text, format, &secrets)
        .await?;

    if json {
        return print_json(&json!({
            "id": outcome.workflow.id,
            "name": outcome.workflow.name,
            "version": outcome.workflow.version,
            "steps": outcome.steps.len(),
            "skippedVariables": outcome.skipped_variables,
        }));
    }

    println!();
    println!(
        "  {} Imported workflow '{}'",
        style("*").green().bold(),
        style(&outcome.workflow.name).cyan()
    );
    println!("  ID:    {}", outcome.workflow.id);
    println!("  Steps: {}", outcome.steps.len());
    if !outcome.skipped_variables.is_empty() {
        println!(
            "  {} Secrets without values were skipped: {}",
            style("!").yellow().bold(),
            outcome.skipped_variables.join(", ")
        );
        println!(
            "  Supply them with {}",
            style("--secret NAME=VALUE").dim()
        );
        if !outcome.workflow.is_active {
            println!(
                "  The webhook secret is missing, so the workflow was imported inactive."
            );
        }
    }
    println!();
    Ok(())
}

pub async fn export_workflow(
    state: &AppState,
    target: &str,
    format: &str,
    output: Option<&Path>,
) -> Result<()> {
    let format = format.parse::<ExportFormat>().map_err(|e| anyhow!(e))?;
    let workflow = resolve_workflow(state, target).await?;
    let text = state
        .workflow_service
        .export_workflow_text(&state.tenant_id, &workflow.id, format)
        .await?;

    match output {
        Some(path) => {
            tokio::fs::write(path, &text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "  {} Exported '{}' to {}",
                style("*").green().bold(),
                workflow.name,
                path.display()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

/// Parse repeated `NAME=VALUE` arguments; values that parse as JSON keep
/// their JSON type.
fn parse_secret_args(args: &[String]) -> Result<HashMap<String, Value>> {
    let mut secrets = HashMap::with_capacity(args.len());
    for arg in args {
        let Some((name, raw)) = arg.split_once('=') else {
            bail!("Invalid --secret '{arg}': expected NAME=VALUE");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        secrets.insert(name.trim().to_string(), value);
    }
    Ok(secrets)
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

pub async fn delete_workflow(state: &AppState, target: &str, json: bool) -> Result<()> {
    let workflow = resolve_workflow(state, target).await?;
    let deleted = state
        .workflow_service
        .delete_workflow(&state.tenant_id, &workflow.id)
        .await?;

    if json {
        return print_json(&json!({"id": workflow.id, "deleted": deleted}));
    }
    println!();
    println!(
        "  {} Deleted workflow '{}'",
        style("*").green().bold(),
        style(&workflow.name).cyan()
    );
    println!("  Execution history and audit logs are kept.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_args() {
        let secrets = parse_secret_args(&[
            "apiKey=abc123".to_string(),
            "retries=3".to_string(),
            "pair=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(secrets["apiKey"], json!("abc123"));
        assert_eq!(secrets["retries"], json!(3));
        assert_eq!(secrets["pair"], json!("a=b"));
    }

    #[test]
    fn test_parse_secret_args_rejects_missing_separator() {
        assert!(parse_secret_args(&["novalue".to_string()]).is_err());
    }
}
