//! Variable subcommands: vars, set-var, unset-var.

use anyhow::{Result, anyhow};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use flowdeck_types::export::REDACTED;
use flowdeck_types::workflow::{NewVariable, VariableType};
use serde_json::{Value, json};

use super::{parse_json_arg, print_json, resolve_workflow_id};
use crate::state::AppState;

pub async fn list_variables(state: &AppState, target: Option<&str>, json: bool) -> Result<()> {
    let workflow_id = resolve_workflow_id(state, target).await?;
    let variables = state
        .workflow_service
        .get_variables(&state.tenant_id, workflow_id.as_ref())
        .await?;

    if json {
        return print_json(&variables);
    }

    let scope = target.map_or_else(|| "global".to_string(), |t| format!("'{t}'"));
    if variables.is_empty() {
        println!();
        println!("  No {scope} variables.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Value"),
            Cell::new("Updated"),
        ]);

    for v in &variables {
        table.add_row(vec![
            Cell::new(&v.name),
            Cell::new(v.var_type.as_str()),
            Cell::new(&v.value),
            Cell::new(v.updated_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("  {} variables", style(scope).bold());
    println!("{table}");
    println!();
    Ok(())
}

pub async fn set_variable(
    state: &AppState,
    name: &str,
    raw_value: &str,
    target: Option<&str>,
    var_type: &str,
    secret: bool,
    json: bool,
) -> Result<()> {
    let var_type = var_type.parse::<VariableType>().map_err(|e| anyhow!(e))?;
    let value = parse_value(raw_value, var_type)?;
    let workflow_id = resolve_workflow_id(state, target).await?;

    let variable = state
        .workflow_service
        .set_variable(
            &state.tenant_id,
            NewVariable {
                workflow_id,
                name: name.to_string(),
                value,
                var_type,
                is_secret: secret,
            },
        )
        .await?;

    let shown = if variable.is_sensitive() {
        Value::String(REDACTED.to_string())
    } else {
        variable.value.clone()
    };

    if json {
        return print_json(&json!({
            "id": variable.id,
            "name": variable.name,
            "type": variable.var_type.as_str(),
            "value": shown,
            "workflowId": variable.workflow_id,
        }));
    }
    println!();
    println!(
        "  {} {} = {}",
        style("*").green().bold(),
        style(&variable.name).cyan(),
        shown
    );
    println!();
    Ok(())
}

pub async fn delete_variable(
    state: &AppState,
    name: &str,
    target: Option<&str>,
    json: bool,
) -> Result<()> {
    let workflow_id = resolve_workflow_id(state, target).await?;
    let deleted = state
        .workflow_service
        .delete_variable(&state.tenant_id, workflow_id.as_ref(), name)
        .await?;

    if json {
        return print_json(&json!({"name": name, "deleted": deleted}));
    }
    println!();
    if deleted {
        println!("  {} Deleted variable '{}'", style("*").green().bold(), name);
    } else {
        println!("  Variable '{name}' not found.");
    }
    println!();
    Ok(())
}

/// Typed value from a command-line string. Number, boolean and json values
/// must parse as JSON of the matching shape; everything else stays a string.
fn parse_value(raw: &str, var_type: VariableType) -> Result<Value> {
    match var_type {
        VariableType::Number => match parse_json_arg(raw, "number")? {
            v @ Value::Number(_) => Ok(v),
            other => Err(anyhow!("Expected a number, got {other}")),
        },
        VariableType::Boolean => match parse_json_arg(raw, "boolean")? {
            v @ Value::Bool(_) => Ok(v),
            other => Err(anyhow!("Expected true or false, got {other}")),
        },
        VariableType::Json => parse_json_arg(raw, "value"),
        _ => Ok(Value::String(raw.to_string())),
    }
}
