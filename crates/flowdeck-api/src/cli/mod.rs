//! CLI command definitions and dispatch for the `flowdeck` binary.
//!
//! Uses clap derive macros for argument parsing. Workflows are addressed by
//! id or by name; every command runs against the tenant resolved at startup.

pub mod daemon;
pub mod execution;
pub mod schedule;
pub mod trigger;
pub mod variable;
pub mod workflow;

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use flowdeck_core::repository::WorkflowFilter;
use flowdeck_core::service::ServiceError;
use flowdeck_types::execution::{ExecutionStatus, StepExecutionStatus};
use flowdeck_types::workflow::Workflow;
use uuid::Uuid;

use crate::state::AppState;

/// Run and manage automated workflows.
#[derive(Parser)]
#[command(name = "flowdeck", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (database and config.toml).
    #[arg(long, global = true, env = "FLOWDECK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Tenant to operate on (defaults to `default_tenant` in config.toml).
    #[arg(long, global = true, env = "FLOWDECK_TENANT")]
    pub tenant: Option<Uuid>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List workflows.
    #[command(alias = "ls")]
    List {
        /// Only workflows with this trigger (manual, scheduled, event, webhook).
        #[arg(long)]
        trigger: Option<String>,

        /// Only active workflows.
        #[arg(long)]
        active: bool,
    },

    /// Show a workflow with its steps, schedules and variables.
    Show {
        /// Workflow id or name.
        workflow: String,
    },

    /// Import a workflow from an export document (JSON or YAML).
    Import {
        /// Path to the export file.
        file: PathBuf,

        /// Document format (defaults to the file extension).
        #[arg(long)]
        format: Option<String>,

        /// Value for a redacted secret variable, as NAME=VALUE (repeatable).
        #[arg(long = "secret", value_name = "NAME=VALUE")]
        secrets: Vec<String>,
    },

    /// Export a workflow as a portable document.
    Export {
        /// Workflow id or name.
        workflow: String,

        /// Output format: json or yaml.
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a workflow manually and follow its progress.
    Run {
        /// Workflow id or name.
        workflow: String,

        /// Trigger data as inline JSON.
        #[arg(long, conflicts_with = "data_file")]
        data: Option<String>,

        /// Trigger data read from a JSON file.
        #[arg(long)]
        data_file: Option<PathBuf>,

        /// Print the execution id and return without waiting.
        #[arg(long)]
        detach: bool,
    },

    /// Cancel a running execution.
    Cancel {
        /// Execution id.
        execution_id: Uuid,
    },

    /// List a workflow's executions, newest first.
    Executions {
        /// Workflow id or name.
        workflow: String,

        /// Only executions with this status.
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,

        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Show one execution with its step records.
    Execution {
        /// Execution id.
        execution_id: Uuid,
    },

    /// Show audit log entries, newest first.
    Logs {
        /// Workflow id or name (omit for every workflow).
        workflow: Option<String>,

        /// Only entries of this execution.
        #[arg(long)]
        execution: Option<Uuid>,

        /// Only entries of this level (debug, info, warn, error).
        #[arg(long)]
        level: Option<String>,

        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Attach a cron schedule to a workflow.
    Schedule {
        /// Workflow id or name.
        workflow: String,

        /// Cron expression (5 or 6 fields) or shorthand like "every 5 minutes".
        cron: String,

        /// UTC or a fixed offset such as +02:00.
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Store the schedule without starting it.
        #[arg(long)]
        paused: bool,
    },

    /// Remove a schedule.
    Unschedule {
        /// Schedule id.
        schedule_id: Uuid,
    },

    /// Pause an active schedule.
    Pause {
        /// Schedule id.
        schedule_id: Uuid,
    },

    /// Resume a paused schedule.
    Resume {
        /// Schedule id.
        schedule_id: Uuid,
    },

    /// List variables (secrets are masked).
    Vars {
        /// Workflow id or name (omit for tenant-global variables).
        #[arg(long)]
        workflow: Option<String>,
    },

    /// Create or replace a variable.
    #[command(name = "set-var")]
    SetVar {
        name: String,

        /// Value; parsed as JSON for number, boolean and json types.
        value: String,

        /// Scope the variable to a workflow (omit for tenant-global).
        #[arg(long)]
        workflow: Option<String>,

        /// Variable type: string, number, boolean, json, secret, file, reference.
        #[arg(long = "type", default_value = "string")]
        var_type: String,

        /// Mark the value as secret.
        #[arg(long)]
        secret: bool,
    },

    /// Delete a variable.
    #[command(name = "unset-var")]
    UnsetVar {
        name: String,

        #[arg(long)]
        workflow: Option<String>,
    },

    /// Delete a workflow with its steps, variables and schedules.
    #[command(alias = "rm")]
    Delete {
        /// Workflow id or name.
        workflow: String,
    },

    /// Emit a domain event to every matching event-triggered workflow.
    Emit {
        /// Event type, e.g. member.joined.
        event_type: String,

        /// Event payload as inline JSON.
        #[arg(long)]
        payload: Option<String>,

        /// Return once the executions have started.
        #[arg(long)]
        no_wait: bool,
    },

    /// Deliver a webhook body to a webhook-triggered workflow.
    Webhook {
        /// Workflow id or name.
        workflow: String,

        /// Raw request body.
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,

        /// Read the raw body from a file.
        #[arg(long)]
        body_file: Option<PathBuf>,

        /// Signature header value (sha256=<hex>).
        #[arg(long)]
        signature: Option<String>,

        /// Return once the execution has started.
        #[arg(long)]
        no_wait: bool,
    },

    /// Run the scheduler until interrupted.
    Daemon,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a parsed command.
pub async fn dispatch(command: Commands, state: &AppState, json: bool) -> Result<()> {
    match command {
        Commands::List { trigger, active } => {
            workflow::list_workflows(state, trigger.as_deref(), active, json).await
        }
        Commands::Show { workflow } => workflow::show_workflow(state, &workflow, json).await,
        Commands::Import {
            file,
            format,
            secrets,
        } => workflow::import_workflow(state, &file, format.as_deref(), &secrets, json).await,
        Commands::Export {
            workflow,
            format,
            output,
        } => workflow::export_workflow(state, &workflow, &format, output.as_deref()).await,
        Commands::Delete { workflow } => workflow::delete_workflow(state, &workflow, json).await,

        Commands::Run {
            workflow,
            data,
            data_file,
            detach,
        } => {
            execution::run_workflow(state, &workflow, data.as_deref(), data_file.as_deref(), detach, json)
                .await
        }
        Commands::Cancel { execution_id } => {
            execution::cancel_execution(state, &execution_id, json).await
        }
        Commands::Executions {
            workflow,
            status,
            limit,
            offset,
        } => {
            execution::list_executions(state, &workflow, status.as_deref(), limit, offset, json)
                .await
        }
        Commands::Execution { execution_id } => {
            execution::show_execution(state, &execution_id, json).await
        }
        Commands::Logs {
            workflow,
            execution,
            level,
            limit,
        } => {
            execution::show_logs(state, workflow.as_deref(), execution, level.as_deref(), limit, json)
                .await
        }

        Commands::Schedule {
            workflow,
            cron,
            timezone,
            paused,
        } => schedule::create_schedule(state, &workflow, &cron, &timezone, paused, json).await,
        Commands::Unschedule { schedule_id } => {
            schedule::delete_schedule(state, &schedule_id, json).await
        }
        Commands::Pause { schedule_id } => {
            schedule::set_schedule_active(state, &schedule_id, false, json).await
        }
        Commands::Resume { schedule_id } => {
            schedule::set_schedule_active(state, &schedule_id, true, json).await
        }

        Commands::Vars { workflow } => {
            variable::list_variables(state, workflow.as_deref(), json).await
        }
        Commands::SetVar {
            name,
            value,
            workflow,
            var_type,
            secret,
        } => {
            variable::set_variable(state, &name, &value, workflow.as_deref(), &var_type, secret, json)
                .await
        }
        Commands::UnsetVar { name, workflow } => {
            variable::delete_variable(state, &name, workflow.as_deref(), json).await
        }

        Commands::Emit {
            event_type,
            payload,
            no_wait,
        } => trigger::emit_event(state, &event_type, payload.as_deref(), no_wait, json).await,
        Commands::Webhook {
            workflow,
            body,
            body_file,
            signature,
            no_wait,
        } => {
            trigger::deliver_webhook(
                state,
                &workflow,
                body.as_deref(),
                body_file.as_deref(),
                signature.as_deref(),
                no_wait,
                json,
            )
            .await
        }

        Commands::Daemon => daemon::run_daemon(state, json).await,

        Commands::Completions { .. } => unreachable!("handled in main"),
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Resolve a workflow by id, falling back to an exact name match.
pub async fn resolve_workflow(state: &AppState, target: &str) -> Result<Workflow> {
    let service = &state.workflow_service;

    if let Ok(id) = target.parse::<Uuid>() {
        match service.get_workflow(&state.tenant_id, &id).await {
            Ok(workflow) => return Ok(workflow),
            Err(ServiceError::WorkflowNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mut matches: Vec<Workflow> = service
        .list_workflows(&state.tenant_id, &WorkflowFilter::default())
        .await?
        .into_iter()
        .filter(|w| w.name == target)
        .collect();

    match matches.len() {
        0 => bail!("Workflow '{target}' not found"),
        1 => Ok(matches.remove(0)),
        n => bail!("{n} workflows are named '{target}'; use the workflow id"),
    }
}

/// Resolve an optional workflow argument to its id.
pub async fn resolve_workflow_id(state: &AppState, target: Option<&str>) -> Result<Option<Uuid>> {
    match target {
        Some(t) => Ok(Some(resolve_workflow(state, t).await?.id)),
        None => Ok(None),
    }
}

/// Parse an inline JSON argument.
pub fn parse_json_arg(raw: &str, what: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("Invalid JSON {what}: {e}"))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn styled_status(status: ExecutionStatus) -> String {
    let label = status.as_str();
    match status {
        ExecutionStatus::Running => style(label).yellow().to_string(),
        ExecutionStatus::Completed => style(label).green().to_string(),
        ExecutionStatus::Failed => style(label).red().to_string(),
        ExecutionStatus::Cancelled => style(label).dim().to_string(),
    }
}

pub fn styled_step_status(status: StepExecutionStatus) -> String {
    let label = status.as_str();
    match status {
        StepExecutionStatus::Completed => style(label).green().to_string(),
        StepExecutionStatus::Failed => style(label).red().to_string(),
        StepExecutionStatus::Running => style(label).yellow().to_string(),
        _ => style(label).dim().to_string(),
    }
}
