//! Schedule subcommands: schedule, unschedule, pause, resume.

use anyhow::Result;
use console::style;
use flowdeck_types::schedule::{ScheduleConfig, WorkflowSchedule};
use serde_json::json;
use uuid::Uuid;

use super::{print_json, resolve_workflow};
use crate::state::AppState;

pub async fn create_schedule(
    state: &AppState,
    target: &str,
    cron: &str,
    timezone: &str,
    paused: bool,
    json: bool,
) -> Result<()> {
    let workflow = resolve_workflow(state, target).await?;
    let mut config = ScheduleConfig::new(cron).in_timezone(timezone);
    config.is_active = !paused;

    let schedule = state
        .workflow_service
        .schedule_workflow(&state.tenant_id, &workflow.id, config)
        .await?;

    if json {
        return print_json(&schedule);
    }

    println!();
    println!(
        "  {} Scheduled '{}'",
        style("*").green().bold(),
        style(&workflow.name).cyan()
    );
    print_schedule(&schedule);
    if schedule.is_active {
        println!(
            "  Schedules fire while {} is running.",
            style("flowdeck daemon").dim()
        );
    }
    println!();
    Ok(())
}

pub async fn delete_schedule(state: &AppState, schedule_id: &Uuid, json: bool) -> Result<()> {
    let deleted = state
        .workflow_service
        .delete_schedule(&state.tenant_id, schedule_id)
        .await?;

    if json {
        return print_json(&json!({"id": schedule_id, "deleted": deleted}));
    }
    println!();
    if deleted {
        println!("  {} Removed schedule {}", style("*").green().bold(), schedule_id);
    } else {
        println!("  Schedule {schedule_id} not found.");
    }
    println!();
    Ok(())
}

pub async fn set_schedule_active(
    state: &AppState,
    schedule_id: &Uuid,
    active: bool,
    json: bool,
) -> Result<()> {
    let schedule = state
        .workflow_service
        .set_schedule_active(&state.tenant_id, schedule_id, active)
        .await?;

    if json {
        return print_json(&schedule);
    }
    println!();
    println!(
        "  {} Schedule {}",
        style("*").green().bold(),
        if active { "resumed" } else { "paused" }
    );
    print_schedule(&schedule);
    println!();
    Ok(())
}

fn print_schedule(schedule: &WorkflowSchedule) {
    println!("  ID:       {}", schedule.id);
    println!(
        "  Cron:     {} ({})",
        schedule.cron_expression, schedule.timezone
    );
    match schedule.next_run_at {
        Some(next) if schedule.is_active => {
            println!("  Next run: {}", next.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        _ => println!("  Next run: {}", style("paused").yellow()),
    }
}
