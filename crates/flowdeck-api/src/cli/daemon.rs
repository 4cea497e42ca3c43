//! Long-running scheduler process.
//!
//! Restores active schedules, prints progress events as scheduled runs fire,
//! and shuts the timers down on Ctrl+C or SIGTERM.

use anyhow::{Result, bail};
use console::style;
use tokio::sync::broadcast::error::RecvError;

use super::execution::print_event;
use crate::state::AppState;

pub async fn run_daemon(state: &AppState, json: bool) -> Result<()> {
    if !state.config.scheduler.enabled {
        bail!("The scheduler is disabled in config.toml ([scheduler] enabled = false)");
    }

    let service = &state.workflow_service;
    let restored = if state.config.scheduler.restore_on_startup {
        service.restore_schedules().await?
    } else {
        0
    };
    tracing::info!(restored, tenant_id = %state.tenant_id, "scheduler daemon started");

    if !json {
        println!();
        println!(
            "  {} Flowdeck daemon running ({} schedule(s) restored)",
            style("*").green().bold(),
            restored
        );
        println!("  Press Ctrl+C to stop.");
        println!();
    }

    let mut receiver = service.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if json {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{line}"),
                            Err(e) => tracing::warn!(error = %e, "failed to encode event"),
                        }
                    } else {
                        print_event(&event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "daemon event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping scheduler");

    service.scheduler().shutdown().await;
    if let Err(e) = state.cron_timer.shutdown().await {
        tracing::warn!(error = %e, "cron timer shutdown failed");
    }
    printer.abort();

    if !json {
        println!();
        println!("  Daemon stopped.");
    }
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix. A handler that fails to install
/// never resolves, leaving the other one in charge.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
