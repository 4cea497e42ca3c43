//! Flowdeck CLI entry point.
//!
//! Binary name: `flowdeck`
//!
//! Parses CLI arguments, initializes tracing, the database and services,
//! then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use flowdeck_infra::config::default_data_dir;
use flowdeck_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut options = TracingOptions::for_verbosity(cli.verbose, cli.quiet);
    options.json = cli.log_json;
    options.otel = cli.otel;
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowdeck", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let state = AppState::init(data_dir, cli.tenant).await?;

    let result = cli::dispatch(cli.command, &state, cli.json).await;

    state.db_pool.close().await;
    shutdown_tracing();
    result
}
