//! Tasklane CLI entry point.
//!
//! Binary name: `tlane`
//!
//! Parses CLI arguments, sets up tracing, wires the SQLite-backed instance
//! service, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tasklane_observe::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut tracing_options = TracingOptions::default().with_verbosity(cli.verbose);
    if cli.quiet {
        tracing_options.default_filter = "error".to_string();
    }
    if cli.log_json {
        tracing_options.format = LogFormat::Json;
    }
    tracing_options.enable_otel = cli.otel;
    init_tracing(&tracing_options).map_err(|e| anyhow::anyhow!("tracing setup failed: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tlane", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Instance { action } => cli::instance::run(&state, action, cli.json).await,
        Commands::Model { action } => cli::model::run(&state, action, cli.json).await,
        Commands::User { action } => cli::directory::run_user(&state, action, cli.json).await,
        Commands::Group { action } => cli::directory::run_group(&state, action, cli.json).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
