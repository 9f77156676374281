//! stepwise CLI entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, initializes tracing and engine configuration, then
//! dispatches to the command handler.

mod cli;

use clap::Parser;
use stepwise_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stepwise_core=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        default_filter: filter.to_string(),
        json: cli.log_json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let config = stepwise_core::config::load_engine_config(&cli.config).await;

    let result = match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json).await,
        Commands::Run { file, vars, tenant } => {
            cli::workflow::handle_run(&file, vars, tenant, config, cli.json).await
        }
        Commands::Actions => cli::actions::list_actions(cli.json),
    };

    shutdown_tracing();
    result
}
