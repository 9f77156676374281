//! CLI command definitions for the `stepwise` binary.

pub mod actions;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use stepwise_core::config::CONFIG_FILE;

/// Validate and run workflow definitions.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file.
    #[arg(long, global = true, env = "STEPWISE_CONFIG", default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Write logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file and print its diagnostics.
    Validate {
        /// Path to the workflow file (YAML or JSON).
        file: PathBuf,
    },

    /// Run a workflow file with the built-in actions.
    Run {
        /// Path to the workflow file (YAML or JSON).
        file: PathBuf,

        /// Variable override; the value is parsed as JSON, else taken as a
        /// string. Repeatable.
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Tenant recorded on the execution context.
        #[arg(long)]
        tenant: Option<String>,
    },

    /// List the built-in action types.
    Actions,
}

/// Parse `name=value`.
fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
