//! Polystore CLI - inspect and exercise a platform configuration.
//!
//! Every command runs against the in-memory reference adapters, so a
//! configuration can be validated, its routing inspected and its named
//! queries tried without any backing store.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod theme;

use commands::{check, health, info, query};

/// Polystore - polyglot persistence platform
#[derive(Parser)]
#[command(name = "polystore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the platform configuration. Defaults to the bundled sample.
    #[arg(short, long, global = true, env = "POLYSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Colored, human-readable
    Pretty,
    /// One JSON document
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration
    Check,

    /// Print the bundled sample configuration
    Sample,

    /// Show technologies, capabilities, limits and configured names
    Info,

    /// Connect every provider and report health
    Health,

    /// Run a named query
    Query {
        /// Named query to run
        name: String,

        /// Query parameter as key=value; values parse as JSON when they can
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Seed a record before querying, as table=JSON
        #[arg(long = "seed", value_name = "TABLE=JSON")]
        seeds: Vec<String>,

        /// Show the execution plan without running the query
        #[arg(long)]
        explain: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Sample) {
        print!("{}", polystore_config::SAMPLE_TOML);
        return Ok(());
    }

    let config = commands::load_config(cli.config.as_deref())?;
    commands::init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Check => check::run_check(&config, cli.config.as_deref(), cli.format),
        Commands::Sample => Ok(()),
        Commands::Info => info::run_info(config, cli.format).await,
        Commands::Health => health::run_health(config, cli.format).await,
        Commands::Query {
            name,
            params,
            seeds,
            explain,
        } => {
            let request = query::QueryRequest {
                name,
                params,
                seeds,
                explain,
            };
            query::run_query(config, request, cli.format).await
        },
    }
}
