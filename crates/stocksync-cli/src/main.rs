//! Stocksync CLI - manage businesses and their stock from the terminal
//!
//! Every change lands in the local store first and is replicated to the
//! remote whenever it can be reached.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::article::run_article;
use crate::commands::business::run_business;
use crate::commands::common::CliContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "stocksync=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CliContext::from_cli(&cli);

    match cli.command {
        Commands::Business { command } => run_business(command, &context).await?,
        Commands::Article { command } => run_article(command, &context).await?,
        Commands::Sync { collection, json } => {
            run_sync(collection.map(Into::into), json, &context).await?;
        }
        Commands::Status { json } => run_status(json, &context).await?,
        Commands::Watch { interval } => run_watch(interval, &context).await?,
        Commands::Config { command } => run_config(command, &context)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
