//! stockcount CLI - offline stock-count queue from the command line
//!
//! Enqueue counts while offline, inspect the queue and conflicts, and replay
//! against the inventory backend when connectivity returns.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConflictCommands, CountCommands, QueueCommands};
use crate::commands::common::CliContext;
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

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stockcount=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CliContext::load(cli.db_path, cli.config)?;

    match cli.command {
        Commands::Queue { command } => match command {
            QueueCommands::List { json } => commands::queue::run_list(&context, json).await?,
            QueueCommands::Add {
                method,
                path,
                payload,
            } => commands::queue::run_add(&context, &method, &path, payload.as_deref()).await?,
            QueueCommands::Remove { id } => commands::queue::run_remove(&context, &id).await?,
        },
        Commands::Count { command } => match command {
            CountCommands::Add {
                session,
                item,
                quantity,
            } => commands::count::run_add(&context, &session, &item, quantity).await?,
        },
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { json } => commands::conflicts::run_list(&context, json).await?,
            ConflictCommands::Dismiss { id } => {
                commands::conflicts::run_dismiss(&context, &id).await?;
            }
            ConflictCommands::Resolve { id } => {
                commands::conflicts::run_resolve(&context, &id).await?;
            }
        },
        Commands::Flush { offline } => commands::flush::run_flush(&context, offline).await?,
        Commands::Watch { offline } => commands::watch::run_watch(&context, offline).await?,
        Commands::Scan { session } => commands::scan::run_scan(&context, session.as_deref()).await?,
        Commands::Status { json } => commands::status::run_status(&context, json).await?,
    }

    Ok(())
}
