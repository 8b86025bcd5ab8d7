//! Pursuit CLI - Operational commands for the local-first tracker
//!
//! Drives the sync core against the local database: force a refresh, inspect
//! the queue and storage, and read the cross-account report.

mod auth;
mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::auth::SessionStore;
use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::{run_login, run_logout};
use crate::commands::health::run_health;
use crate::commands::refresh::run_refresh;
use crate::commands::report::run_report;
use crate::commands::status::run_status;
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

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "pursuit=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sessions = SessionStore::default();

    match cli.command {
        Commands::Refresh { json } => run_refresh(json, cli.db_path, &sessions).await?,
        Commands::Status { conflicts, json } => {
            run_status(conflicts, json, cli.db_path, &sessions).await?;
        }
        Commands::Health { json } => run_health(json, cli.db_path, &sessions).await?,
        Commands::Report { json } => run_report(json, cli.db_path, &sessions).await?,
        Commands::Login {
            session_id,
            access_token,
            expires_at,
            email,
        } => run_login(&session_id, &access_token, expires_at, email, &sessions)?,
        Commands::Logout => run_logout(cli.db_path, &sessions).await?,
    }

    Ok(())
}
