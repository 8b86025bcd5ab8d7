use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pursuit")]
#[command(about = "Inspect and drive Pursuit's local-first sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drain queued changes and pull every entity type
    Refresh {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show auth state, queue depth, cache counters and recent conflicts
    Status {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        conflicts: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show local storage usage and recent storage errors
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the cross-account usage report
    Report {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Store a session issued by the auth subsystem in the keychain
    Login {
        /// Stable external identity of the signed-in user
        #[arg(long, value_name = "ID")]
        session_id: String,
        /// Access token presented to the remote backend
        #[arg(long, value_name = "TOKEN")]
        access_token: String,
        /// Expiry as Unix seconds
        #[arg(long, value_name = "SECONDS")]
        expires_at: Option<i64>,
        /// Account email, for display only
        #[arg(long, value_name = "EMAIL")]
        email: Option<String>,
    },
    /// Clear the stored session, identity and cached results
    Logout,
}
