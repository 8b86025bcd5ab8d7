use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] pursuit_core::Error),
    #[error(transparent)]
    Config(#[from] pursuit_core::config::ConfigError),
    #[error(transparent)]
    Session(#[from] pursuit_core::auth::SessionError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to resolve CLI data directory; pass --db-path or set PURSUIT_DB_PATH")]
    DataDir,
    #[error("Session ID cannot be empty")]
    EmptySessionId,
    #[error("Access token cannot be empty")]
    EmptyAccessToken,
    #[error("Sync is not configured. Set PURSUIT_REMOTE_URL and PURSUIT_REMOTE_KEY to enable `pursuit {0}`.")]
    SyncNotConfigured(&'static str),
}
