//! Error types for pursuit-core

use std::fmt;

use thiserror::Error;

/// Result type alias using pursuit-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pursuit-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The local durable medium rejected a write (quota, corruption)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote backend error
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl Error {
    /// Whether this error came from the local durable medium.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LibSql(_) | Self::Storage(_))
    }
}

/// Classification of remote failures, which decides retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Timeout, connection reset, 5xx, rate limited.
    TransientNetwork,
    /// Session invalid or expired.
    Auth,
    /// Remote rejected the scoped mutation.
    Permission,
    /// Remote table or column missing or mismatched.
    Schema,
    /// Uniqueness conflict (duplicate account create race).
    Conflict,
}

impl RemoteErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::Schema => "schema",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failed remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote {kind} error: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::TransientNetwork, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Auth, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permission, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Schema, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    /// Only timeouts and connection failures are worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::TransientNetwork)
    }
}
