//! Account identity model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable numeric key assigned by the remote backend, scoping every remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(pub i64);

impl AccountKey {
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cached mapping from a session identity to its account key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    /// Opaque identity issued by the auth subsystem
    pub session_id: String,
    /// Remote account key
    pub account_key: AccountKey,
    /// When the mapping was resolved (Unix ms)
    pub resolved_at: i64,
}
