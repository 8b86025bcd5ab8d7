//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::entity::EntityType;

/// Which copy survived a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Recorded sync conflict resolved by strategy (e.g., LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Collection of the conflicting record
    pub entity: EntityType,
    /// Record involved in the conflict
    pub record_id: String,
    /// Local copy's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Remote copy's timestamp
    pub remote_updated_at: i64,
    /// Surviving copy
    pub winner: ConflictWinner,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
