//! Sync queue models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::entity::EntityType;
use super::record::{Record, RecordId};
use crate::error::Error;

/// Remote mutation mirrored from a local write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown sync operation: {other}"))),
        }
    }
}

/// Queue item lifecycle state. Succeeded and abandoned items are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemState {
    Pending,
    InFlight,
}

impl QueueItemState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
        }
    }
}

impl FromStr for QueueItemState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            other => Err(Error::InvalidInput(format!("Unknown queue state: {other}"))),
        }
    }
}

/// A pending remote mutation
#[derive(Debug, Clone, PartialEq)]
pub struct SyncQueueItem {
    pub id: i64,
    pub entity: EntityType,
    pub operation: SyncOperation,
    pub record_id: RecordId,
    /// Record snapshot taken at enqueue time
    pub payload: Record,
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub state: QueueItemState,
    /// Earliest time (Unix ms) the next attempt may run
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    pub const fn is_due(&self, now: i64) -> bool {
        self.next_attempt_at <= now
    }
}

/// A queue item that was given up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub id: i64,
    pub entity: EntityType,
    pub record_id: String,
    pub operation: SyncOperation,
    pub attempts: u32,
    pub error: String,
    pub failed_at: i64,
}
