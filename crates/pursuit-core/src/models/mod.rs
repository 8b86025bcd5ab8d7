//! Data models for Pursuit

mod account;
mod application;
mod entity;
mod record;
mod sync_conflict;
mod sync_queue;

pub use account::{AccountIdentity, AccountKey};
pub use application::{Application, ApplicationStatus, Goal};
pub use entity::{EntityType, FieldMapping};
pub use record::{Entity, Record, RecordId};
pub use sync_conflict::{ConflictWinner, SyncConflict};
pub use sync_queue::{QueueItemState, SyncFailure, SyncOperation, SyncQueueItem};
