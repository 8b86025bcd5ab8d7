//! Database layer for Pursuit

mod conflict_repository;
mod connection;
mod identity_repository;
mod migrations;
mod queue_repository;
mod record_repository;

pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository, NewConflict};
pub use connection::{Database, StorageUsage};
pub use identity_repository::{IdentityRepository, LibSqlIdentityRepository};
pub use queue_repository::{LibSqlQueueRepository, NewQueueItem, QueueCount, QueueRepository};
pub use record_repository::{LibSqlRecordRepository, OrderBy, RecordRepository};
