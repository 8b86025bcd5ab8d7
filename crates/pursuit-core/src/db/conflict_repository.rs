//! Sync conflict log repository

use crate::error::Result;
use crate::models::{ConflictWinner, EntityType, SyncConflict};
use libsql::{params, Connection, Row};

/// A conflict about to be logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict<'a> {
    pub entity: EntityType,
    pub record_id: &'a str,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub winner: ConflictWinner,
    pub resolved_at: i64,
}

/// Trait for conflict log operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    async fn record(&self, conflict: NewConflict<'_>) -> Result<()>;

    /// Most recent conflicts first
    async fn list(&self, limit: u32) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<SyncConflict> {
        let entity: String = row.get(1)?;
        let winner: String = row.get(5)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            entity: entity.parse()?,
            record_id: row.get(2)?,
            local_updated_at: row.get(3)?,
            remote_updated_at: row.get(4)?,
            winner: if winner == ConflictWinner::Remote.as_str() {
                ConflictWinner::Remote
            } else {
                ConflictWinner::Local
            },
            resolved_at: row.get(6)?,
            strategy: row.get(7)?,
        })
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn record(&self, conflict: NewConflict<'_>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                    (entity, record_id, local_updated_at, remote_updated_at, winner, resolved_at, strategy)
                 VALUES (?, ?, ?, ?, ?, ?, 'lww')",
                params![
                    conflict.entity.as_str(),
                    conflict.record_id,
                    conflict.local_updated_at,
                    conflict.remote_updated_at,
                    conflict.winner.as_str(),
                    conflict.resolved_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self, limit: u32) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, record_id, local_updated_at, remote_updated_at, winner, resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                params![limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }
}
