//! Whole-record last-writer-wins reconciliation of pulled rows.
//!
//! A pulled copy replaces the local one only when its `updated_at` is
//! strictly newer; ties keep local. When local wins and the copies differ,
//! the local state is queued for push unless a mutation is already pending.

use crate::db::{ConflictRepository, LibSqlConflictRepository, NewConflict};
use crate::models::{ConflictWinner, EntityType, Record, SyncConflict, SyncOperation};
use crate::queue::SyncQueue;
use crate::store::LocalStore;
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// What one reconciliation pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Pulled records with no local copy
    pub inserted: u32,
    /// Local copies replaced by a strictly newer remote copy
    pub remote_won: u32,
    /// Local copies kept because they were as new or newer
    pub local_kept: u32,
    /// Local winners queued for push
    pub requeued: u32,
    /// Copies already in agreement
    pub unchanged: u32,
}

impl ReconcileReport {
    /// Whether LocalStore was written.
    pub const fn changed_local(&self) -> bool {
        self.inserted + self.remote_won > 0
    }
}

#[derive(Clone)]
pub struct ConflictResolver {
    store: LocalStore,
    queue: SyncQueue,
}

impl ConflictResolver {
    pub const fn new(store: LocalStore, queue: SyncQueue) -> Self {
        Self { store, queue }
    }

    /// Merge pulled records of one entity type into the local store.
    pub async fn reconcile(&self, entity: EntityType, pulled: Vec<Record>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for remote in pulled {
            if remote.entity != entity {
                return Err(Error::InvalidInput(format!(
                    "Pulled {} record while reconciling {entity}",
                    remote.entity
                )));
            }

            let mut local = self.store.get_any(entity, &remote.id).await?;
            let remote_newer = match &local {
                Some(local) => remote.updated_at > local.updated_at,
                None => true,
            };
            if remote_newer {
                if self.store.apply_remote_if_newer(&remote).await? {
                    self.remote_applied(local.as_ref(), &remote, &mut report).await?;
                    continue;
                }
                // A local write landed after the read above.
                local = self.store.get_any(entity, &remote.id).await?;
            }
            if let Some(local) = local {
                self.keep_local(&local, &remote, &mut report).await?;
            }
        }

        if report != ReconcileReport::default() {
            tracing::debug!(
                entity = %entity,
                inserted = report.inserted,
                remote_won = report.remote_won,
                local_kept = report.local_kept,
                requeued = report.requeued,
                "Reconciled pulled records"
            );
        }
        Ok(report)
    }

    /// Most recent conflicts first.
    pub async fn recent_conflicts(&self, limit: u32) -> Result<Vec<SyncConflict>> {
        let db = self.store.database().lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list(limit)
            .await
    }

    async fn remote_applied(&self, local: Option<&Record>, remote: &Record, report: &mut ReconcileReport) -> Result<()> {
        let Some(local) = local else {
            report.inserted += 1;
            return Ok(());
        };
        self.queue
            .discard_superseded(remote.entity, &remote.id, remote.updated_at)
            .await?;
        if !local.same_content(remote) {
            self.log(local, remote, ConflictWinner::Remote).await;
        }
        report.remote_won += 1;
        Ok(())
    }

    async fn keep_local(&self, local: &Record, remote: &Record, report: &mut ReconcileReport) -> Result<()> {
        if local.same_content(remote) {
            report.unchanged += 1;
            return Ok(());
        }

        report.local_kept += 1;
        self.log(local, remote, ConflictWinner::Local).await;
        if !self.queue.has_pending(local.entity, &local.id).await? {
            let operation = if local.is_deleted() {
                SyncOperation::Delete
            } else {
                SyncOperation::Update
            };
            self.queue.enqueue(operation, local).await?;
            report.requeued += 1;
        }
        Ok(())
    }

    async fn log(&self, local: &Record, remote: &Record, winner: ConflictWinner) {
        let db = self.store.database().lock().await;
        let result = LibSqlConflictRepository::new(db.connection())
            .record(NewConflict {
                entity: local.entity,
                record_id: local.id.as_str(),
                local_updated_at: local.updated_at,
                remote_updated_at: remote.updated_at,
                winner,
                resolved_at: unix_millis_now(),
            })
            .await;
        if let Err(error) = result {
            let error = self.store.note_error(error);
            tracing::warn!(entity = %local.entity, record_id = %local.id, "Failed to log sync conflict: {error}");
        }
    }
}
