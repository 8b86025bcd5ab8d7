//! Durable local record store, the source of truth for every read.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::Connection;
use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlQueueRepository, LibSqlRecordRepository, NewQueueItem, OrderBy, QueueRepository,
    RecordRepository, StorageUsage,
};
use crate::events::{Subscribers, Subscription};
use crate::models::{EntityType, Record, RecordId, SyncOperation};
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Window over which storage errors count as recent.
const RECENT_ERROR_WINDOW_MS: i64 = 60 * 60 * 1000;

/// What kind of write produced a [`StoreChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// User write (put or bulk put)
    Put,
    /// User delete (tombstone)
    Delete,
    /// Pulled copy applied by reconciliation
    Remote,
    /// Confirmed tombstone removed
    Purge,
    /// Whole collection cleared
    Clear,
}

/// Notification raised after every successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub entity: EntityType,
    pub kind: ChangeKind,
    pub ids: Vec<RecordId>,
}

/// Result of a user write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    pub record: Record,
    /// No row (live or tombstoned) existed before this write
    pub created: bool,
}

/// Result of a user write committed together with its queue row
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWrite {
    pub record: Record,
    pub created: bool,
    pub operation: SyncOperation,
    /// Rowid of the queued sync item
    pub item: i64,
}

/// Storage health probe output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHealth {
    pub usage: StorageUsage,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub recent_errors: usize,
    pub last_error: Option<String>,
    pub schema_version: i32,
    pub path: Option<PathBuf>,
}

#[derive(Default)]
struct ErrorLog {
    at: VecDeque<i64>,
    last: Option<String>,
}

/// Thread-safe handle to the local database.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    changes: Subscribers<StoreChange>,
    errors: Arc<parking_lot::Mutex<ErrorLog>>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::info!("Opened local store at {}", db_path.display());
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            changes: Subscribers::new(),
            errors: Arc::new(parking_lot::Mutex::new(ErrorLog::default())),
        }
    }

    /// Database path when file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Shared database handle for the queue and identity repositories.
    pub(crate) const fn database(&self) -> &Arc<Mutex<Database>> {
        &self.db
    }

    /// Register a change handler. Handlers run before the write returns.
    pub fn subscribe(&self, handler: impl Fn(&StoreChange) + Send + Sync + 'static) -> Subscription {
        self.changes.subscribe(handler)
    }

    /// Get a live record.
    pub async fn get(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .get(entity, id)
            .await
    }

    /// Get a record including tombstones.
    pub async fn get_any(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .get_any(entity, id)
            .await
    }

    /// List live records.
    pub async fn list(&self, entity: EntityType, order: OrderBy) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(entity, order)
            .await
    }

    /// Store a user write, stamping `updated_at` and keeping the first `created_at`.
    pub async fn put(&self, record: Record) -> Result<WriteResult> {
        record.validate()?;
        let entity = record.entity;

        let result = {
            let db = self.db.lock().await;
            let repo = LibSqlRecordRepository::new(db.connection());
            let result = self.write(Self::stamp_put(&repo, record)).await?;
            let record = &result.record;
            self.write(repo.upsert(record)).await?;
            result
        };

        tracing::debug!(entity = %entity, record_id = %result.record.id, created = result.created, "Stored record");
        self.changes.emit(&StoreChange {
            entity,
            kind: ChangeKind::Put,
            ids: vec![result.record.id.clone()],
        });
        Ok(result)
    }

    /// Store a user write together with its queue row, both or neither.
    pub async fn put_and_enqueue(&self, record: Record, max_retries: u32) -> Result<QueuedWrite> {
        record.validate()?;
        let entity = record.entity;

        let queued = {
            let db = self.db.lock().await;
            let conn = db.connection();
            self.transaction(conn, async move {
                let repo = LibSqlRecordRepository::new(conn);
                let result = Self::stamp_put(&repo, record).await?;
                repo.upsert(&result.record).await?;
                let operation = if result.created {
                    SyncOperation::Create
                } else {
                    SyncOperation::Update
                };
                let item = LibSqlQueueRepository::new(conn)
                    .enqueue(NewQueueItem {
                        operation,
                        payload: &result.record,
                        enqueued_at: unix_millis_now(),
                        max_retries,
                    })
                    .await?;
                Ok::<_, Error>(QueuedWrite {
                    record: result.record,
                    created: result.created,
                    operation,
                    item,
                })
            })
            .await?
        };

        tracing::debug!(entity = %entity, record_id = %queued.record.id, operation = %queued.operation, item = queued.item, "Stored and queued record");
        self.changes.emit(&StoreChange {
            entity,
            kind: ChangeKind::Put,
            ids: vec![queued.record.id.clone()],
        });
        Ok(queued)
    }

    /// Tombstone a record. Returns the tombstone, or `None` if no live record existed.
    pub async fn delete(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>> {
        let tombstone = {
            let db = self.db.lock().await;
            let repo = LibSqlRecordRepository::new(db.connection());
            let Some(record) = repo.get(entity, id).await? else {
                return Ok(None);
            };
            let record = Self::stamp_delete(record);
            self.write(repo.upsert(&record)).await?;
            record
        };

        self.emit_delete(entity, id);
        Ok(Some(tombstone))
    }

    /// Tombstone a record and queue its remote delete in one transaction.
    pub async fn delete_and_enqueue(&self, entity: EntityType, id: &RecordId, max_retries: u32) -> Result<Option<QueuedWrite>> {
        let queued = {
            let db = self.db.lock().await;
            let conn = db.connection();
            self.transaction(conn, async move {
                let repo = LibSqlRecordRepository::new(conn);
                let Some(record) = repo.get(entity, id).await? else {
                    return Ok::<_, Error>(None);
                };
                let record = Self::stamp_delete(record);
                repo.upsert(&record).await?;
                let item = LibSqlQueueRepository::new(conn)
                    .enqueue(NewQueueItem {
                        operation: SyncOperation::Delete,
                        payload: &record,
                        enqueued_at: unix_millis_now(),
                        max_retries,
                    })
                    .await?;
                Ok(Some(QueuedWrite {
                    record,
                    created: false,
                    operation: SyncOperation::Delete,
                    item,
                }))
            })
            .await?
        };

        if queued.is_some() {
            self.emit_delete(entity, id);
        }
        Ok(queued)
    }

    /// Store many user writes in one transaction.
    pub async fn bulk_put(&self, records: Vec<Record>) -> Result<Vec<WriteResult>> {
        for record in &records {
            record.validate()?;
        }

        let results = {
            let db = self.db.lock().await;
            let conn = db.connection();
            self.transaction(conn, async move {
                let repo = LibSqlRecordRepository::new(conn);
                let mut results = Vec::with_capacity(records.len());
                for record in records {
                    let result = Self::stamp_put(&repo, record).await?;
                    repo.upsert(&result.record).await?;
                    results.push(result);
                }
                Ok::<_, Error>(results)
            })
            .await?
        };

        let mut by_entity: BTreeMap<EntityType, Vec<RecordId>> = BTreeMap::new();
        for result in &results {
            by_entity
                .entry(result.record.entity)
                .or_default()
                .push(result.record.id.clone());
        }
        for (entity, ids) in by_entity {
            self.changes.emit(&StoreChange {
                entity,
                kind: ChangeKind::Put,
                ids,
            });
        }
        Ok(results)
    }

    /// Remove every record of the given entity types.
    pub async fn clear(&self, entities: &[EntityType]) -> Result<u64> {
        let mut removed = 0;
        {
            let db = self.db.lock().await;
            let repo = LibSqlRecordRepository::new(db.connection());
            for entity in entities {
                removed += self.write(repo.clear(*entity)).await?;
            }
        }
        for entity in entities {
            self.changes.emit(&StoreChange {
                entity: *entity,
                kind: ChangeKind::Clear,
                ids: Vec::new(),
            });
        }
        Ok(removed)
    }

    /// Apply a pulled copy verbatim, keeping the remote timestamps.
    ///
    /// The stored row is re-read under the same lock and the copy is written
    /// only when absent locally or strictly newer. Returns whether it was
    /// written. Only the conflict resolver should call this.
    pub async fn apply_remote_if_newer(&self, record: &Record) -> Result<bool> {
        let applied = {
            let db = self.db.lock().await;
            let repo = LibSqlRecordRepository::new(db.connection());
            let newer = match repo.get_any(record.entity, &record.id).await? {
                Some(stored) => record.updated_at > stored.updated_at,
                None => true,
            };
            if newer {
                self.write(repo.upsert(record)).await?;
            }
            newer
        };
        if applied {
            self.changes.emit(&StoreChange {
                entity: record.entity,
                kind: ChangeKind::Remote,
                ids: vec![record.id.clone()],
            });
        }
        Ok(applied)
    }

    /// Remove a tombstone once its remote delete is confirmed.
    ///
    /// A record revived by a later put is left alone.
    pub async fn purge(&self, entity: EntityType, id: &RecordId) -> Result<bool> {
        let purged = {
            let db = self.db.lock().await;
            let repo = LibSqlRecordRepository::new(db.connection());
            match repo.get_any(entity, id).await? {
                Some(record) if record.is_deleted() => self.write(repo.remove(entity, id)).await?,
                _ => false,
            }
        };
        if purged {
            self.changes.emit(&StoreChange {
                entity,
                kind: ChangeKind::Purge,
                ids: vec![id.clone()],
            });
        }
        Ok(purged)
    }

    /// Quota used/available and recent error count.
    pub async fn storage_health(&self) -> Result<StorageHealth> {
        let (usage, schema_version) = {
            let db = self.db.lock().await;
            (db.usage().await?, db.schema_version().await?)
        };
        let (recent_errors, last_error) = {
            let mut log = self.errors.lock();
            Self::prune(&mut log, unix_millis_now());
            (log.at.len(), log.last.clone())
        };

        Ok(StorageHealth {
            usage,
            used_bytes: usage.used_bytes(),
            available_bytes: usage.available_bytes(),
            recent_errors,
            last_error,
            schema_version,
            path: self.db_path.clone(),
        })
    }

    /// Record a storage failure seen on a background path.
    pub(crate) fn note_error(&self, error: Error) -> Error {
        let error = classify_storage_error(error);
        if error.is_storage() {
            let now = unix_millis_now();
            let mut log = self.errors.lock();
            Self::prune(&mut log, now);
            log.at.push_back(now);
            log.last = Some(error.to_string());
        }
        error
    }

    async fn write<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match op.await {
            Ok(value) => Ok(value),
            Err(error) => {
                let error = self.note_error(error);
                tracing::warn!("Local write failed: {error}");
                Err(error)
            }
        }
    }

    /// Run `op` between BEGIN and COMMIT, rolling back on any failure.
    async fn transaction<T>(&self, conn: &Connection, op: impl Future<Output = Result<T>>) -> Result<T> {
        if let Err(error) = conn.execute("BEGIN TRANSACTION", ()).await {
            return Err(self.note_error(error.into()));
        }
        let value = match op.await {
            Ok(value) => value,
            Err(error) => {
                conn.execute("ROLLBACK", ()).await.ok();
                let error = self.note_error(error);
                tracing::warn!("Local write rolled back: {error}");
                return Err(error);
            }
        };
        if let Err(error) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(self.note_error(error.into()));
        }
        Ok(value)
    }

    fn emit_delete(&self, entity: EntityType, id: &RecordId) {
        tracing::debug!(entity = %entity, record_id = %id, "Tombstoned record");
        self.changes.emit(&StoreChange {
            entity,
            kind: ChangeKind::Delete,
            ids: vec![id.clone()],
        });
    }

    fn stamp_delete(mut record: Record) -> Record {
        record.updated_at = unix_millis_now().max(record.updated_at + 1);
        record.deleted_at = Some(record.updated_at);
        record
    }

    async fn stamp_put(repo: &LibSqlRecordRepository<'_>, mut record: Record) -> Result<WriteResult> {
        let now = unix_millis_now();
        let existing = repo.get_any(record.entity, &record.id).await?;
        let created = existing.is_none();

        record.updated_at = record.updated_at.max(now);
        if let Some(existing) = existing {
            record.created_at = existing.created_at;
            record.updated_at = record.updated_at.max(existing.updated_at + 1);
        } else if record.created_at <= 0 {
            record.created_at = record.updated_at;
        }
        record.deleted_at = None;

        Ok(WriteResult { record, created })
    }

    fn prune(log: &mut ErrorLog, now: i64) {
        while log
            .at
            .front()
            .is_some_and(|at| now - *at > RECENT_ERROR_WINDOW_MS)
        {
            log.at.pop_front();
        }
    }
}

/// Map medium-level failures (quota, corruption) onto `Error::Storage`.
fn classify_storage_error(error: Error) -> Error {
    let message = error.to_string();
    let lower = message.to_ascii_lowercase();
    let medium_failure = [
        "database or disk is full",
        "disk i/o error",
        "database disk image is malformed",
        "file is not a database",
        "readonly database",
    ]
    .iter()
    .any(|needle| lower.contains(needle));

    if medium_failure {
        Error::Storage(message)
    } else {
        error
    }
}
