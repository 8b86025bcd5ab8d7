//! Sync queue repository implementation

use crate::error::Result;
use crate::models::{
    EntityType, QueueItemState, Record, RecordId, SyncFailure, SyncOperation, SyncQueueItem,
};
use libsql::{params, Connection, Row};

/// A mutation about to be queued
#[derive(Debug, Clone)]
pub struct NewQueueItem<'a> {
    pub operation: SyncOperation,
    pub payload: &'a Record,
    pub enqueued_at: i64,
    pub max_retries: u32,
}

/// Per-entity queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCount {
    pub entity: EntityType,
    pub pending: u64,
    pub in_flight: u64,
}

/// Trait for durable queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Append an item, returning its rowid
    async fn enqueue(&self, item: NewQueueItem<'_>) -> Result<i64>;

    /// Oldest item for an entity type, regardless of due time
    async fn head(&self, entity: EntityType) -> Result<Option<SyncQueueItem>>;

    /// Every item for an entity type in enqueue order
    async fn list(&self, entity: EntityType) -> Result<Vec<SyncQueueItem>>;

    async fn mark_in_flight(&self, id: i64) -> Result<()>;

    /// Return an item to Pending with a bumped retry count
    async fn schedule_retry(&self, id: i64, retry_count: u32, next_attempt_at: i64, error: &str) -> Result<()>;

    /// Return an item to Pending without consuming a retry
    async fn release(&self, id: i64) -> Result<()>;

    async fn remove(&self, id: i64) -> Result<bool>;

    /// Reset items left InFlight by an interrupted drain
    async fn reset_in_flight(&self) -> Result<u64>;

    /// Make every pending item due immediately
    async fn clear_delays(&self) -> Result<u64>;

    async fn has_pending(&self, entity: EntityType, record_id: &RecordId) -> Result<bool>;

    /// Drop pending items for a record whose snapshot is older than `updated_at`
    async fn discard_older_than(&self, entity: EntityType, record_id: &RecordId, updated_at: i64) -> Result<u64>;

    async fn counts(&self) -> Result<Vec<QueueCount>>;

    async fn record_failure(&self, item: &SyncQueueItem, attempts: u32, error: &str, failed_at: i64) -> Result<()>;

    async fn failures(&self, limit: u32) -> Result<Vec<SyncFailure>>;

    async fn failure_count(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

const ITEM_COLUMNS: &str = "id, entity, operation, record_id, payload, enqueued_at, retry_count, max_retries, state, next_attempt_at, last_error";

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<SyncQueueItem> {
        let entity: String = row.get(1)?;
        let operation: String = row.get(2)?;
        let record_id: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let state: String = row.get(8)?;

        Ok(SyncQueueItem {
            id: row.get(0)?,
            entity: entity.parse()?,
            operation: operation.parse()?,
            record_id: RecordId::parse(record_id)?,
            payload: serde_json::from_str(&payload)?,
            enqueued_at: row.get(5)?,
            retry_count: row.get(6)?,
            max_retries: row.get(7)?,
            state: state.parse()?,
            next_attempt_at: row.get(9)?,
            last_error: row.get(10)?,
        })
    }

    fn parse_failure(row: &Row) -> Result<SyncFailure> {
        let entity: String = row.get(1)?;
        let operation: String = row.get(3)?;
        Ok(SyncFailure {
            id: row.get(0)?,
            entity: entity.parse()?,
            record_id: row.get(2)?,
            operation: operation.parse()?,
            attempts: row.get(4)?,
            error: row.get(5)?,
            failed_at: row.get(6)?,
        })
    }

    async fn count_query(&self, sql: &str) -> Result<u64> {
        let mut rows = self.conn.query(sql, ()).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn enqueue(&self, item: NewQueueItem<'_>) -> Result<i64> {
        let payload = serde_json::to_string(item.payload)?;
        self.conn
            .execute(
                "INSERT INTO sync_queue
                    (entity, operation, record_id, payload, payload_updated_at, enqueued_at, max_retries, state, next_attempt_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', 0)",
                params![
                    item.payload.entity.as_str(),
                    item.operation.as_str(),
                    item.payload.id.as_str(),
                    payload,
                    item.payload.updated_at,
                    item.enqueued_at,
                    item.max_retries
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn head(&self, entity: EntityType) -> Result<Option<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE entity = ? ORDER BY id ASC LIMIT 1"),
                params![entity.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, entity: EntityType) -> Result<Vec<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE entity = ? ORDER BY id ASC"),
                params![entity.as_str()],
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    async fn mark_in_flight(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue SET state = ? WHERE id = ?",
                params![QueueItemState::InFlight.as_str(), id],
            )
            .await?;
        Ok(())
    }

    async fn schedule_retry(&self, id: i64, retry_count: u32, next_attempt_at: i64, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue
                 SET state = ?, retry_count = ?, next_attempt_at = ?, last_error = ?
                 WHERE id = ?",
                params![
                    QueueItemState::Pending.as_str(),
                    retry_count,
                    next_attempt_at,
                    error,
                    id
                ],
            )
            .await?;
        Ok(())
    }

    async fn release(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue SET state = ? WHERE id = ?",
                params![QueueItemState::Pending.as_str(), id],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
            .await?;
        Ok(affected > 0)
    }

    async fn reset_in_flight(&self) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "UPDATE sync_queue SET state = ? WHERE state = ?",
                params![
                    QueueItemState::Pending.as_str(),
                    QueueItemState::InFlight.as_str()
                ],
            )
            .await?)
    }

    async fn clear_delays(&self) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "UPDATE sync_queue SET next_attempt_at = 0 WHERE next_attempt_at > 0",
                (),
            )
            .await?)
    }

    async fn has_pending(&self, entity: EntityType, record_id: &RecordId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM sync_queue WHERE entity = ? AND record_id = ?)",
                params![entity.as_str(), record_id.as_str()],
            )
            .await?;
        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    async fn discard_older_than(&self, entity: EntityType, record_id: &RecordId, updated_at: i64) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM sync_queue
                 WHERE entity = ? AND record_id = ? AND state = ? AND payload_updated_at < ?",
                params![
                    entity.as_str(),
                    record_id.as_str(),
                    QueueItemState::Pending.as_str(),
                    updated_at
                ],
            )
            .await?)
    }

    async fn counts(&self) -> Result<Vec<QueueCount>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity,
                        SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN state = 'in_flight' THEN 1 ELSE 0 END)
                 FROM sync_queue
                 GROUP BY entity
                 ORDER BY entity",
                (),
            )
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            let entity: String = row.get(0)?;
            counts.push(QueueCount {
                entity: entity.parse()?,
                pending: u64::try_from(row.get::<i64>(1)?).unwrap_or_default(),
                in_flight: u64::try_from(row.get::<i64>(2)?).unwrap_or_default(),
            });
        }
        Ok(counts)
    }

    async fn record_failure(&self, item: &SyncQueueItem, attempts: u32, error: &str, failed_at: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_failures (entity, record_id, operation, attempts, error, failed_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    item.entity.as_str(),
                    item.record_id.as_str(),
                    item.operation.as_str(),
                    attempts,
                    error,
                    failed_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn failures(&self, limit: u32) -> Result<Vec<SyncFailure>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, record_id, operation, attempts, error, failed_at
                 FROM sync_failures
                 ORDER BY failed_at DESC, id DESC
                 LIMIT ?",
                params![limit],
            )
            .await?;
        let mut failures = Vec::new();
        while let Some(row) = rows.next().await? {
            failures.push(Self::parse_failure(&row)?);
        }
        Ok(failures)
    }

    async fn failure_count(&self) -> Result<u64> {
        self.count_query("SELECT COUNT(*) FROM sync_failures").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn record(id: &str, updated_at: i64) -> Record {
        let mut record = Record::with_id(
            EntityType::Goals,
            RecordId::parse(id).unwrap(),
            json!({"dailyGoal": 3}).as_object().cloned().unwrap(),
        );
        record.updated_at = updated_at;
        record
    }

    fn new_item(payload: &Record) -> NewQueueItem<'_> {
        NewQueueItem {
            operation: SyncOperation::Create,
            payload,
            enqueued_at: 10,
            max_retries: 3,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_preserves_order() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let first = record("g1", 100);
        let second = record("g2", 200);
        repo.enqueue(new_item(&first)).await.unwrap();
        repo.enqueue(new_item(&second)).await.unwrap();

        let head = repo.head(EntityType::Goals).await.unwrap().unwrap();
        assert_eq!(head.record_id.as_str(), "g1");
        assert_eq!(head.payload, first);
        assert_eq!(head.state, QueueItemState::Pending);
        assert_eq!(repo.list(EntityType::Goals).await.unwrap().len(), 2);
        assert!(repo.head(EntityType::Applications).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_and_reset() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let payload = record("g1", 100);
        let id = repo.enqueue(new_item(&payload)).await.unwrap();
        repo.mark_in_flight(id).await.unwrap();
        assert_eq!(repo.counts().await.unwrap()[0].in_flight, 1);

        assert_eq!(repo.reset_in_flight().await.unwrap(), 1);
        repo.schedule_retry(id, 1, 5_000, "timeout").await.unwrap();

        let item = repo.head(EntityType::Goals).await.unwrap().unwrap();
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.next_attempt_at, 5_000);
        assert_eq!(item.last_error.as_deref(), Some("timeout"));
        assert!(!item.is_due(4_999));

        repo.clear_delays().await.unwrap();
        assert!(repo.head(EntityType::Goals).await.unwrap().unwrap().is_due(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discard_older_than() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let stale = record("g1", 100);
        let fresh = record("g1", 300);
        repo.enqueue(new_item(&stale)).await.unwrap();
        repo.enqueue(new_item(&fresh)).await.unwrap();

        let id = RecordId::parse("g1").unwrap();
        assert_eq!(
            repo.discard_older_than(EntityType::Goals, &id, 200)
                .await
                .unwrap(),
            1
        );
        assert!(repo.has_pending(EntityType::Goals, &id).await.unwrap());
        assert_eq!(repo.head(EntityType::Goals).await.unwrap().unwrap().payload, fresh);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failures_are_recorded() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let payload = record("g1", 100);
        repo.enqueue(new_item(&payload)).await.unwrap();
        let item = repo.head(EntityType::Goals).await.unwrap().unwrap();
        repo.record_failure(&item, 3, "timeout", 999).await.unwrap();
        assert!(repo.remove(item.id).await.unwrap());

        assert_eq!(repo.failure_count().await.unwrap(), 1);
        let failures = repo.failures(10).await.unwrap();
        assert_eq!(failures[0].record_id, "g1");
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(failures[0].operation, SyncOperation::Create);
    }
}
