//! Durable queue of local mutations awaiting remote confirmation.
//!
//! Items move Pending -> InFlight -> removed on success. A transient failure
//! returns the item to Pending with a bumped retry count and a scheduled
//! delay; the item is abandoned once `retry_count` reaches `max_retries`.
//! Within one entity type the oldest item always goes first, so a failing
//! head blocks the items behind it.

mod worker;

pub use worker::SyncWorker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::db::{LibSqlQueueRepository, NewQueueItem, QueueCount, QueueRepository};
use crate::error::{RemoteError, RemoteErrorKind};
use crate::models::{EntityType, Record, RecordId, SyncFailure, SyncOperation, SyncQueueItem};
use crate::remote::{PushOutcome, RemoteSyncClient};
use crate::store::LocalStore;
use crate::util::{millis_after, unix_millis_now};
use crate::Result;

/// Longest delay between two attempts of one item.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// How many recent failures a snapshot carries.
const SNAPSHOT_FAILURES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Failed attempts before an item is abandoned
    pub max_retries: u32,
    /// Minimum time between two drain passes of one entity type
    pub min_drain_interval: Duration,
    /// Delay after failed attempt `n` is `retry_base_delay * n`
    pub retry_base_delay: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_drain_interval: Duration::from_secs(2),
            retry_base_delay: Duration::from_secs(30),
        }
    }
}

impl QueueSettings {
    fn retry_delay(&self, retry_count: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(retry_count)
            .min(MAX_RETRY_DELAY)
    }
}

/// Why a drain pass stopped before emptying the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStop {
    /// No account key; nothing was attempted.
    Unresolved,
    /// The session was rejected; sync waits for sign-in.
    Auth,
    /// The head item is waiting out its retry delay.
    Backoff,
    /// The head item failed transiently and was rescheduled.
    Transient(RemoteError),
    /// The local queue table could not be read or written.
    Storage(String),
}

/// Summary of one drain pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub entity: EntityType,
    /// Another pass was running, or the minimum interval had not elapsed.
    pub skipped: bool,
    pub applied: u32,
    pub retried: u32,
    pub abandoned: u32,
    pub stopped: Option<DrainStop>,
}

impl DrainReport {
    const fn new(entity: EntityType) -> Self {
        Self {
            entity,
            skipped: false,
            applied: 0,
            retried: 0,
            abandoned: 0,
            stopped: None,
        }
    }
}

/// Counts reported by the queue snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub entities: Vec<QueueCount>,
    pub pending: u64,
    pub in_flight: u64,
    pub abandoned: u64,
    pub recent_failures: Vec<SyncFailure>,
}

#[derive(Default)]
struct DrainSlot {
    running: bool,
    last_started: Option<Instant>,
}

/// Releases a drain slot when the pass ends, even on early return.
struct SlotGuard<'a> {
    slots: &'a Mutex<HashMap<EntityType, DrainSlot>>,
    entity: EntityType,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slots.lock().get_mut(&self.entity) {
            slot.running = false;
        }
    }
}

#[derive(Clone)]
pub struct SyncQueue {
    store: LocalStore,
    /// `None` when running local-only; items then accumulate.
    client: Option<RemoteSyncClient>,
    settings: QueueSettings,
    slots: Arc<Mutex<HashMap<EntityType, DrainSlot>>>,
}

impl SyncQueue {
    /// Open the queue, returning items left InFlight by a crash to Pending.
    pub async fn open(store: LocalStore, client: Option<RemoteSyncClient>, settings: QueueSettings) -> Result<Self> {
        let reset = {
            let db = store.database().lock().await;
            LibSqlQueueRepository::new(db.connection())
                .reset_in_flight()
                .await?
        };
        if reset > 0 {
            tracing::info!(count = reset, "Recovered interrupted sync queue items");
        }

        Ok(Self {
            store,
            client,
            settings,
            slots: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub const fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Queue the remote mirror of a local write.
    pub async fn enqueue(&self, operation: SyncOperation, record: &Record) -> Result<i64> {
        let id = {
            let db = self.store.database().lock().await;
            LibSqlQueueRepository::new(db.connection())
                .enqueue(NewQueueItem {
                    operation,
                    payload: record,
                    enqueued_at: unix_millis_now(),
                    max_retries: self.settings.max_retries,
                })
                .await
                .map_err(|error| self.store.note_error(error))?
        };
        tracing::debug!(entity = %record.entity, record_id = %record.id, operation = %operation, item = id, "Queued sync item");
        Ok(id)
    }

    /// Drain one entity type, honoring the minimum inter-drain interval.
    pub async fn drain(&self, entity: EntityType) -> DrainReport {
        self.drain_with(entity, false).await
    }

    /// Drain one entity type now, ignoring the minimum interval.
    pub async fn drain_now(&self, entity: EntityType) -> DrainReport {
        self.drain_with(entity, true).await
    }

    /// Drain every entity type in turn.
    pub async fn drain_all(&self, force: bool) -> Vec<DrainReport> {
        let mut reports = Vec::with_capacity(EntityType::ALL.len());
        for entity in EntityType::ALL {
            reports.push(self.drain_with(entity, force).await);
        }
        reports
    }

    /// Make every pending item due immediately (used on reconnect).
    pub async fn clear_delays(&self) -> Result<u64> {
        let db = self.store.database().lock().await;
        LibSqlQueueRepository::new(db.connection())
            .clear_delays()
            .await
    }

    pub async fn has_pending(&self, entity: EntityType, id: &RecordId) -> Result<bool> {
        let db = self.store.database().lock().await;
        LibSqlQueueRepository::new(db.connection())
            .has_pending(entity, id)
            .await
    }

    /// Drop pending mutations whose snapshot is older than a winning remote copy.
    pub async fn discard_superseded(&self, entity: EntityType, id: &RecordId, remote_updated_at: i64) -> Result<u64> {
        let discarded = {
            let db = self.store.database().lock().await;
            LibSqlQueueRepository::new(db.connection())
                .discard_older_than(entity, id, remote_updated_at)
                .await?
        };
        if discarded > 0 {
            tracing::debug!(entity = %entity, record_id = %id, count = discarded, "Discarded superseded sync items");
        }
        Ok(discarded)
    }

    /// Items for one entity type in enqueue order.
    pub async fn items(&self, entity: EntityType) -> Result<Vec<SyncQueueItem>> {
        let db = self.store.database().lock().await;
        LibSqlQueueRepository::new(db.connection()).list(entity).await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        let db = self.store.database().lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let entities = repo.counts().await?;
        Ok(QueueSnapshot {
            pending: entities.iter().map(|count| count.pending).sum(),
            in_flight: entities.iter().map(|count| count.in_flight).sum(),
            abandoned: repo.failure_count().await?,
            recent_failures: repo.failures(SNAPSHOT_FAILURES).await?,
            entities,
        })
    }

    fn acquire(&self, entity: EntityType, force: bool) -> Option<SlotGuard<'_>> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(entity).or_default();
        if slot.running {
            return None;
        }
        let now = Instant::now();
        if !force
            && slot
                .last_started
                .is_some_and(|at| now.saturating_duration_since(at) < self.settings.min_drain_interval)
        {
            return None;
        }
        slot.running = true;
        slot.last_started = Some(now);
        Some(SlotGuard {
            slots: &self.slots,
            entity,
        })
    }

    async fn drain_with(&self, entity: EntityType, force: bool) -> DrainReport {
        let mut report = DrainReport::new(entity);
        let Some(_guard) = self.acquire(entity, force) else {
            report.skipped = true;
            return report;
        };

        if let Err(error) = self.drain_pass(entity, &mut report).await {
            let error = self.store.note_error(error);
            tracing::warn!(entity = %entity, "Sync queue drain aborted: {error}");
            report.stopped = Some(DrainStop::Storage(error.to_string()));
        }

        if report.applied + report.retried + report.abandoned > 0 {
            tracing::info!(
                entity = %entity,
                applied = report.applied,
                retried = report.retried,
                abandoned = report.abandoned,
                "Sync queue drained"
            );
        }
        report
    }

    async fn drain_pass(&self, entity: EntityType, report: &mut DrainReport) -> Result<()> {
        let Some(client) = &self.client else {
            if self.head(entity).await?.is_some() {
                report.stopped = Some(DrainStop::Unresolved);
            }
            return Ok(());
        };

        loop {
            let head = {
                let db = self.store.database().lock().await;
                let repo = LibSqlQueueRepository::new(db.connection());
                let Some(head) = repo.head(entity).await? else {
                    return Ok(());
                };
                if !head.is_due(unix_millis_now()) {
                    report.stopped = Some(DrainStop::Backoff);
                    return Ok(());
                }
                repo.mark_in_flight(head.id).await?;
                head
            };

            match client.push(entity, &head.payload, head.operation).await {
                PushOutcome::Applied => {
                    self.complete(&head).await?;
                    report.applied += 1;
                }
                PushOutcome::Unresolved => {
                    self.release(head.id).await?;
                    report.stopped = Some(DrainStop::Unresolved);
                    return Ok(());
                }
                PushOutcome::Failed(error) if error.kind == RemoteErrorKind::Auth => {
                    self.release(head.id).await?;
                    report.stopped = Some(DrainStop::Auth);
                    return Ok(());
                }
                PushOutcome::Failed(error) if error.is_retryable() => {
                    let retry_count = head.retry_count + 1;
                    if retry_count >= head.max_retries {
                        self.abandon(&head, retry_count, &error).await?;
                        report.abandoned += 1;
                        continue;
                    }
                    let delay = self.settings.retry_delay(retry_count);
                    let next_attempt_at = millis_after(unix_millis_now(), delay);
                    {
                        let db = self.store.database().lock().await;
                        LibSqlQueueRepository::new(db.connection())
                            .schedule_retry(head.id, retry_count, next_attempt_at, &error.to_string())
                            .await?;
                    }
                    tracing::warn!(
                        entity = %entity,
                        record_id = %head.record_id,
                        attempt = retry_count,
                        max_retries = head.max_retries,
                        "Sync push failed, retrying in {}ms: {error}",
                        delay.as_millis()
                    );
                    report.retried += 1;
                    report.stopped = Some(DrainStop::Transient(error));
                    return Ok(());
                }
                PushOutcome::Failed(error) => {
                    self.abandon(&head, head.retry_count + 1, &error).await?;
                    report.abandoned += 1;
                }
            }
        }
    }

    async fn head(&self, entity: EntityType) -> Result<Option<SyncQueueItem>> {
        let db = self.store.database().lock().await;
        LibSqlQueueRepository::new(db.connection()).head(entity).await
    }

    /// Purge a confirmed tombstone, then drop the item.
    async fn complete(&self, item: &SyncQueueItem) -> Result<()> {
        if item.operation == SyncOperation::Delete {
            self.store.purge(item.entity, &item.record_id).await?;
        }
        let db = self.store.database().lock().await;
        LibSqlQueueRepository::new(db.connection())
            .remove(item.id)
            .await?;
        Ok(())
    }

    async fn release(&self, id: i64) -> Result<()> {
        let db = self.store.database().lock().await;
        LibSqlQueueRepository::new(db.connection()).release(id).await
    }

    /// Remove an item for good. Local data is left as it is.
    async fn abandon(&self, item: &SyncQueueItem, attempts: u32, error: &RemoteError) -> Result<()> {
        {
            let db = self.store.database().lock().await;
            let repo = LibSqlQueueRepository::new(db.connection());
            repo.record_failure(item, attempts, &error.to_string(), unix_millis_now())
                .await?;
            repo.remove(item.id).await?;
        }
        tracing::warn!(
            entity = %item.entity,
            record_id = %item.record_id,
            operation = %item.operation,
            attempts,
            "Abandoned sync item: {error}"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthState, AuthStateHub};
    use crate::identity::IdentityResolver;
    use crate::models::{AccountKey, Application};
    use crate::remote::{BackendOp, Connectivity, MemoryBackend, RemoteBackend, RetryPolicy};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    struct Fixture {
        store: LocalStore,
        backend: Arc<MemoryBackend>,
        auth: AuthStateHub,
        connectivity: Connectivity,
        queue: SyncQueue,
    }

    fn settings() -> QueueSettings {
        QueueSettings {
            max_retries: 3,
            min_drain_interval: Duration::ZERO,
            retry_base_delay: Duration::ZERO,
        }
    }

    async fn fixture_with(store: LocalStore, backend: Arc<MemoryBackend>, settings: QueueSettings) -> Fixture {
        backend.seed_account("s1", AccountKey(42));
        let policy = RetryPolicy {
            timeout: Duration::from_millis(200),
            max_attempts: 1,
            base_delay: Duration::ZERO,
        };
        let connectivity = Connectivity::new(true);
        let dyn_backend = Arc::clone(&backend) as Arc<dyn RemoteBackend>;
        let identity = IdentityResolver::new(store.clone(), Arc::clone(&dyn_backend), policy, connectivity.clone());
        let auth = AuthStateHub::new();
        auth.set(AuthState::SignedIn {
            session_id: "s1".to_string(),
        });
        let client = RemoteSyncClient::new(dyn_backend, identity, auth.clone(), connectivity.clone(), policy, 100);
        let queue = SyncQueue::open(store.clone(), Some(client), settings).await.unwrap();
        Fixture {
            store,
            backend,
            auth,
            connectivity,
            queue,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(
            LocalStore::open_in_memory().await.unwrap(),
            Arc::new(MemoryBackend::new()),
            settings(),
        )
        .await
    }

    async fn saved(f: &Fixture, company: &str) -> Record {
        let record = Record::from_entity(RecordId::new(), &Application::new(company, "Engineer").unwrap()).unwrap();
        let stored = f.store.put(record).await.unwrap().record;
        f.queue.enqueue(SyncOperation::Create, &stored).await.unwrap();
        stored
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_pushes_in_order_and_empties_queue() {
        let f = fixture().await;
        let first = saved(&f, "Acme").await;
        let second = saved(&f, "Globex").await;

        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.applied, 2);
        assert_eq!(report.stopped, None);
        assert!(f.queue.items(EntityType::Applications).await.unwrap().is_empty());
        assert!(f.backend.row("applications", first.id.as_str()).is_some());
        assert!(f.backend.row("applications", second.id.as_str()).is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_accumulates_without_consuming_retries() {
        let f = fixture().await;
        f.connectivity.set_online(false);
        saved(&f, "Acme").await;
        saved(&f, "Globex").await;

        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.stopped, Some(DrainStop::Unresolved));
        let items = f.queue.items(EntityType::Applications).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.retry_count == 0));
        assert_eq!(f.backend.total_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_abandons_after_exactly_max_retries() {
        let f = fixture().await;
        let record = saved(&f, "Acme").await;
        f.backend.fail_times(BackendOp::Upsert, 10, &RemoteError::transient("reset"));

        for attempt in 1..=2 {
            let report = f.queue.drain(EntityType::Applications).await;
            assert_eq!(report.retried, 1, "attempt {attempt}");
            let items = f.queue.items(EntityType::Applications).await.unwrap();
            assert_eq!(items[0].retry_count, attempt);
        }

        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.abandoned, 1);
        assert!(f.queue.items(EntityType::Applications).await.unwrap().is_empty());
        assert_eq!(f.backend.calls(BackendOp::Upsert), 3);

        let snapshot = f.queue.snapshot().await.unwrap();
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(snapshot.recent_failures[0].attempts, 3);
        assert!(f
            .store
            .get(EntityType::Applications, &record.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_head_blocks_later_items() {
        let f = fixture().await;
        saved(&f, "Acme").await;
        saved(&f, "Globex").await;
        f.backend.fail_next(BackendOp::Upsert, RemoteError::transient("reset"));

        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.applied, 0);
        assert!(matches!(report.stopped, Some(DrainStop::Transient(_))));
        assert_eq!(f.backend.calls(BackendOp::Upsert), 1);

        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.applied, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_permission_error_abandons_immediately() {
        let f = fixture().await;
        saved(&f, "Acme").await;
        saved(&f, "Globex").await;
        f.backend.fail_next(BackendOp::Upsert, RemoteError::permission("row-level security"));

        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(f.queue.snapshot().await.unwrap().abandoned, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auth_error_stops_without_consuming_retry() {
        let f = fixture().await;
        saved(&f, "Acme").await;
        f.backend.fail_next(BackendOp::FindAccount, RemoteError::auth("jwt expired"));

        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.stopped, Some(DrainStop::Unresolved));
        assert!(f.auth.current().needs_reauth());
        let items = f.queue.items(EntityType::Applications).await.unwrap();
        assert_eq!(items[0].retry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirmed_delete_purges_tombstone() {
        let f = fixture().await;
        let record = saved(&f, "Acme").await;
        f.queue.drain(EntityType::Applications).await;

        let tombstone = f
            .store
            .delete(EntityType::Applications, &record.id)
            .await
            .unwrap()
            .unwrap();
        f.queue.enqueue(SyncOperation::Delete, &tombstone).await.unwrap();
        let report = f.queue.drain(EntityType::Applications).await;

        assert_eq!(report.applied, 1);
        assert!(f.backend.row("applications", record.id.as_str()).is_none());
        assert!(f
            .store
            .get_any(EntityType::Applications, &record.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_min_interval_and_single_drain_per_type() {
        let f = fixture_with(
            LocalStore::open_in_memory().await.unwrap(),
            Arc::new(MemoryBackend::new()),
            QueueSettings {
                min_drain_interval: Duration::from_secs(60),
                ..settings()
            },
        )
        .await;
        saved(&f, "Acme").await;

        assert!(!f.queue.drain(EntityType::Applications).await.skipped);
        assert!(f.queue.drain(EntityType::Applications).await.skipped);
        assert!(!f.queue.drain(EntityType::Goals).await.skipped);
        assert!(!f.queue.drain_now(EntityType::Applications).await.skipped);

        f.backend.set_latency(Duration::from_millis(50));
        saved(&f, "Globex").await;
        let (a, b) = tokio::join!(
            f.queue.drain_now(EntityType::Applications),
            f.queue.drain_now(EntityType::Applications)
        );
        assert!(a.skipped != b.skipped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backoff_delays_next_attempt() {
        let f = fixture_with(
            LocalStore::open_in_memory().await.unwrap(),
            Arc::new(MemoryBackend::new()),
            QueueSettings {
                retry_base_delay: Duration::from_secs(60),
                ..settings()
            },
        )
        .await;
        saved(&f, "Acme").await;
        f.backend.fail_next(BackendOp::Upsert, RemoteError::transient("reset"));

        f.queue.drain(EntityType::Applications).await;
        let report = f.queue.drain(EntityType::Applications).await;
        assert_eq!(report.stopped, Some(DrainStop::Backoff));

        f.queue.clear_delays().await.unwrap();
        assert_eq!(f.queue.drain(EntityType::Applications).await.applied, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_in_flight_items_recovered_on_open() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("pursuit.db");
        {
            let f = fixture_with(
                LocalStore::open_path(&path).await.unwrap(),
                Arc::new(MemoryBackend::new()),
                settings(),
            )
            .await;
            saved(&f, "Acme").await;
            let db = f.store.database().lock().await;
            let repo = LibSqlQueueRepository::new(db.connection());
            let head = repo.head(EntityType::Applications).await.unwrap().unwrap();
            repo.mark_in_flight(head.id).await.unwrap();
        }

        let f = fixture_with(
            LocalStore::open_path(&path).await.unwrap(),
            Arc::new(MemoryBackend::new()),
            settings(),
        )
        .await;
        let snapshot = f.queue.snapshot().await.unwrap();
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(f.queue.drain(EntityType::Applications).await.applied, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discard_superseded() {
        let f = fixture().await;
        let record = saved(&f, "Acme").await;
        assert!(f.queue.has_pending(EntityType::Applications, &record.id).await.unwrap());

        let discarded = f
            .queue
            .discard_superseded(EntityType::Applications, &record.id, record.updated_at + 1)
            .await
            .unwrap();
        assert_eq!(discarded, 1);
        assert!(!f.queue.has_pending(EntityType::Applications, &record.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_only_queue_accumulates() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue = SyncQueue::open(store.clone(), None, settings()).await.unwrap();
        let record = store
            .put(Record::from_entity(RecordId::new(), &Application::new("Acme", "Engineer").unwrap()).unwrap())
            .await
            .unwrap()
            .record;
        queue.enqueue(SyncOperation::Create, &record).await.unwrap();

        let report = queue.drain(EntityType::Applications).await;
        assert_eq!(report.stopped, Some(DrainStop::Unresolved));
        assert_eq!(queue.snapshot().await.unwrap().pending, 1);
        assert_eq!(queue.drain(EntityType::Goals).await.stopped, None);
    }
}
