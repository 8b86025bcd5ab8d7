//! The tracker facade: one explicitly constructed owner for every component.
//!
//! Writes land in the local store and are mirrored into the sync queue before
//! returning. Reads are served from the result cache or the local store and
//! may start a background pull; they never wait on the remote.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::admin::{AdminAggregator, AdminReport};
use crate::auth::{AuthSession, AuthState, AuthStateHub};
use crate::cache::{CacheKey, CacheStatus, ResultCache};
use crate::config::TrackerConfig;
use crate::conflict::{ConflictResolver, ReconcileReport};
use crate::db::OrderBy;
use crate::events::Subscription;
use crate::identity::IdentityResolver;
use crate::models::{EntityType, Record, RecordId, SyncConflict};
use crate::queue::{DrainReport, QueueSnapshot, SyncQueue, SyncWorker};
use crate::remote::{Connectivity, RemoteBackend, RemoteSyncClient, RestBackend};
use crate::store::{LocalStore, StorageHealth};
use crate::Result;

/// Outcome of [`Tracker::force_refresh`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshReport {
    pub drained: Vec<DrainReport>,
    pub reconciled: Vec<(EntityType, ReconcileReport)>,
}

/// Remote-side components, present only when a backend is configured.
#[derive(Clone)]
struct Remote {
    backend: Arc<dyn RemoteBackend>,
    identity: IdentityResolver,
    client: RemoteSyncClient,
}

/// Pull and reconcile, shared with background pull tasks.
#[derive(Clone)]
struct Puller {
    remote: Option<Remote>,
    resolver: ConflictResolver,
    pulling: Arc<Mutex<HashSet<EntityType>>>,
}

impl Puller {
    async fn refresh(&self, entity: EntityType) -> Result<ReconcileReport> {
        let Some(remote) = &self.remote else {
            return Ok(ReconcileReport::default());
        };
        let Some(account_key) = remote.client.resolve_account().await else {
            tracing::debug!(entity = %entity, "Skipping pull; account unresolved");
            return Ok(ReconcileReport::default());
        };

        match remote.client.pull_all(entity, account_key).await {
            Ok(records) => self.resolver.reconcile(entity, records).await,
            Err(error) => {
                tracing::debug!(entity = %entity, "Pull skipped: {error}");
                Ok(ReconcileReport::default())
            }
        }
    }

    /// Refresh unless a pull for `entity` is already running.
    async fn refresh_once(&self, entity: EntityType) {
        if !self.pulling.lock().insert(entity) {
            return;
        }
        if let Err(error) = self.refresh(entity).await {
            tracing::warn!(entity = %entity, "Background pull failed: {error}");
        }
        self.pulling.lock().remove(&entity);
    }
}

pub struct Tracker {
    config: TrackerConfig,
    store: LocalStore,
    cache: ResultCache<Vec<Record>>,
    auth: AuthStateHub,
    connectivity: Connectivity,
    queue: SyncQueue,
    puller: Puller,
    admin: AdminAggregator,
    worker: Mutex<Option<SyncWorker>>,
    background: Mutex<JoinSet<()>>,
    _subscriptions: Vec<Subscription>,
}

impl Tracker {
    /// Open the store and wire every component.
    ///
    /// `backend` overrides the backend built from `config.remote`. With
    /// neither, the tracker runs local-only.
    pub async fn init(config: TrackerConfig, backend: Option<Arc<dyn RemoteBackend>>) -> Result<Self> {
        let store = match &config.db_path {
            Some(path) => LocalStore::open_path(path).await?,
            None => LocalStore::open_in_memory().await?,
        };

        let backend = backend.or_else(|| {
            let remote = config.remote.as_ref()?;
            match RestBackend::new(&remote.url, remote.api_key.clone()) {
                Ok(backend) => Some(Arc::new(backend) as Arc<dyn RemoteBackend>),
                Err(error) => {
                    tracing::warn!("Remote backend unavailable, running local-only: {error}");
                    None
                }
            }
        });

        let auth = AuthStateHub::new();
        let connectivity = Connectivity::default();
        let policy = config.retry_policy();
        let remote = backend.map(|backend| {
            let identity = IdentityResolver::new(store.clone(), Arc::clone(&backend), policy, connectivity.clone());
            let client = RemoteSyncClient::new(
                Arc::clone(&backend),
                identity.clone(),
                auth.clone(),
                connectivity.clone(),
                policy,
                config.pull_page_size,
            );
            Remote {
                backend,
                identity,
                client,
            }
        });

        let client = remote.as_ref().map(|remote| remote.client.clone());
        let queue = SyncQueue::open(store.clone(), client.clone(), config.queue_settings()).await?;
        let resolver = ConflictResolver::new(store.clone(), queue.clone());
        let admin = AdminAggregator::new(client, store.clone(), config.admin_settings());

        let cache = ResultCache::new(config.cache_ttl);
        let mut subscriptions = vec![cache.attach(&store)];
        if let Some(remote) = &remote {
            let cache = cache.clone();
            subscriptions.push(remote.identity.subscribe(move |change| {
                tracing::debug!(previous = ?change.previous, current = ?change.current, "Account changed; clearing cache");
                cache.clear();
            }));
        }

        let worker = remote
            .is_some()
            .then(|| SyncWorker::spawn(queue.clone(), connectivity.clone(), config.queue_drain_interval));

        if remote.is_some() {
            tracing::info!("Tracker initialized with remote sync");
        } else {
            tracing::info!("Tracker initialized local-only; changes stay queued");
        }

        Ok(Self {
            config,
            store,
            cache,
            auth,
            connectivity,
            queue,
            puller: Puller {
                remote,
                resolver,
                pulling: Arc::new(Mutex::new(HashSet::new())),
            },
            admin,
            worker: Mutex::new(worker),
            background: Mutex::new(JoinSet::new()),
            _subscriptions: subscriptions,
        })
    }

    /// Stop the worker and wait for background pulls.
    pub async fn teardown(self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
        let mut background = std::mem::take(&mut *self.background.lock());
        while background.join_next().await.is_some() {}
        tracing::info!("Tracker stopped");
    }

    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn is_local_only(&self) -> bool {
        self.puller.remote.is_none()
    }

    /// Store a record locally and queue its remote mirror in one transaction.
    pub async fn save(&self, record: Record) -> Result<Record> {
        let queued = self
            .store
            .put_and_enqueue(record, self.queue.settings().max_retries)
            .await?;
        self.nudge();
        Ok(queued.record)
    }

    /// Tombstone a record and queue the remote delete in one transaction.
    pub async fn delete(&self, entity: EntityType, id: &RecordId) -> Result<bool> {
        let queued = self
            .store
            .delete_and_enqueue(entity, id, self.queue.settings().max_retries)
            .await?;
        if queued.is_none() {
            return Ok(false);
        }
        self.nudge();
        Ok(true)
    }

    pub async fn get(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>> {
        let key = CacheKey::record(entity, id);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.into_iter().next());
        }
        let record = self.store.get(entity, id).await?;
        if let Some(record) = &record {
            self.cache.set(key, vec![record.clone()]);
        }
        Ok(record)
    }

    /// Cached or local listing; a cache miss also starts a background pull.
    pub async fn list(&self, entity: EntityType, order: OrderBy) -> Result<Vec<Record>> {
        let key = CacheKey::list(entity, order);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let records = self.store.list(entity, order).await?;
        self.cache.set(key, records.clone());
        self.spawn_pull(entity);
        Ok(records)
    }

    /// Drain every entity type's queue now.
    pub async fn sync(&self) -> Vec<DrainReport> {
        self.queue.drain_all(true).await
    }

    /// Pull one entity type and reconcile it now.
    pub async fn refresh(&self, entity: EntityType) -> Result<ReconcileReport> {
        self.puller.refresh(entity).await
    }

    /// Clear the cache, drain the queue and pull every entity type.
    pub async fn force_refresh(&self) -> Result<RefreshReport> {
        self.cache.clear();
        self.queue.clear_delays().await?;
        let drained = self.queue.drain_all(true).await;

        let mut reconciled = Vec::with_capacity(EntityType::ALL.len());
        for entity in EntityType::ALL {
            reconciled.push((entity, self.puller.refresh(entity).await?));
        }
        tracing::info!("Forced refresh complete");
        Ok(RefreshReport { drained, reconciled })
    }

    /// Hand over a signed-in session from the auth subsystem.
    pub async fn sign_in(&self, session: &AuthSession) -> Result<()> {
        let previous = self.auth.current();
        let changed = match &previous {
            AuthState::SignedIn { session_id } | AuthState::ReauthRequired { session_id } => {
                *session_id != session.session_id
            }
            AuthState::SignedOut => false,
        };

        if let Some(remote) = &self.puller.remote {
            remote
                .backend
                .set_access_token(Some(session.access_token.clone()));
            if changed {
                remote.identity.invalidate().await?;
            }
        }
        if changed {
            self.cache.clear();
        }

        self.auth.set(AuthState::SignedIn {
            session_id: session.session_id.clone(),
        });
        self.nudge();
        Ok(())
    }

    /// Forget the session, the identity and cached results. Local records
    /// and queued changes stay.
    pub async fn sign_out(&self) -> Result<()> {
        self.auth.set(AuthState::SignedOut);
        if let Some(remote) = &self.puller.remote {
            remote.backend.set_access_token(None);
            remote.identity.invalidate().await?;
        }
        self.cache.clear();
        Ok(())
    }

    /// Report connectivity. Going online drains the queue immediately.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache.status()
    }

    pub async fn storage_health(&self) -> Result<StorageHealth> {
        self.store.storage_health().await
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSnapshot> {
        self.queue.snapshot().await
    }

    pub async fn recent_conflicts(&self, limit: u32) -> Result<Vec<SyncConflict>> {
        self.puller.resolver.recent_conflicts(limit).await
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.current()
    }

    pub fn subscribe_auth(&self, handler: impl Fn(&AuthState) + Send + Sync + 'static) -> Subscription {
        self.auth.subscribe(handler)
    }

    /// Cross-account report, or a local rollup when the remote is unreachable.
    pub async fn admin(&self) -> Result<AdminReport> {
        self.admin.report().await
    }

    fn nudge(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.nudge();
        }
    }

    fn spawn_pull(&self, entity: EntityType) {
        if self.puller.remote.is_none()
            || !self.connectivity.is_online()
            || self.auth.current().active_session().is_none()
        {
            return;
        }
        let puller = self.puller.clone();
        let mut background = self.background.lock();
        while background.try_join_next().is_some() {}
        background.spawn(async move { puller.refresh_once(entity).await });
    }
}
