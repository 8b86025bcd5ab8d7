//! Push/pull protocol over a [`RemoteBackend`].

use std::sync::Arc;

use super::backend::{RemoteBackend, RemoteQuery, RemoteResult};
use super::connectivity::Connectivity;
use super::mapper::{RemoteRecord, RowMapper};
use super::retry::RetryPolicy;
use crate::auth::AuthStateHub;
use crate::error::{RemoteError, RemoteErrorKind};
use crate::identity::IdentityResolver;
use crate::models::{AccountKey, EntityType, Record, SyncOperation};
use crate::util::unix_millis_now;
use crate::Error;

/// Default and maximum rows per pulled page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on rows fetched by one `pull_all`.
pub const PULL_ALL_MAX_ROWS: u32 = 10_000;

/// Result of pushing one mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote confirmed the mutation.
    Applied,
    /// No account key (offline or signed out); nothing was sent.
    Unresolved,
    /// The remote rejected the mutation, after retries where applicable.
    Failed(RemoteError),
}

/// Paging for scoped pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PullOptions {
    /// Page size; capped at the client's maximum
    pub limit: Option<u32>,
    pub offset: u32,
}

#[derive(Clone)]
pub struct RemoteSyncClient {
    backend: Arc<dyn RemoteBackend>,
    identity: IdentityResolver,
    auth: AuthStateHub,
    connectivity: Connectivity,
    policy: RetryPolicy,
    max_page_size: u32,
}

impl RemoteSyncClient {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        identity: IdentityResolver,
        auth: AuthStateHub,
        connectivity: Connectivity,
        policy: RetryPolicy,
        max_page_size: u32,
    ) -> Self {
        Self {
            backend,
            identity,
            auth,
            connectivity,
            policy,
            max_page_size: max_page_size.max(1),
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub const fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    /// Account key for the active session, if sync is available.
    pub async fn resolve_account(&self) -> Option<AccountKey> {
        let state = self.auth.current();
        let session_id = state.active_session()?;
        match self.identity.resolve(session_id).await {
            Ok(key) => key,
            Err(Error::Remote(error)) => {
                self.handle_failure("accounts", &error).await;
                None
            }
            Err(error) => {
                tracing::warn!("Identity resolution failed: {error}");
                None
            }
        }
    }

    /// Push one mutation. Never panics or errors; failures are classified
    /// in the outcome.
    pub async fn push(&self, entity: EntityType, record: &Record, operation: SyncOperation) -> PushOutcome {
        if !self.connectivity.is_online() {
            return PushOutcome::Unresolved;
        }
        let Some(account_key) = self.resolve_account().await else {
            return PushOutcome::Unresolved;
        };

        let table = entity.remote_table();
        let id = record.id.as_str();
        let result = match operation {
            SyncOperation::Create => self.upsert(entity, record, account_key).await,
            SyncOperation::Update => {
                let row = RowMapper::new(entity).to_remote(record, account_key, unix_millis_now());
                let backend = &self.backend;
                match self
                    .policy
                    .run("update", move || backend.update(table, id, account_key, row.clone()))
                    .await
                {
                    // Nothing to update remotely (never created, or purged): create it.
                    Ok(0) => self.upsert(entity, record, account_key).await,
                    Ok(_) => Ok(()),
                    Err(error) => Err(error),
                }
            }
            SyncOperation::Delete => {
                let backend = &self.backend;
                self.policy
                    .run("delete", move || backend.delete(table, id, account_key))
                    .await
                    .map(|_| ())
            }
        };

        match result {
            Ok(()) => {
                tracing::debug!(entity = %entity, record_id = %record.id, operation = %operation, "Push applied");
                PushOutcome::Applied
            }
            Err(error) => {
                self.handle_failure(table, &error).await;
                PushOutcome::Failed(error)
            }
        }
    }

    /// Pull one page for `account_key`. Failures resolve to an empty page.
    pub async fn pull(&self, entity: EntityType, account_key: AccountKey, options: PullOptions) -> Vec<Record> {
        match self.pull_page(entity, account_key, options).await {
            Ok(records) => records,
            Err(error) => {
                tracing::debug!(entity = %entity, "Pull returned nothing: {error}");
                Vec::new()
            }
        }
    }

    /// Pull one page, surfacing the failure.
    pub async fn pull_page(
        &self,
        entity: EntityType,
        account_key: AccountKey,
        options: PullOptions,
    ) -> RemoteResult<Vec<Record>> {
        let limit = self.page_limit(options.limit);
        let rows = self
            .select(entity, RemoteQuery::scoped(account_key, limit, options.offset))
            .await?;
        Ok(rows.into_iter().map(|row| row.record).collect())
    }

    /// Pull every page for `account_key`, up to a bounded total.
    pub async fn pull_all(&self, entity: EntityType, account_key: AccountKey) -> RemoteResult<Vec<Record>> {
        let limit = self.max_page_size;
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            let page = self
                .pull_page(
                    entity,
                    account_key,
                    PullOptions {
                        limit: Some(limit),
                        offset,
                    },
                )
                .await?;
            let fetched = u32::try_from(page.len()).unwrap_or(u32::MAX);
            records.extend(page);
            offset = offset.saturating_add(fetched);
            if fetched < limit || offset >= PULL_ALL_MAX_ROWS {
                break;
            }
        }
        Ok(records)
    }

    /// Cross-account page for reporting. The row's `user_id` is kept.
    pub async fn pull_unscoped(&self, entity: EntityType, limit: u32, offset: u32) -> RemoteResult<Vec<RemoteRecord>> {
        if !self.connectivity.is_online() {
            return Err(RemoteError::transient("offline"));
        }
        self.select(entity, RemoteQuery::unscoped(limit.max(1), offset))
            .await
    }

    async fn select(&self, entity: EntityType, query: RemoteQuery) -> RemoteResult<Vec<RemoteRecord>> {
        if !self.connectivity.is_online() {
            return Err(RemoteError::transient("offline"));
        }
        let table = entity.remote_table();
        let backend = &self.backend;
        let rows = match self
            .policy
            .run("select", move || backend.select(table, query))
            .await
        {
            Ok(rows) => rows,
            Err(error) => {
                self.handle_failure(table, &error).await;
                return Err(error);
            }
        };

        let mapper = RowMapper::new(entity);
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match mapper.from_remote(row) {
                Ok(record) => records.push(record),
                Err(error) => tracing::error!(entity = %entity, "Skipping undecodable remote row: {error}"),
            }
        }
        Ok(records)
    }

    async fn upsert(&self, entity: EntityType, record: &Record, account_key: AccountKey) -> RemoteResult<()> {
        let table = entity.remote_table();
        let row = RowMapper::new(entity).to_remote(record, account_key, unix_millis_now());
        let backend = &self.backend;
        self.policy
            .run("upsert", move || backend.upsert(table, row.clone()))
            .await
    }

    fn page_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, self.max_page_size)
    }

    async fn handle_failure(&self, table: &str, error: &RemoteError) {
        match error.kind {
            RemoteErrorKind::Auth => {
                tracing::warn!(table, "Session rejected by remote: {error}");
                if let Err(clear_error) = self.identity.invalidate().await {
                    tracing::warn!("Failed to clear cached identity: {clear_error}");
                }
                self.auth.require_reauth();
            }
            RemoteErrorKind::Permission | RemoteErrorKind::Schema => {
                tracing::error!(table, kind = %error.kind, "Remote rejected request: {}", error.message);
            }
            RemoteErrorKind::TransientNetwork | RemoteErrorKind::Conflict => {
                tracing::warn!(table, kind = %error.kind, "Remote call failed: {}", error.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthState;
    use crate::remote::{BackendOp, MemoryBackend};
    use crate::store::LocalStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        auth: AuthStateHub,
        identity: IdentityResolver,
        client: RemoteSyncClient,
    }

    async fn fixture() -> Fixture {
        let store = LocalStore::open_in_memory().await.unwrap();
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_account("s1", AccountKey(42));
        let policy = RetryPolicy {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let connectivity = Connectivity::new(true);
        let dyn_backend = Arc::clone(&backend) as Arc<dyn RemoteBackend>;
        let identity = IdentityResolver::new(store, Arc::clone(&dyn_backend), policy, connectivity.clone());
        let auth = AuthStateHub::new();
        auth.set(AuthState::SignedIn {
            session_id: "s1".to_string(),
        });
        let client = RemoteSyncClient::new(dyn_backend, identity.clone(), auth.clone(), connectivity, policy, 2);
        Fixture {
            backend,
            auth,
            identity,
            client,
        }
    }

    fn goal(id: &str, created_at: i64) -> Record {
        let mut record = Record::with_id(
            EntityType::Goals,
            crate::models::RecordId::parse(id).unwrap(),
            json!({"dailyGoal": 1, "weeklyGoal": 5, "monthlyGoal": 20})
                .as_object()
                .cloned()
                .unwrap(),
        );
        record.created_at = created_at;
        record.updated_at = created_at;
        record
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_attaches_account_and_sync_time() {
        let f = fixture().await;
        let record = goal("g1", 10);
        assert_eq!(
            f.client.push(EntityType::Goals, &record, SyncOperation::Create).await,
            PushOutcome::Applied
        );

        let row = f.backend.row("goals", "g1").unwrap();
        assert_eq!(row["user_id"], json!(42));
        assert!(row["synced_at"].as_i64().unwrap() > 0);
        assert_eq!(row["daily_goal"], json!(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_push_twice_is_idempotent() {
        let f = fixture().await;
        let record = goal("g1", 10);
        f.client.push(EntityType::Goals, &record, SyncOperation::Create).await;
        let mut once = f.backend.row("goals", "g1").unwrap();
        f.client.push(EntityType::Goals, &record, SyncOperation::Create).await;
        let mut twice = f.backend.row("goals", "g1").unwrap();

        once.remove("synced_at");
        twice.remove("synced_at");
        assert_eq!(once, twice);
        assert_eq!(f.backend.rows("goals").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_without_remote_row_falls_back_to_upsert() {
        let f = fixture().await;
        let record = goal("g1", 10);
        assert_eq!(
            f.client.push(EntityType::Goals, &record, SyncOperation::Update).await,
            PushOutcome::Applied
        );
        assert_eq!(f.backend.calls(BackendOp::Update), 1);
        assert_eq!(f.backend.calls(BackendOp::Upsert), 1);
        assert!(f.backend.row("goals", "g1").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_is_scoped_to_account() {
        let f = fixture().await;
        let foreign = RowMapper::new(EntityType::Goals).to_remote(&goal("g9", 1), AccountKey(7), 0);
        f.backend.insert_row("goals", foreign);

        assert_eq!(
            f.client.push(EntityType::Goals, &goal("g9", 1), SyncOperation::Delete).await,
            PushOutcome::Applied
        );
        assert!(f.backend.row("goals", "g9").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_schema_error_is_not_retried() {
        let f = fixture().await;
        f.backend.fail_next(
            BackendOp::Upsert,
            RemoteError::schema("column goals.dailyGoal does not exist"),
        );
        let outcome = f.client.push(EntityType::Goals, &goal("g1", 1), SyncOperation::Create).await;
        assert!(matches!(outcome, PushOutcome::Failed(ref e) if e.kind == RemoteErrorKind::Schema));
        assert_eq!(f.backend.calls(BackendOp::Upsert), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auth_error_clears_identity_and_requires_reauth() {
        let f = fixture().await;
        assert_eq!(f.client.resolve_account().await, Some(AccountKey(42)));

        f.backend.fail_next(BackendOp::Upsert, RemoteError::auth("jwt expired"));
        let outcome = f.client.push(EntityType::Goals, &goal("g1", 1), SyncOperation::Create).await;
        assert!(matches!(outcome, PushOutcome::Failed(ref e) if e.kind == RemoteErrorKind::Auth));
        assert!(f.identity.cached().is_none());
        assert!(f.auth.current().needs_reauth());

        assert_eq!(
            f.client.push(EntityType::Goals, &goal("g1", 1), SyncOperation::Create).await,
            PushOutcome::Unresolved
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_remote_pulls_empty() {
        let f = fixture().await;
        f.client.push(EntityType::Goals, &goal("g1", 1), SyncOperation::Create).await;
        f.backend.set_online(false);
        assert!(f.client.pull(EntityType::Goals, AccountKey(42), PullOptions::default()).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pull_pages_newest_first() {
        let f = fixture().await;
        for (id, created_at) in [("g1", 1), ("g2", 2), ("g3", 3)] {
            f.client.push(EntityType::Goals, &goal(id, created_at), SyncOperation::Create).await;
        }

        let first = f.client.pull(EntityType::Goals, AccountKey(42), PullOptions::default()).await;
        assert_eq!(
            first.iter().map(|r| r.id.to_string()).collect::<Vec<_>>(),
            vec!["g3", "g2"]
        );

        let all = f.client.pull_all(EntityType::Goals, AccountKey(42)).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].id.as_str(), "g1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pull_unscoped_keeps_owner() {
        let f = fixture().await;
        f.client.push(EntityType::Goals, &goal("g1", 1), SyncOperation::Create).await;
        let rows = f.client.pull_unscoped(EntityType::Goals, 500, 0).await.unwrap();
        assert_eq!(rows[0].account_key, Some(AccountKey(42)));
    }
}
