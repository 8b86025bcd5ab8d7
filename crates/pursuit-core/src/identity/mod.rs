//! Session identity to account key resolution.
//!
//! At most one identity is cached, in memory and in the `account_identity`
//! table. A lookup for a different session replaces it; sign-out and auth
//! errors clear it.

use std::sync::Arc;

use crate::db::{IdentityRepository, LibSqlIdentityRepository};
use crate::error::{RemoteError, RemoteErrorKind};
use crate::events::{Subscribers, Subscription};
use crate::models::{AccountIdentity, AccountKey};
use crate::remote::{Connectivity, RemoteBackend, RetryPolicy};
use crate::store::LocalStore;
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Raised whenever the cached identity is replaced or cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityChange {
    pub previous: Option<AccountKey>,
    pub current: Option<AccountKey>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: LocalStore,
    backend: Arc<dyn RemoteBackend>,
    policy: RetryPolicy,
    connectivity: Connectivity,
    cached: Arc<parking_lot::Mutex<Option<AccountIdentity>>>,
    resolving: Arc<tokio::sync::Mutex<()>>,
    changes: Subscribers<IdentityChange>,
}

impl IdentityResolver {
    pub fn new(
        store: LocalStore,
        backend: Arc<dyn RemoteBackend>,
        policy: RetryPolicy,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            backend,
            policy,
            connectivity,
            cached: Arc::new(parking_lot::Mutex::new(None)),
            resolving: Arc::new(tokio::sync::Mutex::new(())),
            changes: Subscribers::new(),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&IdentityChange) + Send + Sync + 'static) -> Subscription {
        self.changes.subscribe(handler)
    }

    /// Identity currently held in memory.
    pub fn cached(&self) -> Option<AccountIdentity> {
        self.cached.lock().clone()
    }

    /// Resolve the account key for `session_id`.
    ///
    /// `Ok(None)` means sync is unavailable (offline); it is not an error.
    /// Remote failures are returned as `Error::Remote` after retries.
    pub async fn resolve(&self, session_id: &str) -> Result<Option<AccountKey>> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(Error::InvalidInput("Session id cannot be empty".to_string()));
        }
        if let Some(key) = self.memory_hit(session_id) {
            return Ok(Some(key));
        }

        // One resolution at a time, so concurrent callers never both create.
        let _guard = self.resolving.lock().await;
        if let Some(key) = self.memory_hit(session_id) {
            return Ok(Some(key));
        }

        let durable = self.load_durable().await;
        if let Some(identity) = durable.as_ref().filter(|identity| identity.session_id == session_id) {
            tracing::debug!(account_key = %identity.account_key, "Identity restored from local cache");
            *self.cached.lock() = Some(identity.clone());
            return Ok(Some(identity.account_key));
        }

        if !self.connectivity.is_online() {
            tracing::debug!("Offline; account identity unresolved");
            return Ok(None);
        }

        let key = self.fetch_or_create(session_id).await?;
        let previous = durable.map(|identity| identity.account_key);
        self.remember(AccountIdentity {
            session_id: session_id.to_string(),
            account_key: key,
            resolved_at: unix_millis_now(),
        })
        .await;

        if previous != Some(key) {
            self.changes.emit(&IdentityChange {
                previous,
                current: Some(key),
            });
        }
        Ok(Some(key))
    }

    /// Forget the cached identity (sign-out, auth error).
    pub async fn invalidate(&self) -> Result<()> {
        let previous = self.cached.lock().take().map(|identity| identity.account_key);
        let durable = {
            let db = self.store.database().lock().await;
            let repo = LibSqlIdentityRepository::new(db.connection());
            let durable = repo.load().await.ok().flatten();
            repo.clear().await.map_err(|error| self.store.note_error(error))?;
            durable
        };

        let previous = previous.or(durable.map(|identity| identity.account_key));
        tracing::info!("Cleared cached account identity");
        if previous.is_some() {
            self.changes.emit(&IdentityChange {
                previous,
                current: None,
            });
        }
        Ok(())
    }

    fn memory_hit(&self, session_id: &str) -> Option<AccountKey> {
        self.cached
            .lock()
            .as_ref()
            .filter(|identity| identity.session_id == session_id)
            .map(|identity| identity.account_key)
    }

    async fn load_durable(&self) -> Option<AccountIdentity> {
        let db = self.store.database().lock().await;
        match LibSqlIdentityRepository::new(db.connection()).load().await {
            Ok(identity) => identity,
            Err(error) => {
                tracing::warn!("Failed to read cached identity: {error}");
                None
            }
        }
    }

    async fn remember(&self, identity: AccountIdentity) {
        *self.cached.lock() = Some(identity.clone());
        let db = self.store.database().lock().await;
        if let Err(error) = LibSqlIdentityRepository::new(db.connection())
            .save(&identity)
            .await
        {
            let error = self.store.note_error(error);
            tracing::warn!("Failed to persist account identity: {error}");
        }
    }

    async fn fetch_or_create(&self, session_id: &str) -> Result<AccountKey> {
        let backend = &self.backend;
        if let Some(key) = self
            .policy
            .run("find_account", move || backend.find_account(session_id))
            .await?
        {
            return Ok(key);
        }

        match self
            .policy
            .run("create_account", move || backend.create_account(session_id))
            .await
        {
            Ok(key) => {
                tracing::info!(account_key = %key, "Created remote account");
                Ok(key)
            }
            Err(error) if error.kind == RemoteErrorKind::Conflict => {
                tracing::debug!("Account created concurrently, using the winning row: {error}");
                self.policy
                    .run("find_account", move || backend.find_account(session_id))
                    .await?
                    .ok_or_else(|| {
                        RemoteError::schema("accounts: conflict on create but no row found").into()
                    })
            }
            Err(error) => Err(error.into()),
        }
    }
}
