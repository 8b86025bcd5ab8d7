//! Remote backend contract.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::models::AccountKey;

/// One row as exchanged with the remote, keyed by snake_case column names.
pub type RemoteRow = Map<String, Value>;

/// Result alias for backend calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Filtered fetch against one table, always ordered by `created_at` descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteQuery {
    /// Scope to one account; `None` only for admin reads.
    pub account_key: Option<AccountKey>,
    pub limit: u32,
    pub offset: u32,
}

impl RemoteQuery {
    pub const fn scoped(account_key: AccountKey, limit: u32, offset: u32) -> Self {
        Self {
            account_key: Some(account_key),
            limit,
            offset,
        }
    }

    pub const fn unscoped(limit: u32, offset: u32) -> Self {
        Self {
            account_key: None,
            limit,
            offset,
        }
    }
}

/// Table-per-entity CRUD plus the identity endpoint.
///
/// Inserts are upserts keyed by `id`. `update` and `delete` must only touch
/// rows whose `id` and `user_id` both match.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn upsert(&self, table: &str, row: RemoteRow) -> RemoteResult<()>;

    /// Returns the number of rows changed.
    async fn update(
        &self,
        table: &str,
        id: &str,
        account_key: AccountKey,
        row: RemoteRow,
    ) -> RemoteResult<u64>;

    /// Returns the number of rows removed.
    async fn delete(&self, table: &str, id: &str, account_key: AccountKey) -> RemoteResult<u64>;

    async fn select(&self, table: &str, query: RemoteQuery) -> RemoteResult<Vec<RemoteRow>>;

    /// Look up the account key for an external (session) identity.
    async fn find_account(&self, external_id: &str) -> RemoteResult<Option<AccountKey>>;

    /// Create the account row. Fails with a conflict if it already exists.
    async fn create_account(&self, external_id: &str) -> RemoteResult<AccountKey>;

    /// Bearer token for subsequent calls; `None` falls back to the API key.
    fn set_access_token(&self, _access_token: Option<String>) {}
}
