//! In-process backend with the same contract as the REST backend.
//!
//! Supports an offline switch, scripted failures, artificial latency and
//! per-call counters, which makes it the stand-in remote for tests and demos.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::backend::{RemoteBackend, RemoteQuery, RemoteResult, RemoteRow};
use crate::error::RemoteError;
use crate::models::AccountKey;

/// Backend operations, for counters and scripted failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Upsert,
    Update,
    Delete,
    Select,
    FindAccount,
    CreateAccount,
}

#[derive(Default)]
struct MemoryState {
    online: bool,
    latency: Duration,
    tables: HashMap<String, BTreeMap<String, RemoteRow>>,
    accounts: HashMap<String, AccountKey>,
    next_account_key: i64,
    failures: HashMap<BackendOp, VecDeque<RemoteError>>,
    calls: HashMap<BackendOp, u64>,
    /// Key another device claims between our lookup and our create
    create_race: Option<AccountKey>,
    access_token: Option<String>,
}

/// In-memory remote backend
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                online: true,
                next_account_key: 1,
                ..MemoryState::default()
            }),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Fail the next call of `op` with `error`. Queued failures apply in order.
    pub fn fail_next(&self, op: BackendOp, error: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn fail_times(&self, op: BackendOp, times: usize, error: &RemoteError) {
        for _ in 0..times {
            self.fail_next(op, error.clone());
        }
    }

    pub fn seed_account(&self, external_id: &str, key: AccountKey) {
        let mut state = self.state.lock();
        state.accounts.insert(external_id.to_string(), key);
        state.next_account_key = state.next_account_key.max(key.get() + 1);
    }

    /// Make the next create observe a concurrent create that won with `key`.
    pub fn race_next_create(&self, key: AccountKey) {
        self.state.lock().create_race = Some(key);
    }

    pub fn insert_row(&self, table: &str, row: RemoteRow) {
        let Some(id) = row_id(&row) else {
            return;
        };
        self.state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<RemoteRow> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
    }

    pub fn calls(&self, op: BackendOp) -> u64 {
        self.state.lock().calls.get(&op).copied().unwrap_or_default()
    }

    pub fn total_calls(&self) -> u64 {
        self.state.lock().calls.values().sum()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.lock().access_token.clone()
    }

    /// Count the call, then apply latency, the offline switch and any scripted failure.
    async fn enter(&self, op: BackendOp) -> RemoteResult<()> {
        let latency = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.online {
            return Err(RemoteError::transient("connection refused"));
        }
        if let Some(error) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(row: &RemoteRow) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn owner(row: &RemoteRow) -> Option<i64> {
    row.get("user_id").and_then(Value::as_i64)
}

fn created_at(row: &RemoteRow) -> i64 {
    row.get("created_at").and_then(Value::as_i64).unwrap_or_default()
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn upsert(&self, table: &str, row: RemoteRow) -> RemoteResult<()> {
        self.enter(BackendOp::Upsert).await?;
        let id = row_id(&row).ok_or_else(|| RemoteError::schema(format!("{table}: upsert without id")))?;

        let mut state = self.state.lock();
        let rows = state.tables.entry(table.to_string()).or_default();
        match rows.get_mut(&id) {
            Some(existing) if owner(existing) != owner(&row) => Err(RemoteError::permission(format!(
                "{table}.{id} belongs to another account"
            ))),
            Some(existing) => {
                existing.extend(row);
                Ok(())
            }
            None => {
                rows.insert(id, row);
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        account_key: AccountKey,
        row: RemoteRow,
    ) -> RemoteResult<u64> {
        self.enter(BackendOp::Update).await?;
        let mut state = self.state.lock();
        match state.tables.get_mut(table).and_then(|rows| rows.get_mut(id)) {
            Some(existing) if owner(existing) == Some(account_key.get()) => {
                existing.extend(row);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete(&self, table: &str, id: &str, account_key: AccountKey) -> RemoteResult<u64> {
        self.enter(BackendOp::Delete).await?;
        let mut state = self.state.lock();
        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        if rows.get(id).is_some_and(|row| owner(row) == Some(account_key.get())) {
            rows.remove(id);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn select(&self, table: &str, query: RemoteQuery) -> RemoteResult<Vec<RemoteRow>> {
        self.enter(BackendOp::Select).await?;
        let state = self.state.lock();
        let mut rows: Vec<RemoteRow> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| {
                        query
                            .account_key
                            .is_none_or(|key| owner(row) == Some(key.get()))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            created_at(b)
                .cmp(&created_at(a))
                .then_with(|| row_id(b).cmp(&row_id(a)))
        });
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn find_account(&self, external_id: &str) -> RemoteResult<Option<AccountKey>> {
        self.enter(BackendOp::FindAccount).await?;
        Ok(self.state.lock().accounts.get(external_id).copied())
    }

    async fn create_account(&self, external_id: &str) -> RemoteResult<AccountKey> {
        self.enter(BackendOp::CreateAccount).await?;
        let mut state = self.state.lock();
        if let Some(winner) = state.create_race.take() {
            state.accounts.insert(external_id.to_string(), winner);
        }
        if state.accounts.contains_key(external_id) {
            return Err(RemoteError::conflict(format!(
                "duplicate key value violates unique constraint \"accounts_external_id_key\" ({external_id})"
            )));
        }

        let key = AccountKey(state.next_account_key);
        state.next_account_key += 1;
        state.accounts.insert(external_id.to_string(), key);
        Ok(key)
    }

    fn set_access_token(&self, access_token: Option<String>) {
        self.state.lock().access_token = access_token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, user: i64, created_at: i64) -> RemoteRow {
        json!({"id": id, "user_id": user, "created_at": created_at})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_select_is_scoped_and_ordered() {
        let backend = MemoryBackend::new();
        backend.upsert("goals", row("a", 1, 10)).await.unwrap();
        backend.upsert("goals", row("b", 1, 20)).await.unwrap();
        backend.upsert("goals", row("c", 2, 30)).await.unwrap();

        let mine = backend
            .select("goals", RemoteQuery::scoped(AccountKey(1), 10, 0))
            .await
            .unwrap();
        let ids: Vec<_> = mine.iter().filter_map(row_id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let all = backend
            .select("goals", RemoteQuery::unscoped(2, 1))
            .await
            .unwrap();
        assert_eq!(all.iter().filter_map(row_id).collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_mutations_are_scoped_to_owner() {
        let backend = MemoryBackend::new();
        backend.upsert("goals", row("a", 1, 10)).await.unwrap();

        assert_eq!(
            backend
                .update("goals", "a", AccountKey(2), row("a", 2, 10))
                .await
                .unwrap(),
            0
        );
        assert_eq!(backend.delete("goals", "a", AccountKey(2)).await.unwrap(), 0);
        assert!(backend.upsert("goals", row("a", 2, 10)).await.is_err());
        assert_eq!(backend.delete("goals", "a", AccountKey(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_and_scripted_failures() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        assert!(backend.find_account("s1").await.unwrap_err().is_retryable());

        backend.set_online(true);
        backend.fail_next(BackendOp::FindAccount, RemoteError::auth("expired"));
        assert!(!backend.find_account("s1").await.unwrap_err().is_retryable());
        assert_eq!(backend.find_account("s1").await.unwrap(), None);
        assert_eq!(backend.calls(BackendOp::FindAccount), 3);
    }

    #[tokio::test]
    async fn test_create_account_race() {
        let backend = MemoryBackend::new();
        backend.race_next_create(AccountKey(42));
        let error = backend.create_account("s1").await.unwrap_err();
        assert_eq!(error.kind, crate::error::RemoteErrorKind::Conflict);
        assert_eq!(backend.find_account("s1").await.unwrap(), Some(AccountKey(42)));
    }
}
