//! Short-lived read cache in front of local listings.
//!
//! Entries expire after a fixed TTL and are dropped eagerly whenever the
//! local store writes to their entity type. The cache is never the system of
//! record; clearing it is always safe.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::db::OrderBy;
use crate::events::Subscription;
use crate::models::{EntityType, RecordId};
use crate::store::LocalStore;

/// Default time-to-live for cache entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache key, namespaced by entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity: EntityType,
    pub scope: String,
}

impl CacheKey {
    pub fn list(entity: EntityType, order: OrderBy) -> Self {
        Self {
            entity,
            scope: format!("list:{}", order.as_str()),
        }
    }

    pub fn record(entity: EntityType, id: &RecordId) -> Self {
        Self {
            entity,
            scope: format!("record:{id}"),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.scope)
    }
}

/// A cached value
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub data: T,
    pub stored_at: Instant,
    pub valid: bool,
}

impl<T> CacheEntry<T> {
    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        self.valid && now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// Counters reported by the cache-status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    pub entries: usize,
    pub live_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl: Duration,
}

struct CacheState<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
    hits: u64,
    misses: u64,
}

/// TTL cache with explicit invalidation.
pub struct ResultCache<T> {
    ttl: Duration,
    state: Arc<Mutex<CacheState<T>>>,
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            })),
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`. Expired entries are evicted on access.
    pub fn get(&self, key: &CacheKey) -> Option<T> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let live = state
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now, self.ttl))
            .map(|entry| entry.data.clone());

        if let Some(data) = live {
            state.hits += 1;
            Some(data)
        } else {
            state.entries.remove(key);
            state.misses += 1;
            None
        }
    }

    pub fn set(&self, key: CacheKey, data: T) {
        let entry = CacheEntry {
            key: key.clone(),
            data,
            stored_at: Instant::now(),
            valid: true,
        };
        self.state.lock().entries.insert(key, entry);
    }

    /// Whether `key` holds a live value. Does not count as a hit or miss.
    pub fn has(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now, self.ttl))
    }

    pub fn invalidate(&self, key: &CacheKey) {
        if let Some(entry) = self.state.lock().entries.get_mut(key) {
            entry.valid = false;
        }
    }

    /// Invalidate every entry belonging to `entity`.
    pub fn invalidate_entity(&self, entity: EntityType) {
        let mut state = self.state.lock();
        for entry in state.entries.values_mut() {
            if entry.key.entity == entity {
                entry.valid = false;
            }
        }
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn status(&self) -> CacheStatus {
        let now = Instant::now();
        let state = self.state.lock();
        CacheStatus {
            entries: state.entries.len(),
            live_entries: state
                .entries
                .values()
                .filter(|entry| entry.is_live(now, self.ttl))
                .count(),
            hits: state.hits,
            misses: state.misses,
            ttl: self.ttl,
        }
    }

    /// Invalidate entries whenever `store` writes to their entity type.
    pub fn attach(&self, store: &LocalStore) -> Subscription {
        let cache = self.clone();
        store.subscribe(move |change| {
            tracing::debug!(entity = %change.entity, kind = ?change.kind, "Invalidating cached results");
            cache.invalidate_entity(change.entity);
        })
    }
}

impl<T: Clone + Send + 'static> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
