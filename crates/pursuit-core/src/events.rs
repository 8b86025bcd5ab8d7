//! Typed synchronous subscriptions.
//!
//! Handlers are called on the emitting task with a snapshot of the handler
//! list, so a handler may subscribe or unsubscribe while an event is being
//! delivered. The lock is never held while a handler runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Handler<T> = dyn Fn(&T) + Send + Sync;

struct Inner<T> {
    handlers: Mutex<Vec<(u64, Arc<Handler<T>>)>>,
    next_id: AtomicU64,
}

/// A list of handlers for events of type `T`.
pub struct Subscribers<T> {
    inner: Arc<Inner<T>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.lock().push((id, Arc::new(handler)));

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handlers.lock().retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Arc<Handler<T>>> = {
            let guard = self.inner.handlers.lock();
            guard.iter().map(|(_, handler)| Arc::clone(handler)).collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Handle returned by `subscribe`; dropping it removes the handler.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
