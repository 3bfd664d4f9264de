//! Association and nonce stores
//!
//! Both stores are shared by every concurrent login attempt and are passed
//! explicitly to the components that need them. Each operation is atomic per
//! key; nothing requires cross-key transactions.
//!
//! Keys are unique per (endpoint, handle) for associations and per
//! (context, nonce, timestamp) for nonces.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use openid_auth::{Association, Result};
use tracing::debug;

/// Boxed future returned by store operations (keeps the traits dyn-compatible).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Associations keyed by provider endpoint (or the private secret sentinel).
pub trait AssociationStore: Send + Sync {
    /// Insert, replacing any association with the same handle.
    fn store<'a>(&'a self, endpoint: &'a str, association: Association) -> StoreFuture<'a, ()>;

    fn get_by_handle<'a>(
        &'a self,
        endpoint: &'a str,
        handle: &'a str,
    ) -> StoreFuture<'a, Option<Association>>;

    /// Every association held for `endpoint`, newest first.
    fn get_all<'a>(&'a self, endpoint: &'a str) -> StoreFuture<'a, Vec<Association>>;

    /// Returns whether an association was removed.
    fn remove<'a>(&'a self, endpoint: &'a str, handle: &'a str) -> StoreFuture<'a, bool>;

    /// Drop expired associations, returning how many were removed.
    fn clear_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize>;

    fn len(&self) -> StoreFuture<'_, usize>;
}

/// Records used nonces to reject replays.
pub trait NonceStore: Send + Sync {
    /// Record a nonce. `Ok(false)` means it was already recorded (a replay).
    fn store_nonce<'a>(
        &'a self,
        context: &'a str,
        nonce: &'a str,
        timestamp: DateTime<Utc>,
    ) -> StoreFuture<'a, bool>;

    /// Forget nonces older than the store's maximum age.
    fn clear_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize>;

    fn len(&self) -> StoreFuture<'_, usize>;
}

/// In-memory association store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryAssociationStore {
    entries: DashMap<String, Vec<Association>>,
}

impl MemoryAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssociationStore for MemoryAssociationStore {
    fn store<'a>(&'a self, endpoint: &'a str, association: Association) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut list = self.entries.entry(endpoint.to_string()).or_default();
            list.retain(|a| a.handle() != association.handle());
            debug!(endpoint, handle = association.handle(), "stored association");
            list.push(association);
            Ok(())
        })
    }

    fn get_by_handle<'a>(
        &'a self,
        endpoint: &'a str,
        handle: &'a str,
    ) -> StoreFuture<'a, Option<Association>> {
        Box::pin(async move {
            Ok(self
                .entries
                .get(endpoint)
                .and_then(|list| list.iter().find(|a| a.handle() == handle).cloned()))
        })
    }

    fn get_all<'a>(&'a self, endpoint: &'a str) -> StoreFuture<'a, Vec<Association>> {
        Box::pin(async move {
            let mut all = self
                .entries
                .get(endpoint)
                .map(|list| list.clone())
                .unwrap_or_default();
            all.sort_by(|a, b| b.issued().cmp(&a.issued()));
            Ok(all)
        })
    }

    fn remove<'a>(&'a self, endpoint: &'a str, handle: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let Some(mut list) = self.entries.get_mut(endpoint) else {
                return Ok(false);
            };
            let before = list.len();
            list.retain(|a| a.handle() != handle);
            let removed = list.len() != before;
            if removed {
                debug!(endpoint, handle, "removed association");
            }
            Ok(removed)
        })
    }

    fn clear_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut removed = 0;
            self.entries.retain(|_, list| {
                let before = list.len();
                list.retain(|a| !a.is_expired(now));
                removed += before - list.len();
                !list.is_empty()
            });
            Ok(removed)
        })
    }

    fn len(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.entries.iter().map(|e| e.value().len()).sum()) })
    }
}

/// In-memory nonce store. Entries older than `max_age` are pruned by
/// `clear_expired`; the verifier rejects nonces that old before they reach
/// the store, so pruning never reopens a replay window.
pub struct MemoryNonceStore {
    entries: DashMap<(String, String, i64), ()>,
    max_age: Duration,
}

impl MemoryNonceStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_age,
        }
    }
}

impl NonceStore for MemoryNonceStore {
    fn store_nonce<'a>(
        &'a self,
        context: &'a str,
        nonce: &'a str,
        timestamp: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let key = (context.to_string(), nonce.to_string(), timestamp.timestamp());
            match self.entries.entry(key) {
                Entry::Occupied(_) => {
                    debug!(context, nonce, "nonce already used");
                    Ok(false)
                }
                Entry::Vacant(slot) => {
                    slot.insert(());
                    Ok(true)
                }
            }
        })
    }

    fn clear_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let cutoff = (now - self.max_age).timestamp();
            let before = self.entries.len();
            self.entries.retain(|(_, _, stamp), _| *stamp >= cutoff);
            Ok(before - self.entries.len())
        })
    }

    fn len(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.entries.len()) })
    }
}
