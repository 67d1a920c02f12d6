//! Entry Store
//!
//! Concurrent map from key to [`CacheEntry`], the source of truth for every
//! cache. Reads treat past-deadline entries as absent without removing them;
//! physical removal is left to the eviction passes.
//!
//! # Design
//!
//! - `DashMap` shards for fine-grained locking; no coarse mutex
//! - Expiry re-checks happen inside `remove_if`, so a concurrent re-save to a
//!   later deadline is never evicted by a stale observation
//! - Enumeration snapshots first and filters lazily, so no shard lock is held
//!   while the caller iterates

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

use super::entry::CacheEntry;
use crate::time::{TimeSource, Timestamp};

/// Concurrent key -> entry map
pub struct EntryStore<K, V> {
    map: DashMap<K, CacheEntry<V>>,
}

impl<K: Eq + Hash, V> Default for EntryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> EntryStore<K, V> {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Insert or overwrite. Returns true when the key was not present.
    pub fn save(&self, key: K, value: Arc<V>, expiry: Timestamp) -> bool {
        self.map
            .insert(key, CacheEntry::new(value, expiry))
            .is_none()
    }

    /// Live value for `key` at `now`
    pub fn try_get(&self, key: &K, now: Timestamp) -> Option<Arc<V>> {
        let entry = self.map.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(Arc::clone(entry.value().value()))
    }

    /// Current deadline for `key`, expired or not
    pub fn expiry_of(&self, key: &K) -> Option<Timestamp> {
        self.map.get(key).map(|entry| entry.expiry())
    }

    /// Remove unconditionally. Returns true when something was removed.
    pub fn remove(&self, key: &K) -> bool {
        self.map.remove(key).is_some()
    }

    /// Remove only if the entry currently stored is past its deadline
    pub fn remove_if_expired(&self, key: &K, now: Timestamp) -> bool {
        self.map
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
    }

    /// Number of stored entries, expired-but-not-evicted ones included
    pub fn count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    /// Remove up to `n` arbitrary entries. Returns how many were removed.
    pub fn take_any(&self, n: usize) -> usize
    where
        K: Clone,
    {
        if n == 0 {
            return 0;
        }
        let victims: Vec<K> = self
            .map
            .iter()
            .take(n)
            .map(|entry| entry.key().clone())
            .collect();
        victims.iter().filter(|key| self.remove(key)).count()
    }
}

impl<K: Eq + Hash + Clone, V> EntryStore<K, V> {
    /// Keys whose deadline has passed at `now`
    pub fn expired_keys(&self, now: Timestamp) -> Vec<K> {
        self.map
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove the given keys if still expired. Returns how many were removed.
    pub fn remove_expired(&self, keys: &[K], now: Timestamp) -> usize {
        keys.iter()
            .filter(|key| self.remove_if_expired(key, now))
            .count()
    }

    /// Up to `limit` `(key, deadline)` pairs, soonest deadlines first
    pub fn tracked_snapshot(&self, limit: usize) -> Vec<(K, Timestamp)> {
        let mut pairs: Vec<(K, Timestamp)> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().expiry()))
            .collect();
        if pairs.len() > limit {
            if limit == 0 {
                return Vec::new();
            }
            pairs.select_nth_unstable_by_key(limit - 1, |(_, expiry)| *expiry);
            pairs.truncate(limit);
        }
        pairs
    }

    /// Point-in-time view of live entries, filtered as it is consumed
    pub fn enumerate(&self, clock: Arc<dyn TimeSource>) -> Entries<K, V> {
        let snapshot: Vec<(K, CacheEntry<V>)> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        Entries {
            inner: snapshot.into_iter(),
            clock,
        }
    }
}

/// Lazy sequence of live `(key, value)` pairs.
///
/// Entries that expire between the snapshot and the moment they are pulled
/// are skipped. Mutations after the snapshot are not reflected.
pub struct Entries<K, V> {
    inner: std::vec::IntoIter<(K, CacheEntry<V>)>,
    clock: Arc<dyn TimeSource>,
}

impl<K, V> Iterator for Entries<K, V> {
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        for (key, entry) in self.inner.by_ref() {
            if !entry.is_expired(self.clock.now_millis()) {
                return Some((key, entry.into_value()));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}

// =============================================================================
// Tests
// =============================================================================
