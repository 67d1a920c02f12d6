//! Public Access Facade
//!
//! [`Cache`] is a cheap, cloneable handle over one [`CacheManager`]. Reads
//! apply lazy expiration, so correctness never depends on a sweep having run;
//! the background job only reclaims memory.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::manager::CacheManager;
use super::metrics::MetricsSnapshot;
use super::registry;
use super::scheduler::EvictionTarget;
use super::store::Entries;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::runtime;
use crate::time::{deadline_after, expiration_millis, MonotonicClock, TimeSource};

/// Typed TTL cache handle
pub struct Cache<K, V> {
    inner: Arc<CacheManager<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("label", &self.inner.label())
            .field("entries", &self.inner.count())
            .field("eviction_active", &self.inner.eviction_job().is_active())
            .finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create an independent cache on the monotonic clock
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create an independent cache reading time from `clock`
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        config.validate()?;
        let label = std::any::type_name::<(K, V)>();
        Ok(Self::from_manager(CacheManager::new(config, clock, label)))
    }

    /// The process-wide cache for this `(K, V)` pair
    pub fn shared() -> Self {
        registry::global().cache::<K, V>()
    }

    pub(crate) fn from_manager(inner: Arc<CacheManager<K, V>>) -> Self {
        Self { inner }
    }

    // =========================================================================
    // Single entries
    // =========================================================================

    /// Store `value` for `ttl`, replacing any previous value under `key`
    pub fn save(&self, key: K, value: V, ttl: Duration) -> Result<Arc<V>> {
        self.inner.save(key, Arc::new(value), ttl)
    }

    /// Store an already shared value
    pub fn save_shared(&self, key: K, value: Arc<V>, ttl: Duration) -> Result<Arc<V>> {
        self.inner.save(key, value, ttl)
    }

    /// The live value under `key`; expired entries read as absent
    pub fn try_get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.try_get(key)
    }

    /// Return the live value or compute, store and return a new one.
    ///
    /// `compute` runs at most once per call. Concurrent callers missing the
    /// same key may each compute; the last save wins.
    pub fn get_or_compute<F>(&self, key: K, compute: F, ttl: Duration) -> Result<Arc<V>>
    where
        F: FnOnce() -> V,
    {
        expiration_millis(ttl)?;
        if let Some(value) = self.inner.try_get(&key) {
            return Ok(value);
        }
        self.inner.save(key, Arc::new(compute()), ttl)
    }

    /// Async variant of [`get_or_compute`](Self::get_or_compute)
    pub async fn get_or_compute_async<F, Fut>(
        &self,
        key: K,
        compute: F,
        ttl: Duration,
    ) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        expiration_millis(ttl)?;
        if let Some(value) = self.inner.try_get(&key) {
            return Ok(value);
        }
        let value = compute().await;
        self.inner.save(key, Arc::new(value), ttl)
    }

    pub fn remove(&self, key: &K) -> bool {
        self.inner.remove(key)
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Remove every key given. Returns how many were present.
    pub fn remove_range<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        keys.into_iter().filter(|key| self.inner.remove(key)).count()
    }

    /// Store every pair with the same `ttl`. Returns the number saved.
    ///
    /// All pairs share one deadline. Batches of at least
    /// `parallel_save_min_batch` pairs are split across threads.
    pub fn save_range<I>(&self, pairs: I, ttl: Duration) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let ttl_ms = expiration_millis(ttl)?;
        let expiry = deadline_after(self.inner.clock().now_millis(), ttl)?;
        let pairs: Vec<(K, V)> = pairs.into_iter().collect();
        let total = pairs.len();

        if total < self.inner.config().parallel_save_min_batch {
            for (key, value) in pairs {
                self.inner.save_at(key, Arc::new(value), expiry, ttl_ms);
            }
            return Ok(total);
        }

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let chunk = total.div_ceil(workers).max(1);
        let mut pairs = pairs.into_iter();
        let batches: Vec<Vec<(K, V)>> = std::iter::from_fn(|| {
            let batch: Vec<(K, V)> = pairs.by_ref().take(chunk).collect();
            (!batch.is_empty()).then_some(batch)
        })
        .collect();

        let manager = &self.inner;
        crossbeam::thread::scope(|s| {
            for batch in batches {
                s.spawn(move |_| {
                    for (key, value) in batch {
                        manager.save_at(key, Arc::new(value), expiry, ttl_ms);
                    }
                });
            }
        })
        .map_err(|_| Error::Internal("parallel save worker panicked".into()))?;
        Ok(total)
    }

    /// Store `keys[i] -> values[i]` with the same `ttl`.
    ///
    /// Fails with [`Error::LengthMismatch`] before anything is written.
    pub fn save_range_zip(&self, keys: Vec<K>, values: Vec<V>, ttl: Duration) -> Result<usize> {
        if keys.len() != values.len() {
            return Err(Error::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        self.save_range(keys.into_iter().zip(values), ttl)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Entries physically present, including expired ones not yet evicted
    pub fn total_count(&self) -> usize {
        self.inner.count()
    }

    /// Force-remove `percentage` percent of the entries.
    ///
    /// `Ok(false)` means skipped because an eviction pass was running.
    pub fn trim(&self, percentage: f64) -> Result<bool> {
        self.inner.trim(percentage)
    }

    /// Trim when more than `max_entries` are stored
    pub fn enforce_capacity(&self, max_entries: usize) -> Result<bool> {
        self.inner.enforce_capacity(max_entries)
    }

    pub fn suspend_eviction(&self) {
        self.inner.eviction_job().suspend();
    }

    pub fn resume_eviction(&self) {
        self.inner.eviction_job().resume();
    }

    pub fn is_eviction_active(&self) -> bool {
        self.inner.eviction_job().is_active()
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub async fn execute_full_eviction(&self) -> usize {
        self.inner.execute_full_eviction().await
    }

    pub fn execute_full_eviction_blocking(&self) -> usize {
        futures::executor::block_on(self.inner.execute_full_eviction())
    }

    /// Start a full sweep in the background
    pub fn queue_full_eviction(&self) {
        self.inner.queue_full_eviction();
    }

    /// Remove every entry
    pub async fn execute_full_clear(&self) {
        self.inner.execute_full_clear().await;
    }

    pub fn execute_full_clear_blocking(&self) {
        futures::executor::block_on(self.inner.execute_full_clear());
    }

    /// Live entries at the time of the call, filtered lazily while iterating
    pub fn enumerate_entries(&self) -> Entries<K, V> {
        self.inner.enumerate()
    }

    /// Run this cache's memory pressure path in the background
    pub fn notify_memory_pressure(&self) {
        let manager = self.inner.clone();
        let spawned = runtime::spawn(async move {
            manager.job().on_memory_pressure(&*manager).await;
        });
        if spawned.is_none() {
            warn!(cache = %self.inner.label(), "Background runtime unavailable, pressure signal dropped");
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================
