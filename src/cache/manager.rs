//! Cache Manager
//!
//! Owns the per-type state of one cache: the entry store, the quick list, the
//! eviction job and metrics. Implements both sweep kinds, full clear and trim.
//!
//! # Design
//!
//! - Full sweeps are serialized by a single-slot async mutex; a caller that
//!   finds one in flight waits for it instead of running a duplicate
//! - Full sweeps and clears run on the background blocking pool while their
//!   caller holds the slot, so timer workers stay free
//! - Quick passes and inline trims use the quick list's try-lock and are
//!   skipped, never queued, when it is held
//! - Large trims move to the background runtime and take the quick list's
//!   blocking lock there

use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};

use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::quick_list::{QuickList, QuickListPass, QuickPassReport};
use super::scheduler::{EvictionJob, EvictionTarget};
use super::store::{Entries, EntryStore};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::time::{deadline_after, expiration_millis, TimeSource};
use crate::{pressure, runtime};

/// Per-type cache state
pub struct CacheManager<K, V> {
    label: String,
    config: CacheConfig,
    clock: Arc<dyn TimeSource>,
    store: EntryStore<K, V>,
    quick: QuickList<K>,
    job: EvictionJob,
    metrics: CacheMetrics,
    /// Single slot for full sweeps and clears
    full_sweep: Arc<tokio::sync::Mutex<()>>,
    this: Weak<Self>,
}

impl<K, V> CacheManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a manager and, when enabled, start its eviction timers
    pub fn new(config: CacheConfig, clock: Arc<dyn TimeSource>, label: impl Into<String>) -> Arc<Self> {
        let label = label.into();
        let manager = Arc::new_cyclic(|this: &Weak<Self>| {
            let target: Weak<dyn EvictionTarget> = this.clone();
            Self {
                job: EvictionJob::new(config.clone(), label.clone(), target),
                quick: QuickList::new(
                    config.quick_list_min_len(),
                    config.quick_list_resize_percent,
                ),
                store: EntryStore::new(),
                metrics: CacheMetrics::new(),
                full_sweep: Arc::new(tokio::sync::Mutex::new(())),
                this: this.clone(),
                label,
                config,
                clock,
            }
        });
        if manager.config.eviction_enabled {
            manager.job.resume();
        }
        manager
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    pub fn eviction_job(&self) -> &EvictionJob {
        &self.job
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Store `value` under `key` until `ttl` elapses
    pub fn save(&self, key: K, value: Arc<V>, ttl: Duration) -> Result<Arc<V>> {
        let ttl_ms = expiration_millis(ttl)?;
        let expiry = deadline_after(self.clock.now_millis(), ttl)?;
        self.save_at(key, value.clone(), expiry, ttl_ms);
        Ok(value)
    }

    /// Store with an already validated deadline
    pub(crate) fn save_at(&self, key: K, value: Arc<V>, expiry: u64, ttl_ms: u64) {
        if self.store.save(key.clone(), value, expiry) {
            self.quick.add(key, expiry);
            self.job.report_expiration(ttl_ms);
        }
        self.metrics.record_saves(1);
    }

    pub fn try_get(&self, key: &K) -> Option<Arc<V>> {
        let value = self.store.try_get(key, self.clock.now_millis());
        if value.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        value
    }

    pub fn remove(&self, key: &K) -> bool {
        let removed = self.store.remove(key);
        if removed {
            self.metrics.record_removals(1);
        }
        removed
    }

    /// Entries physically present, expired-but-not-evicted included
    pub fn count(&self) -> usize {
        self.store.count()
    }

    pub fn quick_list_len(&self) -> usize {
        self.quick.len()
    }

    pub fn enumerate(&self) -> Entries<K, V> {
        self.store.enumerate(self.clock.clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.store.count(), self.quick.len())
    }

    // =========================================================================
    // Sweeps
    // =========================================================================

    /// Remove every expired entry.
    ///
    /// Waits for an in-flight sweep and returns 0 instead of running twice.
    pub async fn execute_full_eviction(&self) -> usize {
        match self.full_sweep.clone().try_lock_owned() {
            Ok(slot) => self.run_in_slot(slot, Self::sweep_expired).await,
            Err(_) => {
                let _slot = self.full_sweep.lock().await;
                0
            }
        }
    }

    /// Start a full sweep in the background; skipped when one is in flight
    pub fn queue_full_eviction(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let queued = runtime::spawn(async move {
            this.try_full_sweep().await;
        });
        if queued.is_none() {
            futures::executor::block_on(self.try_full_sweep());
        }
    }

    /// Drop every entry and forget everything the quick list tracked
    pub async fn execute_full_clear(&self) {
        let slot = self.full_sweep.clone().lock_owned().await;
        self.run_in_slot(slot, Self::clear_all).await
    }

    /// Run `work` on the blocking pool, releasing `slot` when it returns.
    ///
    /// Runs inline when the background runtime is unavailable.
    async fn run_in_slot<R>(&self, slot: OwnedMutexGuard<()>, work: fn(&Self) -> R) -> R
    where
        R: Default + Send + 'static,
    {
        let (Some(handle), Some(this)) = (runtime::handle(), self.this.upgrade()) else {
            let _slot = slot;
            return work(self);
        };
        let joined = handle
            .spawn_blocking(move || {
                let _slot = slot;
                work(&this)
            })
            .await;
        joined.unwrap_or_else(|e| {
            error!(cache = %self.label, "Full pass failed: {}", e);
            R::default()
        })
    }

    fn clear_all(&self) {
        let pass = self.quick.begin();
        let dropped = self.store.count();
        self.store.clear();
        pass.reset();
        info!(cache = %self.label, dropped, "Cache cleared");
    }

    #[instrument(skip(self), fields(cache = %self.label))]
    fn sweep_expired(&self) -> usize {
        let start = Instant::now();
        let now = self.clock.now_millis();
        let expired = self.store.expired_keys(now);
        let removed = if expired.len() > self.config.parallel_eviction_threshold {
            self.remove_expired_parallel(&expired, now)
        } else {
            self.store.remove_expired(&expired, now)
        };

        match self.quick.try_begin() {
            Some(pass) => {
                pass.pull_from_store(&self.store);
            }
            None => debug!("Quick list busy, refill deferred to the next sweep"),
        }
        self.job.reschedule_considering_expiration();

        let elapsed = start.elapsed();
        self.metrics.record_full_sweep(removed as u64, elapsed);
        pressure::record_evictions(removed as u64);
        debug!(
            removed,
            remaining = self.store.count(),
            elapsed_us = elapsed.as_micros() as u64,
            "Full sweep complete"
        );
        removed
    }

    fn remove_expired_parallel(&self, keys: &[K], now: u64) -> usize {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let chunk = keys.len().div_ceil(workers).max(1);
        let store = &self.store;

        let removed = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = keys
                .chunks(chunk)
                .map(|batch| s.spawn(move |_| store.remove_expired(batch, now)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(0))
                .sum::<usize>()
        });
        match removed {
            Ok(removed) => removed,
            Err(_) => {
                warn!(cache = %self.label, "Parallel eviction worker panicked; remainder left for the next sweep");
                0
            }
        }
    }

    // =========================================================================
    // Trim
    // =========================================================================

    /// Force-remove `percentage` percent of the entries, expired or not.
    ///
    /// Returns `Ok(false)` when skipped because a quick pass is running.
    pub fn trim(&self, percentage: f64) -> Result<bool> {
        if percentage.is_nan() || percentage <= 0.0 || percentage > 100.0 {
            return Err(Error::InvalidArgument(format!(
                "trim percentage must be in (0, 100], got {}",
                percentage
            )));
        }
        let count = self.store.count();
        if count == 0 {
            return Ok(true);
        }
        let n = ((count as f64 * percentage / 100.0).floor() as usize).max(1);

        if n <= self.config.inline_trim_threshold {
            let Some(pass) = self.quick.try_begin() else {
                self.metrics.record_trim_skipped();
                return Ok(false);
            };
            self.trim_with(&pass, n);
            return Ok(true);
        }

        if self.quick.is_busy() {
            self.metrics.record_trim_skipped();
            return Ok(false);
        }
        let this = self.this.upgrade();
        let offloaded = this.and_then(|this| {
            runtime::spawn_blocking(move || {
                let pass = this.quick.begin();
                this.trim_with(&pass, n);
            })
        });
        if offloaded.is_none() {
            let pass = self.quick.begin();
            self.trim_with(&pass, n);
        }
        Ok(true)
    }

    /// Trim when the store holds more than `max_entries`.
    ///
    /// Returns true when a trim ran or was dispatched.
    pub fn enforce_capacity(&self, max_entries: usize) -> Result<bool> {
        let count = self.store.count();
        if count <= max_entries {
            return Ok(false);
        }
        debug!(cache = %self.label, count, max_entries, "Capacity exceeded");
        self.trim(self.config.full_capacity_trim_percent)
    }

    /// Newest tracked entries first, then arbitrary ones
    fn trim_with(&self, pass: &QuickListPass<'_, K>, n: usize) -> usize {
        let from_list = pass.trim(&self.store, n);
        let from_store = self.store.take_any(n.saturating_sub(from_list));
        let removed = from_list + from_store;
        self.metrics.record_trim(removed as u64);
        debug!(cache = %self.label, requested = n, from_list, from_store, "Trimmed");
        removed
    }
}

#[async_trait]
impl<K, V> EvictionTarget for CacheManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn quick_sweep(&self) -> Option<QuickPassReport> {
        let Some(pass) = self.quick.try_begin() else {
            self.metrics.record_quick_pass_skipped();
            return None;
        };
        let report = pass.evict(&self.store, self.clock.now_millis(), true);
        self.metrics.record_quick_pass(report.removed as u64);
        pressure::record_evictions(report.removed as u64);
        Some(report)
    }

    async fn try_full_sweep(&self) -> Option<usize> {
        let slot = self.full_sweep.clone().try_lock_owned().ok()?;
        Some(self.run_in_slot(slot, Self::sweep_expired).await)
    }

    fn job(&self) -> &EvictionJob {
        &self.job
    }

    fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use assert_matches::assert_matches;

    fn manager(config: CacheConfig) -> (Arc<CacheManager<u64, String>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let config = CacheConfig {
            eviction_enabled: false,
            ..config
        };
        (CacheManager::new(config, clock.clone(), "test"), clock)
    }

    fn fill(manager: &CacheManager<u64, String>, n: u64, ttl: Duration) {
        for key in 0..n {
            manager
                .save(key, Arc::new(format!("v{}", key)), ttl)
                .unwrap();
        }
    }

    #[test]
    fn test_save_get_remove() {
        let (manager, clock) = manager(CacheConfig::default());
        manager
            .save(1, Arc::new("one".to_string()), Duration::from_millis(50))
            .unwrap();
        assert_eq!(manager.try_get(&1).as_deref().map(String::as_str), Some("one"));

        clock.advance(Duration::from_millis(51));
        assert!(manager.try_get(&1).is_none());
        assert_eq!(manager.count(), 1);

        assert!(manager.remove(&1));
        assert!(!manager.remove(&1));
        assert_eq!(manager.snapshot().hits, 1);
        assert_eq!(manager.snapshot().misses, 1);
    }

    #[test]
    fn test_invalid_expiration_does_not_write() {
        let (manager, _) = manager(CacheConfig::default());
        let result = manager.save(1, Arc::new("x".into()), Duration::ZERO);
        assert_matches!(result, Err(Error::InvalidExpiration(_)));

        let result = manager.save(1, Arc::new("x".into()), Duration::MAX);
        assert_matches!(result, Err(Error::InvalidExpiration(_)));
        assert_eq!(manager.count(), 0);
        assert_eq!(manager.quick_list_len(), 0);
    }

    #[test]
    fn test_resave_tracks_key_once() {
        let (manager, _) = manager(CacheConfig::default());
        manager.save(7, Arc::new("a".into()), Duration::from_secs(1)).unwrap();
        manager.save(7, Arc::new("b".into()), Duration::from_secs(1)).unwrap();
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.quick_list_len(), 1);
        assert_eq!(manager.try_get(&7).as_deref().map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn test_full_eviction_removes_expired_only() {
        let (manager, clock) = manager(CacheConfig::default());
        fill(&manager, 10, Duration::from_millis(10));
        manager.save(100, Arc::new("long".into()), Duration::from_secs(60)).unwrap();

        clock.advance(Duration::from_millis(20));
        assert_eq!(manager.execute_full_eviction().await, 10);
        assert_eq!(manager.count(), 1);
        assert!(manager.try_get(&100).is_some());
        assert_eq!(manager.snapshot().full_sweeps, 1);
    }

    #[tokio::test]
    async fn test_parallel_full_eviction() {
        let (manager, clock) = manager(CacheConfig {
            parallel_eviction_threshold: 16,
            ..Default::default()
        });
        fill(&manager, 500, Duration::from_millis(10));
        clock.advance(Duration::from_millis(20));
        assert_eq!(manager.execute_full_eviction().await, 500);
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_full_eviction_in_flight_returns_zero() {
        let (manager, clock) = manager(CacheConfig::default());
        fill(&manager, 5, Duration::from_millis(10));
        clock.advance(Duration::from_millis(20));

        let slot = manager.full_sweep.lock().await;
        let waiting = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.execute_full_eviction().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.try_full_sweep().await.is_none());
        drop(slot);

        assert_eq!(waiting.await.unwrap(), 0);
        assert_eq!(manager.count(), 5);
    }

    #[tokio::test]
    async fn test_full_clear() {
        let (manager, _) = manager(CacheConfig::default());
        fill(&manager, 100, Duration::from_secs(60));
        manager.execute_full_clear().await;
        assert_eq!(manager.count(), 0);
        assert_eq!(manager.quick_list_len(), 0);
        assert!(manager.try_get(&1).is_none());
    }

    #[tokio::test]
    async fn test_full_clear_waits_for_in_flight_sweep() {
        let (manager, _) = manager(CacheConfig::default());
        fill(&manager, 20, Duration::from_secs(60));

        let slot = manager.full_sweep.lock().await;
        let clearing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.execute_full_clear().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!clearing.is_finished());
        assert_eq!(manager.count(), 20);

        drop(slot);
        clearing.await.unwrap();
        assert_eq!(manager.count(), 0);
        assert_eq!(manager.quick_list_len(), 0);
    }

    /// Records which thread reads the clock
    #[derive(Default)]
    struct ThreadRecordingClock {
        readers: parking_lot::Mutex<Vec<Option<String>>>,
    }

    impl TimeSource for ThreadRecordingClock {
        fn now_millis(&self) -> u64 {
            let name = std::thread::current().name().map(str::to_owned);
            self.readers.lock().push(name);
            0
        }
    }

    #[tokio::test]
    async fn test_full_sweep_runs_on_background_pool() {
        let clock = Arc::new(ThreadRecordingClock::default());
        let config = CacheConfig {
            eviction_enabled: false,
            ..Default::default()
        };
        let manager: Arc<CacheManager<u64, u64>> =
            CacheManager::new(config, clock.clone(), "pooled");
        manager.save(1, Arc::new(1), Duration::from_secs(60)).unwrap();
        clock.readers.lock().clear();

        assert_eq!(manager.execute_full_eviction().await, 0);
        let readers = clock.readers.lock();
        assert_eq!(
            readers.last().cloned().flatten().as_deref(),
            Some(runtime::BACKGROUND_THREAD_NAME)
        );
    }

    #[test]
    fn test_queue_full_eviction() {
        let (manager, clock) = manager(CacheConfig::default());
        fill(&manager, 10, Duration::from_millis(10));
        manager.save(100, Arc::new("long".into()), Duration::from_secs(60)).unwrap();
        clock.advance(Duration::from_millis(20));

        manager.queue_full_eviction();
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.count() > 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.count(), 1);
        assert!(manager.try_get(&100).is_some());
        assert_eq!(manager.snapshot().full_sweeps, 1);
    }

    #[test]
    fn test_quick_sweep_removes_expired() {
        let (manager, clock) = manager(CacheConfig::default());
        fill(&manager, 10, Duration::from_millis(10));
        clock.advance(Duration::from_millis(20));

        let report = manager.quick_sweep().unwrap();
        assert_eq!(report.removed, 10);
        assert!(report.contained);
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_quick_sweep_skipped_while_busy() {
        let (manager, _) = manager(CacheConfig::default());
        fill(&manager, 10, Duration::from_secs(60));
        let _pass = manager.quick.begin();
        assert!(manager.quick_sweep().is_none());
        assert_matches!(manager.trim(50.0), Ok(false));
        assert_eq!(manager.count(), 10);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.quick_passes_skipped, 1);
        assert_eq!(snapshot.trims_skipped, 1);
    }

    #[test]
    fn test_trim_rejects_invalid_percentages() {
        let (manager, _) = manager(CacheConfig::default());
        for p in [0.0, -1.0, f64::NAN, 100.00001] {
            assert_matches!(manager.trim(p), Err(Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_trim_inline() {
        let (manager, _) = manager(CacheConfig::default());
        assert_matches!(manager.trim(10.0), Ok(true));

        fill(&manager, 100, Duration::from_secs(60));
        assert_matches!(manager.trim(10.0), Ok(true));
        assert_eq!(manager.count(), 90);

        // Always at least one entry.
        assert_matches!(manager.trim(0.1), Ok(true));
        assert_eq!(manager.count(), 89);

        assert_matches!(manager.trim(100.0), Ok(true));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_trim_offloaded() {
        let (manager, _) = manager(CacheConfig {
            inline_trim_threshold: 10,
            ..Default::default()
        });
        fill(&manager, 200, Duration::from_secs(60));
        assert_matches!(manager.trim(50.0), Ok(true));

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.count() > 100 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.count(), 100);
    }

    #[test]
    fn test_trim_offloaded_skipped_while_busy() {
        let (manager, _) = manager(CacheConfig {
            inline_trim_threshold: 10,
            ..Default::default()
        });
        fill(&manager, 200, Duration::from_secs(60));

        let pass = manager.quick.begin();
        assert_matches!(manager.trim(50.0), Ok(false));
        drop(pass);

        assert_eq!(manager.count(), 200);
        assert_eq!(manager.snapshot().trims_skipped, 1);
    }

    #[test]
    fn test_enforce_capacity() {
        let (manager, _) = manager(CacheConfig {
            full_capacity_trim_percent: 20.0,
            ..Default::default()
        });
        fill(&manager, 50, Duration::from_secs(60));
        assert_matches!(manager.enforce_capacity(50), Ok(false));
        assert_matches!(manager.enforce_capacity(49), Ok(true));
        assert_eq!(manager.count(), 40);
    }

    #[test]
    fn test_enumerate_skips_expired() {
        let (manager, clock) = manager(CacheConfig::default());
        manager.save(1, Arc::new("short".into()), Duration::from_millis(5)).unwrap();
        manager.save(2, Arc::new("long".into()), Duration::from_secs(5)).unwrap();
        clock.advance(Duration::from_millis(10));

        let keys: Vec<u64> = manager.enumerate().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![2]);
    }

    #[test]
    fn test_timers_start_when_enabled() {
        let clock = Arc::new(ManualClock::new());
        let manager: Arc<CacheManager<u64, u64>> =
            CacheManager::new(CacheConfig::default(), clock, "enabled");
        assert!(manager.eviction_job().is_active());
        manager.eviction_job().suspend();
        assert!(!manager.eviction_job().is_active());
    }
}
