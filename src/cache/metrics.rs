//! Cache Metrics Collection
//!
//! Relaxed atomic counters for monitoring eviction health per cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Per-cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Access
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
    removals: AtomicU64,

    // Quick list
    quick_passes: AtomicU64,
    quick_passes_skipped: AtomicU64,
    quick_evictions: AtomicU64,

    // Full sweeps
    full_sweeps: AtomicU64,
    full_evictions: AtomicU64,
    full_sweep_latency_us: AtomicU64,

    // Trim
    trims: AtomicU64,
    trims_skipped: AtomicU64,
    trimmed: AtomicU64,

    // Memory pressure
    pressure_signals: AtomicU64,
    pressure_escalations: AtomicU64,
}

/// Weight of a new sample in [`ema_update`]
const EMA_ALPHA: f64 = 0.1;

/// Fold `sample` into the moving average held in `target`.
///
/// The first sample seeds the average.
pub(crate) fn ema_update(target: &AtomicU64, sample: u64) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(if current == 0 {
            sample
        } else {
            ((1.0 - EMA_ALPHA) * current as f64 + EMA_ALPHA * sample as f64) as u64
        })
    });
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saves(&self, n: u64) {
        self.saves.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_removals(&self, n: u64) {
        self.removals.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_quick_pass(&self, evicted: u64) {
        self.quick_passes.fetch_add(1, Ordering::Relaxed);
        self.quick_evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    pub fn record_quick_pass_skipped(&self) {
        self.quick_passes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_sweep(&self, evicted: u64, elapsed: Duration) {
        self.full_sweeps.fetch_add(1, Ordering::Relaxed);
        self.full_evictions.fetch_add(evicted, Ordering::Relaxed);
        ema_update(&self.full_sweep_latency_us, elapsed.as_micros() as u64);
    }

    pub fn record_trim(&self, trimmed: u64) {
        self.trims.fetch_add(1, Ordering::Relaxed);
        self.trimmed.fetch_add(trimmed, Ordering::Relaxed);
    }

    pub fn record_trim_skipped(&self) {
        self.trims_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pressure_signal(&self) {
        self.pressure_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pressure_escalation(&self) {
        self.pressure_escalations.fetch_add(1, Ordering::Relaxed);
    }


    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Entries removed by quick passes and full sweeps
    pub fn total_evictions(&self) -> u64 {
        self.quick_evictions.load(Ordering::Relaxed) + self.full_evictions.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self, entries: usize, quick_list_len: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            entries,
            quick_list_len,
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            saves: self.saves.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            quick_passes: self.quick_passes.load(Ordering::Relaxed),
            quick_passes_skipped: self.quick_passes_skipped.load(Ordering::Relaxed),
            quick_evictions: self.quick_evictions.load(Ordering::Relaxed),
            full_sweeps: self.full_sweeps.load(Ordering::Relaxed),
            full_evictions: self.full_evictions.load(Ordering::Relaxed),
            full_sweep_latency_us: self.full_sweep_latency_us.load(Ordering::Relaxed),
            trims: self.trims.load(Ordering::Relaxed),
            trims_skipped: self.trims_skipped.load(Ordering::Relaxed),
            trimmed: self.trimmed.load(Ordering::Relaxed),
            pressure_signals: self.pressure_signals.load(Ordering::Relaxed),
            pressure_escalations: self.pressure_escalations.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Stored entries, expired-but-not-evicted included
    pub entries: usize,
    /// Entries currently tracked by the quick list
    pub quick_list_len: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub saves: u64,
    pub removals: u64,
    pub quick_passes: u64,
    pub quick_passes_skipped: u64,
    pub quick_evictions: u64,
    pub full_sweeps: u64,
    pub full_evictions: u64,
    /// Smoothed full sweep duration (microseconds)
    pub full_sweep_latency_us: u64,
    pub trims: u64,
    pub trims_skipped: u64,
    pub trimmed: u64,
    pub pressure_signals: u64,
    pub pressure_escalations: u64,
}
