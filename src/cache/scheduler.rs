//! Eviction Scheduler
//!
//! Per-cache background job driving two cadences on the background runtime:
//!
//! ```text
//!   quick timer ──(every quick interval)──────────▶ quick-list pass
//!   full timer  ──(quick x multiplier + jitter)───▶ full sweep, unless the last
//!                                                   quick pass contained the store
//!   pressure    ──(consecutive signals, cooldown)─▶ staggered full sweep
//! ```
//!
//! Intervals adapt after every full sweep to the rolling average of the
//! expirations callers report, staying between the configured default and
//! [`MAX_QUICK_SWEEP_INTERVAL`]. Timer loops read the current interval on every
//! iteration, so rescheduling never restarts them.
//!
//! # States
//!
//! Active ⇄ Suspended. Suspending cancels the timers; a pass already running
//! finishes normally. Resuming recomputes the intervals and restarts them.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::metrics::{self, CacheMetrics};
use super::quick_list::QuickPassReport;
use crate::config::{CacheConfig, MAX_QUICK_SWEEP_INTERVAL};
use crate::{pressure, runtime};

/// Cap on the low-yield multiplier applied to the escalation threshold
const MAX_LOW_YIELD: u32 = 4;

/// Full sweep jitter as a fraction of the full interval
const FULL_SWEEP_JITTER: f64 = 0.25;

/// What the scheduler drives.
///
/// Implemented by the cache manager; the scheduler only holds a `Weak`
/// reference so dropping a cache ends its timers.
#[async_trait]
pub trait EvictionTarget: Send + Sync + 'static {
    /// One quick-list pass, `None` when skipped because a pass is running
    fn quick_sweep(&self) -> Option<QuickPassReport>;

    /// One full sweep, `None` when skipped because a sweep is in flight
    async fn try_full_sweep(&self) -> Option<usize>;

    fn job(&self) -> &EvictionJob;

    fn metrics(&self) -> &CacheMetrics;
}

/// Scheduling state for one cache
pub struct EvictionJob {
    config: CacheConfig,
    label: String,
    target: Weak<dyn EvictionTarget>,
    /// Cancels every background loop of the current activation
    timers: Mutex<Option<CancellationToken>>,
    active: AtomicBool,
    quick_interval_ms: AtomicU64,
    full_interval_ms: AtomicU64,
    /// Rolling average of reported expirations (ms, EMA)
    avg_expiration_ms: AtomicU64,
    /// Last quick pass tracked the whole store
    contained: AtomicBool,
    /// Consecutive pressure signals not yet escalated
    pressure_signals: AtomicU32,
    /// Consecutive escalated sweeps that removed nothing
    low_yield: AtomicU32,
    last_pressure_sweep: Mutex<Option<Instant>>,
}

impl EvictionJob {
    /// Create a suspended job for `target`
    pub fn new(config: CacheConfig, label: impl Into<String>, target: Weak<dyn EvictionTarget>) -> Self {
        let quick = config.effective_quick_interval();
        let full = config.full_sweep_interval();
        Self {
            config,
            label: label.into(),
            target,
            timers: Mutex::new(None),
            active: AtomicBool::new(false),
            quick_interval_ms: AtomicU64::new(quick.as_millis() as u64),
            full_interval_ms: AtomicU64::new(full.as_millis() as u64),
            avg_expiration_ms: AtomicU64::new(0),
            contained: AtomicBool::new(false),
            pressure_signals: AtomicU32::new(0),
            low_yield: AtomicU32::new(0),
            last_pressure_sweep: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn quick_interval(&self) -> Duration {
        Duration::from_millis(self.quick_interval_ms.load(Ordering::Relaxed))
    }

    pub fn full_interval(&self) -> Duration {
        Duration::from_millis(self.full_interval_ms.load(Ordering::Relaxed))
    }

    /// Rolling average of reported expirations
    pub fn average_expiration(&self) -> Duration {
        Duration::from_millis(self.avg_expiration_ms.load(Ordering::Relaxed))
    }

    /// Feed one expiration duration into the rolling average
    pub fn report_expiration(&self, ttl_ms: u64) {
        metrics::ema_update(&self.avg_expiration_ms, ttl_ms);
    }

    /// Recompute both intervals from the default and the average expiration
    pub fn reschedule_considering_expiration(&self) {
        let default = self.config.effective_quick_interval().as_millis() as u64;
        let max = MAX_QUICK_SWEEP_INTERVAL.as_millis() as u64;
        let avg = self.avg_expiration_ms.load(Ordering::Relaxed);
        let quick = if avg == 0 {
            default
        } else {
            (default.saturating_add(avg) / 2).clamp(default, max)
        };
        let full = quick.saturating_mul(self.config.full_sweep_multiplier as u64);

        let previous = self.quick_interval_ms.swap(quick, Ordering::Relaxed);
        self.full_interval_ms.store(full, Ordering::Relaxed);
        if previous != quick {
            debug!(
                cache = %self.label,
                quick_ms = quick,
                full_ms = full,
                avg_expiration_ms = avg,
                "Rescheduled eviction"
            );
        }
    }

    /// Start the timers (idempotent)
    pub fn resume(&self) {
        let mut timers = self.timers.lock();
        if timers.is_some() {
            return;
        }
        self.reschedule_considering_expiration();

        let cancel = CancellationToken::new();
        let spawned = runtime::spawn(quick_loop(self.target.clone(), cancel.child_token()))
            .and_then(|_| runtime::spawn(full_loop(self.target.clone(), cancel.child_token())))
            .is_some();
        if !spawned {
            cancel.cancel();
            warn!(cache = %self.label, "Background runtime unavailable, eviction stays suspended");
            return;
        }
        if self.config.consider_memory_pressure {
            runtime::spawn(pressure_loop(self.target.clone(), cancel.child_token()));
        }

        *timers = Some(cancel);
        self.active.store(true, Ordering::Release);
        info!(
            cache = %self.label,
            quick_ms = self.quick_interval_ms.load(Ordering::Relaxed),
            "Eviction active"
        );
    }

    /// Stop the timers (idempotent). A pass already running completes.
    pub fn suspend(&self) {
        let mut timers = self.timers.lock();
        self.active.store(false, Ordering::Release);
        if let Some(cancel) = timers.take() {
            cancel.cancel();
            info!(cache = %self.label, "Eviction suspended");
        }
    }

    fn run_quick_tick(&self, target: &dyn EvictionTarget) {
        match target.quick_sweep() {
            Some(report) => {
                self.contained.store(report.contained, Ordering::Relaxed);
                debug!(
                    cache = %self.label,
                    removed = report.removed,
                    tracked = report.tracked,
                    contained = report.contained,
                    "Quick sweep"
                );
            }
            None => debug!(cache = %self.label, "Quick sweep skipped, pass in progress"),
        }
    }

    async fn run_full_tick(&self, target: &dyn EvictionTarget) {
        if self.contained.load(Ordering::Relaxed) {
            debug!(cache = %self.label, "Full sweep skipped, quick list contains the store");
            return;
        }
        if target.try_full_sweep().await.is_none() {
            debug!(cache = %self.label, "Full sweep skipped, sweep in flight");
        }
    }

    /// Staggered reaction to a memory pressure signal.
    ///
    /// Retries the quick path first; escalates to a full sweep only after
    /// enough consecutive signals and once the cooldown has elapsed.
    pub async fn on_memory_pressure(&self, target: &dyn EvictionTarget) {
        if !self.config.consider_memory_pressure || !self.is_active() {
            return;
        }
        target.metrics().record_pressure_signal();
        let signals = self.pressure_signals.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(report) = target.quick_sweep() {
            self.contained.store(report.contained, Ordering::Relaxed);
            if report.contained {
                // The quick list keeps up on its own.
                self.pressure_signals.store(0, Ordering::Release);
                return;
            }
        }

        let low_yield = self.low_yield.load(Ordering::Relaxed).min(MAX_LOW_YIELD);
        let required = self
            .config
            .pressure_escalation_threshold
            .saturating_mul(1 + low_yield);
        if signals < required {
            return;
        }
        if let Some(at) = *self.last_pressure_sweep.lock() {
            if at.elapsed() < self.config.pressure_cooldown {
                return;
            }
        }
        self.pressure_signals.store(0, Ordering::Release);

        let stagger_ms = self.config.pressure_stagger.as_millis() as u64;
        if stagger_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=stagger_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        target.metrics().record_pressure_escalation();
        info!(cache = %self.label, signals, "Memory pressure escalated to full sweep");
        if let Some(removed) = target.try_full_sweep().await {
            if removed == 0 {
                self.low_yield.fetch_add(1, Ordering::Relaxed);
            } else {
                self.low_yield.store(0, Ordering::Relaxed);
            }
            *self.last_pressure_sweep.lock() = Some(Instant::now());
        }

        pressure::consider_reclaim(
            self.config.reclaim_eviction_threshold,
            self.config.reclaim_cooldown,
        );
    }

    fn full_wait(&self) -> Duration {
        let full_ms = self.full_interval_ms.load(Ordering::Relaxed);
        let jitter_max = (full_ms as f64 * FULL_SWEEP_JITTER) as u64;
        let jitter = if jitter_max == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_max)
        };
        Duration::from_millis(full_ms.saturating_add(jitter))
    }
}

impl Drop for EvictionJob {
    fn drop(&mut self) {
        if let Some(cancel) = self.timers.get_mut().take() {
            cancel.cancel();
        }
    }
}

// =============================================================================
// Background loops
// =============================================================================

async fn quick_loop(target: Weak<dyn EvictionTarget>, cancel: CancellationToken) {
    loop {
        let Some(interval) = target.upgrade().map(|t| t.job().quick_interval()) else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(target) = target.upgrade() else {
            break;
        };
        let tick = std::panic::catch_unwind(AssertUnwindSafe(|| {
            target.job().run_quick_tick(&*target);
        }));
        if tick.is_err() {
            error!(cache = %target.job().label(), "Quick sweep panicked; retrying next tick");
        }
    }
}

async fn full_loop(target: Weak<dyn EvictionTarget>, cancel: CancellationToken) {
    loop {
        let Some(wait) = target.upgrade().map(|t| t.job().full_wait()) else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        let Some(target) = target.upgrade() else {
            break;
        };
        let tick = AssertUnwindSafe(target.job().run_full_tick(&*target))
            .catch_unwind()
            .await;
        if tick.is_err() {
            error!(cache = %target.job().label(), "Full sweep panicked; retrying next tick");
        }
    }
}

async fn pressure_loop(target: Weak<dyn EvictionTarget>, cancel: CancellationToken) {
    let mut signals = pressure::subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = signals.recv() => event,
        };
        match event {
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
        let Some(target) = target.upgrade() else {
            break;
        };
        let handled = AssertUnwindSafe(target.job().on_memory_pressure(&*target))
            .catch_unwind()
            .await;
        if handled.is_err() {
            error!(cache = %target.job().label(), "Pressure-triggered sweep panicked");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
