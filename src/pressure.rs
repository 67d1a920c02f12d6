//! Memory Pressure Signals
//!
//! The host environment reports "significant memory has accumulated" through
//! [`notify_high_memory_pressure`]; every cache with pressure handling enabled
//! subscribes and runs its staggered full-sweep path. Hosts that never signal
//! simply rely on the timer-driven sweeps.
//!
//! After evictions add up across all caches, the registered
//! [`MemoryReclaimer`] (if any) is asked to return memory to the system, at
//! most once per cooldown and never re-entrantly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Buffered signals per subscriber before older ones are dropped
const SIGNAL_CAPACITY: usize = 64;

/// A high memory pressure notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureEvent {
    /// Monotonic sequence number of the signal
    pub sequence: u64,
}

/// Host hook invoked to reclaim unreachable memory.
///
/// Must not block; schedule the actual work elsewhere if it is expensive.
pub trait MemoryReclaimer: Send + Sync {
    fn reclaim(&self);
}

static SIGNAL: Lazy<broadcast::Sender<PressureEvent>> =
    Lazy::new(|| broadcast::channel(SIGNAL_CAPACITY).0);

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

static RECLAIMER: RwLock<Option<Arc<dyn MemoryReclaimer>>> = const_rwlock(None);

/// Evictions across all caches since the last reclaim request
static AGGREGATED_EVICTIONS: AtomicU64 = AtomicU64::new(0);

/// Single slot: holds the time of the last reclaim request
static LAST_RECLAIM: Mutex<Option<Instant>> = const_mutex(None);

/// Signal high memory pressure to every subscribed cache.
///
/// Returns the number of subscribers that will see it.
pub fn notify_high_memory_pressure() -> usize {
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
    let receivers = SIGNAL.send(PressureEvent { sequence }).unwrap_or(0);
    debug!(sequence, receivers, "High memory pressure signalled");
    receivers
}

/// Subscribe to pressure signals
pub fn subscribe() -> broadcast::Receiver<PressureEvent> {
    SIGNAL.subscribe()
}

/// Register the host's reclaim hook, replacing any previous one
pub fn set_reclaimer(reclaimer: Arc<dyn MemoryReclaimer>) {
    *RECLAIMER.write() = Some(reclaimer);
}

/// Remove the host's reclaim hook
pub fn clear_reclaimer() {
    *RECLAIMER.write() = None;
}

/// Add evictions to the process-wide aggregate
pub fn record_evictions(count: u64) {
    if count > 0 {
        AGGREGATED_EVICTIONS.fetch_add(count, Ordering::Relaxed);
    }
}

/// Evictions accumulated since the last reclaim request
pub fn aggregated_evictions() -> u64 {
    AGGREGATED_EVICTIONS.load(Ordering::Relaxed)
}

/// Ask the host to reclaim memory if enough evictions accumulated.
///
/// Skips when another caller is already deciding, when the cooldown has not
/// elapsed, or when no reclaimer is registered. Returns true when the hook ran.
pub fn consider_reclaim(threshold: u64, cooldown: Duration) -> bool {
    if aggregated_evictions() < threshold {
        return false;
    }
    let Some(mut last) = LAST_RECLAIM.try_lock() else {
        return false;
    };
    if last.is_some_and(|at| at.elapsed() < cooldown) {
        return false;
    }
    let Some(reclaimer) = RECLAIMER.read().clone() else {
        return false;
    };

    let evictions = AGGREGATED_EVICTIONS.swap(0, Ordering::Relaxed);
    *last = Some(Instant::now());
    info!(evictions, "Requesting memory reclaim after aggregated evictions");
    reclaimer.reclaim();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingReclaimer(AtomicUsize);

    impl MemoryReclaimer for CountingReclaimer {
        fn reclaim(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscribers_receive_signal() {
        let mut rx = subscribe();
        assert!(notify_high_memory_pressure() >= 1);
        let event = rx.try_recv().unwrap();
        assert!(event.sequence >= 1);
    }

    // Global reclaim state is shared, so the whole lifecycle lives in one test.
    #[test]
    fn test_reclaim_threshold_and_cooldown() {
        let reclaimer = Arc::new(CountingReclaimer(AtomicUsize::new(0)));
        set_reclaimer(reclaimer.clone());

        AGGREGATED_EVICTIONS.store(0, Ordering::Relaxed);
        *LAST_RECLAIM.lock() = None;

        record_evictions(5);
        assert!(!consider_reclaim(u64::MAX, Duration::ZERO));

        record_evictions(5);
        assert!(consider_reclaim(10, Duration::from_secs(60)));
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);

        // Within the cooldown the hook does not run again.
        record_evictions(20);
        assert!(!consider_reclaim(10, Duration::from_secs(60)));
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);

        clear_reclaimer();
        *LAST_RECLAIM.lock() = None;
        assert!(!consider_reclaim(10, Duration::ZERO));
    }
}
