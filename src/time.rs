//! Monotonic millisecond clock
//!
//! Expiry deadlines are absolute millisecond timestamps on a monotonic clock
//! owned by each cache. Wall-clock adjustments never shorten or extend an
//! entry's lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Milliseconds since the clock's origin
pub type Timestamp = u64;

/// Source of "now" for expiry decisions
pub trait TimeSource: Send + Sync + 'static {
    /// Current time in milliseconds since the clock's origin
    fn now_millis(&self) -> Timestamp;
}

/// `Instant`-backed clock
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    #[inline]
    fn now_millis(&self) -> Timestamp {
        self.origin.elapsed().as_millis() as Timestamp
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at an arbitrary timestamp
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    #[inline]
    fn now_millis(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert an expiration duration to whole milliseconds.
///
/// Sub-millisecond durations round up so a positive duration never becomes zero.
pub fn expiration_millis(ttl: Duration) -> Result<u64> {
    if ttl.is_zero() {
        return Err(Error::InvalidExpiration(
            "expiration must be greater than zero".into(),
        ));
    }
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis)
        .map_err(|_| Error::InvalidExpiration(format!("expiration {:?} is too large", ttl)))
}

/// Absolute deadline `now + ttl`
pub fn deadline_after(now: Timestamp, ttl: Duration) -> Result<Timestamp> {
    let millis = expiration_millis(ttl)?;
    now.checked_add(millis).ok_or_else(|| {
        Error::InvalidExpiration(format!("expiration {:?} overflows the clock", ttl))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_deadline_after() {
        assert_eq!(deadline_after(1_000, Duration::from_millis(50)).unwrap(), 1_050);
        assert_eq!(deadline_after(0, Duration::from_micros(1)).unwrap(), 1);
        assert_eq!(deadline_after(0, Duration::from_micros(1_500)).unwrap(), 2);
    }

    #[test]
    fn test_zero_expiration_rejected() {
        assert_matches!(
            deadline_after(10, Duration::ZERO),
            Err(Error::InvalidExpiration(_))
        );
    }

    #[test]
    fn test_overflow_rejected() {
        assert_matches!(
            deadline_after(10, Duration::MAX),
            Err(Error::InvalidExpiration(_))
        );
        assert_matches!(
            deadline_after(u64::MAX - 5, Duration::from_millis(10)),
            Err(Error::InvalidExpiration(_))
        );
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::starting_at(100);
        assert_eq!(clock.now_millis(), 100);
        clock.advance(Duration::from_millis(25));
        assert_eq!(clock.now_millis(), 125);
        clock.set(7);
        assert_eq!(clock.now_millis(), 7);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let first = clock.now_millis();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now_millis() >= first + 5);
    }
}
