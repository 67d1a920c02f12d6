//! Property-Based Tests for the Cache
//!
//! # Test Properties
//!
//! 1. **Identity**: a saved value is returned as the same allocation
//! 2. **Lazy Expiration**: reads honour the deadline without any sweep
//! 3. **Replacement**: re-saving a key leaves a single entry, last value wins
//! 4. **Trim Bounds**: a valid trim removes between 1 and ceil(count * p / 100)
//! 5. **Trim Arguments**: percentages outside (0, 100] are rejected

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::Cache;
use crate::config::CacheConfig;
use crate::error::Error;
use crate::time::ManualClock;

// =============================================================================
// Property Strategies
// =============================================================================

fn ttl_strategy() -> impl Strategy<Value = u64> {
    1u64..=100_000
}

fn valid_percentage_strategy() -> impl Strategy<Value = f64> {
    (1u32..=100_000).prop_map(|milli| milli as f64 / 1_000.0)
}

fn invalid_percentage_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        Just(f64::NAN),
        Just(100.00001),
        -1_000.0f64..=0.0,
        100.001f64..1e9,
    ]
}

fn test_cache() -> (Cache<u64, String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_at(1_000_000));
    let config = CacheConfig {
        eviction_enabled: false,
        inline_trim_threshold: usize::MAX,
        ..Default::default()
    };
    match Cache::with_clock(config, clock.clone()) {
        Ok(cache) => (cache, clock),
        Err(e) => panic!("default test config rejected: {}", e),
    }
}

// =============================================================================
// Read/Write Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a value is readable right after saving, as the same allocation.
    #[test]
    fn prop_save_then_get_identity(key in any::<u64>(), value in ".{0,32}", ttl in ttl_strategy()) {
        let (cache, _) = test_cache();
        let saved = cache.save(key, value.clone(), Duration::from_millis(ttl))?;
        let read = cache.try_get(&key);
        prop_assert!(read.is_some());
        let read = read.unwrap();
        prop_assert!(Arc::ptr_eq(&saved, &read));
        prop_assert_eq!(read.as_str(), value.as_str());
    }

    /// Property: hit strictly before the deadline, miss strictly after it.
    #[test]
    fn prop_lazy_expiration(key in any::<u64>(), ttl in ttl_strategy(), before in 0u64..100_000) {
        let (cache, clock) = test_cache();
        cache.save(key, "v".into(), Duration::from_millis(ttl))?;

        clock.advance(Duration::from_millis(before.min(ttl - 1)));
        prop_assert!(cache.try_get(&key).is_some());

        clock.advance(Duration::from_millis(ttl + 1));
        prop_assert!(cache.try_get(&key).is_none());
    }

    /// Property: re-saving replaces the value without duplicating the entry.
    #[test]
    fn prop_resave_replaces(key in any::<u64>(), first in ".{0,16}", second in ".{0,16}") {
        let (cache, _) = test_cache();
        cache.save(key, first, Duration::from_secs(10))?;
        cache.save(key, second.clone(), Duration::from_secs(10))?;
        prop_assert_eq!(cache.total_count(), 1);
        let read = cache.try_get(&key);
        prop_assert_eq!(read.as_deref(), Some(&second));
    }
}

// =============================================================================
// Trim Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: a valid trim removes at least one and at most ceil(count * p / 100).
    #[test]
    fn prop_trim_bounds(count in 1usize..500, percentage in valid_percentage_strategy()) {
        let (cache, _) = test_cache();
        let pairs = (0..count as u64).map(|k| (k, k.to_string()));
        cache.save_range(pairs, Duration::from_secs(60))?;

        prop_assert!(cache.trim(percentage)?);
        let removed = count - cache.total_count();
        let ceiling = (count as f64 * percentage / 100.0).ceil() as usize;
        prop_assert!(removed >= 1);
        prop_assert!(removed <= ceiling.max(1), "removed {} > ceiling {}", removed, ceiling);
    }

    /// Property: percentages outside (0, 100] fail without touching the store.
    #[test]
    fn prop_trim_rejects_invalid(percentage in invalid_percentage_strategy()) {
        let (cache, _) = test_cache();
        cache.save(1, "v".into(), Duration::from_secs(60))?;
        let result = cache.trim(percentage);
        prop_assert!(matches!(result, Err(Error::InvalidArgument(_))));
        prop_assert_eq!(cache.total_count(), 1);
    }
}
