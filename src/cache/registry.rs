//! Per-type cache registry.
//!
//! One cache per `(K, V)` pair, created on first access behind a single
//! creation lock and kept for the life of the registry.

use std::any::{type_name, Any, TypeId};
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use super::facade::Cache;
use super::manager::CacheManager;
use crate::config::{global_config, CacheConfig};
use crate::error::Result;
use crate::time::{MonotonicClock, TimeSource};

static GLOBAL: Lazy<CacheRegistry> = Lazy::new(|| {
    CacheRegistry::from_parts(global_config().clone(), Arc::new(MonotonicClock::new()))
});

/// The process-wide registry, built from the global configuration
pub fn global() -> &'static CacheRegistry {
    &GLOBAL
}

/// Caches keyed by their `(K, V)` type pair
pub struct CacheRegistry {
    caches: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    creation: Mutex<()>,
    config: CacheConfig,
    clock: Arc<dyn TimeSource>,
}

impl CacheRegistry {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    fn from_parts(config: CacheConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            caches: DashMap::new(),
            creation: Mutex::new(()),
            config,
            clock,
        }
    }

    /// The cache for `(K, V)`, created on first use
    pub fn cache<K, V>(&self) -> Cache<K, V>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let id = TypeId::of::<(K, V)>();
        if let Some(cache) = self.lookup(&id) {
            return cache;
        }

        let _creation = self.creation.lock();
        if let Some(cache) = self.lookup(&id) {
            return cache;
        }
        let label = type_name::<(K, V)>();
        let manager = CacheManager::<K, V>::new(self.config.clone(), self.clock.clone(), label);
        self.caches.insert(id, manager.clone());
        debug!(cache = label, "Registered cache");
        Cache::from_manager(manager)
    }

    fn lookup<K, V>(&self, id: &TypeId) -> Option<Cache<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let erased = self.caches.get(id)?.value().clone();
        erased
            .downcast::<CacheManager<K, V>>()
            .ok()
            .map(Cache::from_manager)
    }

    /// Number of type pairs with a cache
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> CacheRegistry {
        CacheRegistry::new(CacheConfig {
            eviction_enabled: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_one_cache_per_type_pair() {
        let registry = registry();
        let a = registry.cache::<String, u32>();
        let b = registry.cache::<String, u32>();
        a.save("k".into(), 1, Duration::from_secs(1)).unwrap();
        assert_eq!(b.try_get(&"k".to_string()).as_deref(), Some(&1));
        assert_eq!(registry.len(), 1);

        // Same key type, different value type: separate cache.
        let c = registry.cache::<String, u64>();
        assert!(c.try_get(&"k".to_string()).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_creation_yields_one_cache() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .cache::<u32, u32>()
                        .save(i, i, Duration::from_secs(5))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.cache::<u32, u32>().total_count(), 8);
    }

    #[test]
    fn test_shared_cache_is_process_wide() {
        struct Marker;
        let a = Cache::<u8, Marker>::shared();
        let b = Cache::<u8, Marker>::shared();
        a.save(1, Marker, Duration::from_secs(5)).unwrap();
        assert!(b.try_get(&1).is_some());
        assert!(global().len() >= 1);
    }
}
