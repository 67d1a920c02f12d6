//! fastcache - In-Process TTL Cache
//!
//! A generic, thread-safe key/value cache where every entry carries its own
//! expiration. Expired entries read as absent immediately; a per-cache
//! background job reclaims them.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ Cache<K, V> ──▶ EntryStore (source of truth)
//!                │
//!                └──▶ QuickList ◀── quick sweep ◀─┐
//!                                                 ├── EvictionJob (background runtime)
//!                     full sweep ◀────────────────┤
//!                                                 └── memory pressure signals
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use fastcache::{Cache, CacheConfig};
//!
//! let cache: Cache<String, u64> = Cache::new(CacheConfig::default())?;
//! cache.save("answer".into(), 42, Duration::from_secs(30))?;
//! assert_eq!(cache.try_get(&"answer".to_string()).as_deref(), Some(&42));
//! # Ok::<(), fastcache::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Store, quick list, scheduler, manager, facade and registry
//! - [`config`] - Configuration and process-wide settings
//! - [`error`] - Error types
//! - [`pressure`] - Memory pressure signals and the reclaim hook
//! - [`runtime`] - Background runtime for timers and offloaded work
//! - [`time`] - Monotonic time sources

pub mod cache;
pub mod config;
pub mod error;
pub mod pressure;
pub mod runtime;
pub mod time;

// Re-export commonly used types
pub use cache::{global_registry, Cache, CacheRegistry, MetricsSnapshot};
pub use config::{configure, global_config, CacheConfig};
pub use error::{Error, Result};
pub use pressure::{notify_high_memory_pressure, MemoryReclaimer};
pub use time::{ManualClock, MonotonicClock, TimeSource, Timestamp};
