//! In-Process TTL Cache
//!
//! Generic key/value cache with per-entry expiration and adaptive background
//! eviction.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                     Cache<K, V>  (cloneable handle)                       │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                        CacheManager<K, V>                                 │
//! │  ┌────────────────┐   ┌────────────────────┐   ┌──────────────────────┐  │
//! │  │ EntryStore     │◀──│ QuickList          │   │ EvictionJob          │  │
//! │  │ (DashMap)      │   │ (double-buffered   │◀──│ quick timer          │  │
//! │  │ source of truth│   │  recent inserts)   │   │ full timer + jitter  │  │
//! │  └────────────────┘   └────────────────────┘   │ pressure listener    │  │
//! │          ▲                                     └──────────────────────┘  │
//! │          └──────────── full sweep / trim / clear ────────────┘           │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Lazy expiration: an entry past its deadline reads as absent whether or
//!   not it has been evicted yet
//! - The quick list is best-effort; the full sweep is authoritative
//! - Background work never blocks callers: passes that find their lock held
//!   are skipped, not queued
//! - One cache per `(K, V)` pair through [`CacheRegistry`], or independent
//!   caches through [`Cache::new`]

mod entry;
mod facade;
mod manager;
mod metrics;
mod quick_list;
mod registry;
mod scheduler;
mod store;

#[cfg(test)]
mod proptest;

pub use entry::CacheEntry;
pub use facade::Cache;
pub use manager::CacheManager;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use quick_list::{QuickList, QuickListPass, QuickPassReport};
pub use registry::{global as global_registry, CacheRegistry};
pub use scheduler::{EvictionJob, EvictionTarget};
pub use store::{Entries, EntryStore};
