//! fastcache soak driver
//!
//! Runs concurrent writers and readers against the shared cache for a fixed
//! duration while periodically signalling memory pressure, then prints the
//! cache metrics as JSON.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Soak Driver                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Writers    │───▶│ Cache<u64,   │◀───│   Readers    │       │
//! │  │ (random TTL) │    │  Vec<u8>>    │    │              │       │
//! │  └──────────────┘    └──────▲───────┘    └──────────────┘       │
//! │                             │                                    │
//! │                    pressure / capacity ticker                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fastcache::{configure, Cache, CacheConfig, MemoryReclaimer};

/// Operations between cooperative yields in worker loops
const OPS_PER_YIELD: usize = 1_000;

// =============================================================================
// CLI Arguments
// =============================================================================

/// fastcache soak driver - exercise expiration and eviction under load
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run time in seconds
    #[arg(long, env = "SOAK_DURATION_SECONDS", default_value = "30")]
    duration_seconds: u64,

    /// Concurrent writer tasks
    #[arg(long, env = "SOAK_WRITERS", default_value = "4")]
    writers: usize,

    /// Concurrent reader tasks
    #[arg(long, env = "SOAK_READERS", default_value = "4")]
    readers: usize,

    /// Distinct keys touched by the workload
    #[arg(long, env = "SOAK_KEY_SPACE", default_value = "1000000")]
    key_space: u64,

    /// Maximum entry expiration in milliseconds (each save picks 1..=max)
    #[arg(long, env = "SOAK_MAX_TTL_MS", default_value = "5000")]
    max_ttl_ms: u64,

    /// Value payload size in bytes
    #[arg(long, env = "SOAK_VALUE_BYTES", default_value = "64")]
    value_bytes: usize,

    /// Interval between memory pressure signals in milliseconds (0 disables)
    #[arg(long, env = "SOAK_PRESSURE_INTERVAL_MS", default_value = "1000")]
    pressure_interval_ms: u64,

    /// Entry limit enforced on every pressure tick (0 disables)
    #[arg(long, env = "SOAK_MAX_ENTRIES", default_value = "0")]
    max_entries: usize,

    /// Quick-list minimum length factor (x64 slots)
    #[arg(long, env = "CACHE_QUICK_LIST_MIN_LENGTH_FACTOR", default_value = "64")]
    quick_list_min_length_factor: usize,

    /// Quick-list auto-resize percentage of the store size
    #[arg(long, env = "CACHE_QUICK_LIST_RESIZE_PERCENT", default_value = "10.0")]
    quick_list_resize_percent: f64,

    /// Quick sweep interval in milliseconds
    #[arg(long, env = "CACHE_QUICK_SWEEP_INTERVAL_MS", default_value = "15000")]
    quick_sweep_interval_ms: u64,

    /// Full sweep interval as a multiple of the quick interval
    #[arg(long, env = "CACHE_FULL_SWEEP_MULTIPLIER", default_value = "8")]
    full_sweep_multiplier: u32,

    /// Aggregated evictions before requesting a memory reclaim
    #[arg(long, env = "CACHE_RECLAIM_EVICTION_THRESHOLD", default_value = "100000")]
    reclaim_eviction_threshold: u64,

    /// Expired-key count above which full sweeps remove in parallel
    #[arg(long, env = "CACHE_PARALLEL_EVICTION_THRESHOLD", default_value = "100000")]
    parallel_eviction_threshold: usize,

    /// Range saves of at least this many items are split across threads
    #[arg(long, env = "CACHE_PARALLEL_SAVE_MIN_BATCH", default_value = "2000")]
    parallel_save_min_batch: usize,

    /// Trims of at most this many entries run on the caller's thread
    #[arg(long, env = "CACHE_INLINE_TRIM_THRESHOLD", default_value = "1000")]
    inline_trim_threshold: usize,

    /// Consecutive pressure signals before a full sweep is escalated
    #[arg(long, env = "CACHE_PRESSURE_ESCALATION_THRESHOLD", default_value = "3")]
    pressure_escalation_threshold: u32,

    /// Minimum milliseconds between pressure-triggered full sweeps
    #[arg(long, env = "CACHE_PRESSURE_COOLDOWN_MS", default_value = "5000")]
    pressure_cooldown_ms: u64,

    /// Upper bound in milliseconds of the delay before a pressure-triggered sweep
    #[arg(long, env = "CACHE_PRESSURE_STAGGER_MS", default_value = "250")]
    pressure_stagger_ms: u64,

    /// Minimum milliseconds between memory reclaim requests
    #[arg(long, env = "CACHE_RECLAIM_COOLDOWN_MS", default_value = "30000")]
    reclaim_cooldown_ms: u64,

    /// Percentage trimmed when the entry limit is exceeded
    #[arg(long, env = "CACHE_FULL_CAPACITY_TRIM_PERCENT", default_value = "10.0")]
    full_capacity_trim_percent: f64,

    /// Disable background eviction (lazy expiration only)
    #[arg(long, env = "CACHE_DISABLE_EVICTION")]
    disable_eviction: bool,

    /// Ignore memory pressure signals
    #[arg(long, env = "CACHE_IGNORE_MEMORY_PRESSURE")]
    ignore_memory_pressure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            quick_list_min_length_factor: self.quick_list_min_length_factor,
            quick_list_resize_percent: self.quick_list_resize_percent,
            quick_sweep_interval: Duration::from_millis(self.quick_sweep_interval_ms),
            full_sweep_multiplier: self.full_sweep_multiplier,
            reclaim_eviction_threshold: self.reclaim_eviction_threshold,
            parallel_eviction_threshold: self.parallel_eviction_threshold,
            parallel_save_min_batch: self.parallel_save_min_batch,
            full_capacity_trim_percent: self.full_capacity_trim_percent,
            inline_trim_threshold: self.inline_trim_threshold,
            eviction_enabled: !self.disable_eviction,
            consider_memory_pressure: !self.ignore_memory_pressure,
            pressure_escalation_threshold: self.pressure_escalation_threshold,
            pressure_cooldown: Duration::from_millis(self.pressure_cooldown_ms),
            pressure_stagger: Duration::from_millis(self.pressure_stagger_ms),
            reclaim_cooldown: Duration::from_millis(self.reclaim_cooldown_ms),
        }
    }
}

/// Logs reclaim requests; the soak run has nothing to hand memory back to
struct LoggingReclaimer;

impl MemoryReclaimer for LoggingReclaimer {
    fn reclaim(&self) {
        info!("Memory reclaim requested");
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting fastcache soak run");
    info!("  Duration: {}s", args.duration_seconds);
    info!("  Writers/readers: {}/{}", args.writers, args.readers);
    info!("  Key space: {}", args.key_space);
    info!("  Max TTL: {}ms", args.max_ttl_ms);

    if args.key_space == 0 || args.max_ttl_ms == 0 {
        anyhow::bail!("key space and max TTL must be > 0");
    }

    configure(args.cache_config()).context("invalid cache configuration")?;
    fastcache::pressure::set_reclaimer(Arc::new(LoggingReclaimer));

    let cache: Cache<u64, Vec<u8>> = Cache::shared();
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    for _ in 0..args.writers {
        let cache = cache.clone();
        let cancel = cancel.clone();
        let (key_space, max_ttl_ms, value_bytes) = (args.key_space, args.max_ttl_ms, args.value_bytes);
        tasks.push(tokio::spawn(async move {
            while !cancel.is_cancelled() {
                for _ in 0..OPS_PER_YIELD {
                    let (key, ttl) = {
                        let mut rng = rand::thread_rng();
                        (rng.gen_range(0..key_space), rng.gen_range(1..=max_ttl_ms))
                    };
                    if let Err(e) = cache.save(key, vec![0u8; value_bytes], Duration::from_millis(ttl)) {
                        error!("Save failed: {}", e);
                    }
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for _ in 0..args.readers {
        let cache = cache.clone();
        let cancel = cancel.clone();
        let key_space = args.key_space;
        tasks.push(tokio::spawn(async move {
            while !cancel.is_cancelled() {
                for _ in 0..OPS_PER_YIELD {
                    let key = rand::thread_rng().gen_range(0..key_space);
                    let _ = cache.try_get(&key);
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    if args.pressure_interval_ms > 0 {
        let cache = cache.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_millis(args.pressure_interval_ms);
        let max_entries = args.max_entries;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                fastcache::notify_high_memory_pressure();
                if max_entries > 0 {
                    if let Err(e) = cache.enforce_capacity(max_entries) {
                        error!("Capacity enforcement failed: {}", e);
                    }
                }
            }
        }));
    }

    let started = Instant::now();
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    cancel.cancel();
    for task in tasks {
        task.await.context("soak task failed")?;
    }

    let evicted = cache.execute_full_eviction().await;
    info!(
        "Soak run finished after {:.1}s, final sweep evicted {}",
        started.elapsed().as_secs_f64(),
        evicted
    );

    let snapshot = serde_json::to_string_pretty(&cache.metrics())
        .context("failed to serialize metrics")?;
    println!("{}", snapshot);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse().context("invalid log directive")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
