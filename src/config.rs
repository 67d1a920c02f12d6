//! Cache Configuration
//!
//! A static configuration object supplied once at startup. Every cache created
//! through the process-wide registry shares it; explicitly constructed caches
//! may carry their own copy.

use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Slots per unit of `quick_list_min_length_factor`
pub const QUICK_LIST_BLOCK: usize = 64;

/// Upper bound for the quick-list auto-resize percentage
pub const MAX_QUICK_LIST_RESIZE_PERCENT: f64 = 25.0;

/// Upper bound for the quick sweep interval, including adaptive rescheduling
pub const MAX_QUICK_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default quick sweep interval
pub const DEFAULT_QUICK_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Minimum quick-list length, in blocks of [`QUICK_LIST_BLOCK`] slots
    pub quick_list_min_length_factor: usize,
    /// Quick-list auto-resize target as a percentage of the store size
    pub quick_list_resize_percent: f64,
    /// Interval between quick-list sweeps
    pub quick_sweep_interval: Duration,
    /// Full sweep interval = quick interval x multiplier
    pub full_sweep_multiplier: u32,
    /// Aggregated evictions (all caches) before asking the host to reclaim memory
    pub reclaim_eviction_threshold: u64,
    /// Expired-key count above which a full sweep removes in parallel
    pub parallel_eviction_threshold: usize,
    /// Batch size from which range saves are split across threads
    pub parallel_save_min_batch: usize,
    /// Percentage trimmed when a caller-supplied capacity is exceeded
    pub full_capacity_trim_percent: f64,
    /// Trims of at most this many entries run on the caller's thread
    pub inline_trim_threshold: usize,
    /// Start eviction timers for new caches
    pub eviction_enabled: bool,
    /// React to memory pressure signals
    pub consider_memory_pressure: bool,
    /// Consecutive pressure signals before a full sweep is escalated
    pub pressure_escalation_threshold: u32,
    /// Minimum time between pressure-triggered full sweeps
    pub pressure_cooldown: Duration,
    /// Upper bound of the random delay before a pressure-triggered full sweep
    pub pressure_stagger: Duration,
    /// Minimum time between reclaim requests
    pub reclaim_cooldown: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quick_list_min_length_factor: 64,
            quick_list_resize_percent: 10.0,
            quick_sweep_interval: DEFAULT_QUICK_SWEEP_INTERVAL,
            full_sweep_multiplier: 8,
            reclaim_eviction_threshold: 100_000,
            parallel_eviction_threshold: 100_000,
            parallel_save_min_batch: 2_000,
            full_capacity_trim_percent: 10.0,
            inline_trim_threshold: 1_000,
            eviction_enabled: true,
            consider_memory_pressure: true,
            pressure_escalation_threshold: 3,
            pressure_cooldown: Duration::from_secs(5),
            pressure_stagger: Duration::from_millis(250),
            reclaim_cooldown: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.quick_list_min_length_factor == 0 {
            return Err(Error::Config(
                "quick_list_min_length_factor must be > 0".into(),
            ));
        }
        let pct = self.quick_list_resize_percent;
        if pct.is_nan() || pct <= 0.0 || pct > MAX_QUICK_LIST_RESIZE_PERCENT {
            return Err(Error::Config(format!(
                "quick_list_resize_percent must be in (0, {}]",
                MAX_QUICK_LIST_RESIZE_PERCENT
            )));
        }
        if self.quick_sweep_interval.is_zero() {
            return Err(Error::Config("quick_sweep_interval must be > 0".into()));
        }
        if self.full_sweep_multiplier == 0 {
            return Err(Error::Config("full_sweep_multiplier must be >= 1".into()));
        }
        if self.reclaim_eviction_threshold == 0 {
            return Err(Error::Config(
                "reclaim_eviction_threshold must be > 0".into(),
            ));
        }
        if self.parallel_eviction_threshold == 0 || self.parallel_save_min_batch == 0 {
            return Err(Error::Config("parallel thresholds must be > 0".into()));
        }
        let trim = self.full_capacity_trim_percent;
        if trim.is_nan() || trim <= 0.0 || trim > 100.0 {
            return Err(Error::Config(
                "full_capacity_trim_percent must be in (0, 100]".into(),
            ));
        }
        if self.pressure_escalation_threshold == 0 {
            return Err(Error::Config(
                "pressure_escalation_threshold must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Minimum quick-list length in slots
    pub fn quick_list_min_len(&self) -> usize {
        self.quick_list_min_length_factor
            .saturating_mul(QUICK_LIST_BLOCK)
    }

    /// Quick sweep interval after applying the upper cap
    pub fn effective_quick_interval(&self) -> Duration {
        self.quick_sweep_interval.min(MAX_QUICK_SWEEP_INTERVAL)
    }

    /// Full sweep interval derived from the quick interval
    pub fn full_sweep_interval(&self) -> Duration {
        self.effective_quick_interval()
            .saturating_mul(self.full_sweep_multiplier)
    }
}

// =============================================================================
// Process-wide configuration
// =============================================================================

static GLOBAL_CONFIG: OnceCell<CacheConfig> = OnceCell::new();

/// Install the process-wide configuration.
///
/// Must run before the first shared cache is touched; afterwards the
/// configuration is frozen and a second call fails.
pub fn configure(config: CacheConfig) -> Result<()> {
    config.validate()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| Error::Config("global configuration already initialized".into()))
}

/// The process-wide configuration (defaults when never configured)
pub fn global_config() -> &'static CacheConfig {
    GLOBAL_CONFIG.get_or_init(CacheConfig::default)
}
