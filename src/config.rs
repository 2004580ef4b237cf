/// Cache and memory-management configuration
///
/// TTLs and budgets tuned for fund query data:
/// - Fund lists: refreshed by the data layer roughly every quarter hour
/// - Memory budgets: heuristic, the estimator constants below are calibration
///   knobs rather than measurements

use std::time::Duration;

/// Configuration for the cache store itself.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Default time-to-live applied by `get` when the caller does not pass one
    pub default_ttl: Duration,

    /// Item budget used to bound the access log (pruned beyond 2x this value)
    pub max_items: usize,
}

impl StoreConfig {
    /// Custom configuration
    pub fn custom(ttl_secs: u64, max_items: usize) -> Self {
        Self {
            default_ttl: Duration::from_secs(ttl_secs),
            max_items,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(15 * 60), // 15 minutes
            max_items: 500,
        }
    }
}

/// Configuration for the memory manager.
///
/// `per_item_overhead_bytes` and `baseline_overhead_bytes` feed the usage
/// estimator: the host runtime exposes no heap introspection to this layer,
/// so usage is estimated from payload bytes plus calibrated overheads.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Hard usage budget reported in status output (MB)
    pub max_usage_mb: f64,

    /// Estimated usage above this triggers a forced collection (MB)
    pub warning_threshold_mb: f64,

    /// Maximum number of cached entries before eviction kicks in
    pub max_cache_items: usize,

    /// Extra entries evicted beyond the overflow when over the item budget
    pub eviction_margin: usize,

    /// Interval between monitor ticks
    pub monitor_interval: Duration,

    /// Age past which entries are reclaimed by the periodic sweep
    pub entry_ttl: Duration,

    /// Estimator: bookkeeping overhead attributed to each cached entry
    pub per_item_overhead_bytes: usize,

    /// Estimator: fixed overhead of the cache subsystem itself
    pub baseline_overhead_bytes: usize,

    /// Number of usage snapshots retained for leak detection
    pub snapshot_history: usize,
}

impl MemoryConfig {
    /// Small-footprint preset for hosts with tight memory budgets
    pub fn constrained() -> Self {
        Self {
            max_usage_mb: 50.0,
            warning_threshold_mb: 40.0,
            max_cache_items: 200,
            ..Self::default()
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_usage_mb: 100.0,
            warning_threshold_mb: 80.0,
            max_cache_items: 500,
            eviction_margin: 5,
            monitor_interval: Duration::from_secs(120), // 2 minutes
            entry_ttl: Duration::from_secs(15 * 60),
            per_item_overhead_bytes: 512,
            baseline_overhead_bytes: 2 * 1024 * 1024, // 2 MB
            snapshot_history: 50,
        }
    }
}
