//! Adaptive memory management over the cache store.
//!
//! A single periodic background task re-estimates cache footprint, records
//! usage snapshots, expires stale entries and evicts under pressure. The
//! estimator is heuristic: the host runtime exposes no heap introspection to
//! this layer, so footprint is derived from tracked payload bytes plus
//! calibrated per-item and baseline overheads from `MemoryConfig`.

use crate::accountant::KindTotals;
use crate::config::MemoryConfig;
use crate::eviction;
use crate::query::CacheKind;
use crate::store::{ CacheMetrics, CacheStore };
use chrono::{ DateTime, Utc };
use std::collections::{ HashMap, VecDeque };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex };
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

// =============================================================================
// REPORTING TYPES
// =============================================================================

/// One usage observation, appended on every monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    pub timestamp: DateTime<Utc>,
    pub estimated_usage_mb: f64,
    pub cache_item_count: usize,
}

/// Current usage against the configured budgets.
#[derive(Debug, Clone)]
pub struct MemoryStatus {
    pub estimated_usage_mb: f64,
    pub max_usage_mb: f64,
    pub warning_threshold_mb: f64,
    pub cache_item_count: usize,
    pub monitoring: bool,
    pub last_gc_at: Option<DateTime<Utc>>,
    pub total_gc_invocations: u64,
}

/// Aggregate cache statistics for operational tooling.
#[derive(Debug, Clone)]
pub struct MemoryStatistics {
    pub totals_by_kind: HashMap<CacheKind, KindTotals>,
    pub total_items: usize,
    pub total_bytes: usize,
    pub snapshot_count: usize,
    pub decode_failures: u64,
    pub metrics: CacheMetrics,
}

/// Advisory leak-detection verdict. Never triggers remediation by itself.
#[derive(Debug, Clone)]
pub struct LeakVerdict {
    pub has_leak: bool,
    pub leak_rate_percent: f64,
    pub sample_count: usize,
    pub suspected_causes: Vec<String>,
    pub recommendation: String,
}

// =============================================================================
// USAGE ESTIMATOR
// =============================================================================

/// Estimated cache footprint in MB: tracked payload bytes plus a calibrated
/// per-entry overhead and a fixed baseline. An estimator, not a measurement;
/// the constants live in `MemoryConfig` so hosts can recalibrate per platform.
pub fn estimate_usage_mb(payload_bytes: usize, item_count: usize, config: &MemoryConfig) -> f64 {
    let total =
        payload_bytes + config.per_item_overhead_bytes * item_count + config.baseline_overhead_bytes;
    (total as f64) / (1024.0 * 1024.0)
}

// =============================================================================
// MEMORY MANAGER
// =============================================================================

#[derive(Debug, Default)]
struct GcState {
    snapshots: VecDeque<MemorySnapshot>,
    total_gc_invocations: u64,
    last_gc_at: Option<DateTime<Utc>>,
}

/// The pieces a monitor tick needs, shared with the background task.
#[derive(Clone)]
struct ManagerShared {
    store: CacheStore,
    config: MemoryConfig,
    gc: Arc<Mutex<GcState>>,
    collect_in_flight: Arc<AtomicBool>,
}

struct MonitorHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Orchestrates periodic cache maintenance: snapshots, TTL sweeps, eviction
/// and leak detection. Construct one per cache store and share it by
/// reference; there is no process-wide instance.
pub struct MemoryManager {
    shared: ManagerShared,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl MemoryManager {
    pub fn new(store: CacheStore, config: MemoryConfig) -> Self {
        debug_assert!(config.warning_threshold_mb <= config.max_usage_mb);

        Self {
            shared: ManagerShared {
                store,
                config,
                gc: Arc::new(Mutex::new(GcState::default())),
                collect_in_flight: Arc::new(AtomicBool::new(false)),
            },
            monitor: Mutex::new(None),
        }
    }

    /// Start the periodic monitor task. Idempotent: calling this while
    /// already monitoring is a no-op.
    pub fn start_monitoring(&self) {
        let Ok(mut monitor) = self.monitor.lock() else {
            return;
        };
        if monitor.is_some() {
            log::debug!("Memory monitor already running");
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let shared = self.shared.clone();
        let task_shutdown = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            log::info!(
                "🧠 Memory monitoring started (interval {:?})",
                shared.config.monitor_interval
            );

            loop {
                tokio::select! {
                    _ = task_shutdown.notified() => {
                        break;
                    }
                    _ = sleep(shared.config.monitor_interval) => {
                        shared.run_tick();
                    }
                }
            }

            log::info!("Memory monitoring stopped");
        });

        *monitor = Some(MonitorHandle { shutdown, task });
    }

    /// Stop the monitor and wait for any in-flight tick to finish, so no tick
    /// can fire after this returns. Idempotent when already stopped.
    pub async fn stop_monitoring(&self) {
        let handle = match self.monitor.lock() {
            Ok(mut monitor) => monitor.take(),
            Err(_) => None,
        };

        let Some(handle) = handle else {
            log::debug!("Memory monitor already stopped");
            return;
        };

        handle.shutdown.notify_one();
        if let Err(e) = handle.task.await {
            log::warn!("Memory monitor task ended abnormally: {}", e);
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().map(|monitor| monitor.is_some()).unwrap_or(false)
    }

    /// Run one maintenance cycle outside the timer, for tests and tooling.
    pub fn run_tick_once(&self) {
        self.shared.run_tick();
    }

    /// Reclaim memory now: sweep expired entries, evict the least recently
    /// used quarter, refresh the estimate. Safe to call while the timer is
    /// running; concurrent triggers are ignored, not queued.
    pub fn force_collect(&self) {
        self.shared.force_collect();
    }

    /// Compare the recent snapshot window against the one before it and
    /// report a banded growth verdict. Requires a full 5+5 window; with
    /// fewer samples the verdict reports insufficient data.
    pub fn detect_leaks(&self) -> LeakVerdict {
        let usages: Vec<f64> = match self.shared.gc.lock() {
            Ok(gc) => gc.snapshots.iter().map(|s| s.estimated_usage_mb).collect(),
            Err(_) => Vec::new(),
        };
        let sample_count = usages.len();

        if sample_count < 10 {
            return LeakVerdict {
                has_leak: false,
                leak_rate_percent: 0.0,
                sample_count,
                suspected_causes: Vec::new(),
                recommendation: "Insufficient snapshot history, keep monitoring".to_string(),
            };
        }

        let recent_mean: f64 = usages[sample_count - 5..].iter().sum::<f64>() / 5.0;
        let older_mean: f64 = usages[sample_count - 10..sample_count - 5].iter().sum::<f64>() / 5.0;

        let leak_rate_percent = if older_mean <= f64::EPSILON {
            0.0
        } else {
            (((recent_mean - older_mean) / older_mean) * 100.0).clamp(0.0, 100.0)
        };

        let mut suspected_causes = Vec::new();
        if leak_rate_percent > 20.0 {
            suspected_causes.push("cache data continuously growing".to_string());
        }
        if leak_rate_percent > 50.0 {
            suspected_causes.push("possible severe leak".to_string());
        }

        let recommendation = if leak_rate_percent < 10.0 {
            "Memory usage stable, no action needed"
        } else if leak_rate_percent <= 20.0 {
            "Slight upward trend, keep monitoring"
        } else if leak_rate_percent <= 50.0 {
            "Cache usage growing, run a forced collection and review cache churn"
        } else {
            "Severe growth, force a collection and lower the cache budgets"
        };

        LeakVerdict {
            has_leak: leak_rate_percent >= 10.0,
            leak_rate_percent,
            sample_count,
            suspected_causes,
            recommendation: recommendation.to_string(),
        }
    }

    pub fn memory_status(&self) -> MemoryStatus {
        let (last_gc_at, total_gc_invocations) = match self.shared.gc.lock() {
            Ok(gc) => (gc.last_gc_at, gc.total_gc_invocations),
            Err(_) => (None, 0),
        };

        MemoryStatus {
            estimated_usage_mb: self.shared.estimate_usage(),
            max_usage_mb: self.shared.config.max_usage_mb,
            warning_threshold_mb: self.shared.config.warning_threshold_mb,
            cache_item_count: self.shared.store.total_items(),
            monitoring: self.is_monitoring(),
            last_gc_at,
            total_gc_invocations,
        }
    }

    pub fn memory_statistics(&self) -> MemoryStatistics {
        let snapshot_count = self.shared.gc.lock().map(|gc| gc.snapshots.len()).unwrap_or(0);

        MemoryStatistics {
            totals_by_kind: self.shared.store.totals_by_kind(),
            total_items: self.shared.store.total_items(),
            total_bytes: self.shared.store.total_bytes(),
            snapshot_count,
            decode_failures: self.shared.store.decode_failures(),
            metrics: self.shared.store.metrics(),
        }
    }

    /// Recorded snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<MemorySnapshot> {
        self.shared.gc
            .lock()
            .map(|gc| gc.snapshots.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ManagerShared {
    fn estimate_usage(&self) -> f64 {
        estimate_usage_mb(self.store.total_bytes(), self.store.total_items(), &self.config)
    }

    fn record_snapshot(&self, estimated_usage_mb: f64, cache_item_count: usize) {
        let Ok(mut gc) = self.gc.lock() else {
            return;
        };

        gc.snapshots.push_back(MemorySnapshot {
            timestamp: Utc::now(),
            estimated_usage_mb,
            cache_item_count,
        });
        while gc.snapshots.len() > self.config.snapshot_history {
            gc.snapshots.pop_front();
        }
    }

    fn run_tick(&self) {
        let usage = self.estimate_usage();
        let items = self.store.total_items();
        self.record_snapshot(usage, items);

        if usage > self.config.warning_threshold_mb {
            log::warn!(
                "⚠️ Estimated cache usage {:.1} MB exceeds warning threshold {:.1} MB",
                usage,
                self.config.warning_threshold_mb
            );
            self.force_collect();
        }

        let items = self.store.total_items();
        if items > self.config.max_cache_items {
            let target = items - self.config.max_cache_items + self.config.eviction_margin;
            let victims = eviction::select_victims(&self.store.access_records(), target);
            let removed = self.store.evict_keys(&victims);
            if removed > 0 {
                log::debug!(
                    "Evicted {} entries over the {} item budget",
                    removed,
                    self.config.max_cache_items
                );
            }
        }
    }

    fn force_collect(&self) {
        // Single in-flight collection: a trigger racing another one is
        // ignored since eviction is idempotent.
        if
            self.collect_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            log::debug!("Cache collection already in flight, ignoring trigger");
            return;
        }

        log::info!("🧹 Cache collection started");

        match self.store.sweep_expired(self.config.entry_ttl) {
            Ok(removed) if removed > 0 => {
                log::debug!("Collection swept {} expired entries", removed);
            }
            Ok(_) => {}
            Err(e) => log::warn!("Expiry sweep failed: {}", e),
        }

        let records = self.store.access_records();
        let quarter = records.len() / 4;
        if quarter > 0 {
            let victims = eviction::select_victims(&records, quarter);
            let removed = self.store.evict_keys(&victims);
            log::debug!("Collection evicted {} least recently used entries", removed);
        }

        let usage = self.estimate_usage();

        if let Ok(mut gc) = self.gc.lock() {
            gc.total_gc_invocations += 1;
            gc.last_gc_at = Some(Utc::now());
        }

        self.collect_in_flight.store(false, Ordering::SeqCst);
        log::info!("✅ Cache collection finished, estimated usage {:.1} MB", usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::StoreConfig;
    use crate::favorites::FavoritesStore;
    use crate::keys::FAVORITES_KEY;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_store() -> CacheStore {
        CacheStore::new(Box::new(MemoryBackend::new()), StoreConfig::default()).unwrap()
    }

    fn manager_with(config: MemoryConfig) -> (CacheStore, MemoryManager) {
        let store = test_store();
        let manager = MemoryManager::new(store.clone(), config);
        (store, manager)
    }

    fn push_usage_snapshots(manager: &MemoryManager, usages: &[f64]) {
        let mut gc = manager.shared.gc.lock().unwrap();
        for usage in usages {
            gc.snapshots.push_back(MemorySnapshot {
                timestamp: Utc::now(),
                estimated_usage_mb: *usage,
                cache_item_count: 0,
            });
        }
    }

    #[test]
    fn test_estimator_uses_configured_constants() {
        let config = MemoryConfig {
            per_item_overhead_bytes: 1024,
            baseline_overhead_bytes: 1024 * 1024,
            ..MemoryConfig::default()
        };

        let usage = estimate_usage_mb(1024 * 1024, 1024, &config);
        // 1 MB payload + 1 MB per-item overhead + 1 MB baseline
        assert!((usage - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_eviction_under_pressure() {
        let config = MemoryConfig {
            max_cache_items: 10,
            eviction_margin: 2,
            ..MemoryConfig::default()
        };
        let (store, manager) = manager_with(config);

        let favorites = FavoritesStore::new(&store);
        let mut saved = HashSet::new();
        saved.insert("000001".to_string());
        assert!(favorites.save(&saved));

        for i in 0..15 {
            store.put(&format!("filtered:q{}", i), &vec![i], CacheKind::FilteredList).unwrap();
        }
        assert_eq!(store.total_items(), 15);

        manager.run_tick_once();

        assert!(store.total_items() <= 10);
        // Favorites untouched by the eviction pass
        assert_eq!(favorites.load(), saved);
        let state = store.state.lock().unwrap();
        assert!(state.backend.get(FAVORITES_KEY).unwrap().is_some());
    }

    #[test]
    fn test_warning_threshold_triggers_collection() {
        let config = MemoryConfig {
            warning_threshold_mb: 0.0001,
            max_usage_mb: 0.0001,
            ..MemoryConfig::default()
        };
        let (store, manager) = manager_with(config);
        store.put("filtered:q", &vec!["payload"], CacheKind::FilteredList).unwrap();

        manager.run_tick_once();

        let status = manager.memory_status();
        assert_eq!(status.total_gc_invocations, 1);
        assert!(status.last_gc_at.is_some());
    }

    #[test]
    fn test_snapshot_ring_buffer_is_capped() {
        let config = MemoryConfig {
            snapshot_history: 50,
            ..MemoryConfig::default()
        };
        let (_store, manager) = manager_with(config);

        for _ in 0..60 {
            manager.run_tick_once();
        }

        assert_eq!(manager.snapshots().len(), 50);
    }

    #[test]
    fn test_leak_detection_insufficient_data() {
        let (_store, manager) = manager_with(MemoryConfig::default());
        push_usage_snapshots(&manager, &[10.0; 9]);

        let verdict = manager.detect_leaks();
        assert!(!verdict.has_leak);
        assert_eq!(verdict.leak_rate_percent, 0.0);
        assert_eq!(verdict.sample_count, 9);
    }

    #[test]
    fn test_leak_detection_flat_usage() {
        let (_store, manager) = manager_with(MemoryConfig::default());
        push_usage_snapshots(&manager, &[25.0; 10]);

        let verdict = manager.detect_leaks();
        assert!(!verdict.has_leak);
        assert!(verdict.leak_rate_percent.abs() < 1e-9);
        assert!(verdict.suspected_causes.is_empty());
    }

    #[test]
    fn test_leak_detection_doubling_usage() {
        let (_store, manager) = manager_with(MemoryConfig::default());
        let doubling: Vec<f64> = (0..10).map(|i| (1u64 << i) as f64).collect();
        push_usage_snapshots(&manager, &doubling);

        let verdict = manager.detect_leaks();
        assert!(verdict.has_leak);
        assert!(verdict.leak_rate_percent > 50.0);
        assert!(
            verdict.suspected_causes.contains(&"cache data continuously growing".to_string())
        );
        assert!(verdict.suspected_causes.contains(&"possible severe leak".to_string()));
    }

    #[test]
    fn test_leak_detection_moderate_growth_has_no_causes() {
        let (_store, manager) = manager_with(MemoryConfig::default());
        // Older window mean 100, recent window mean 115: flagged, no causes
        push_usage_snapshots(&manager, &[100.0; 5]);
        push_usage_snapshots(&manager, &[115.0; 5]);

        let verdict = manager.detect_leaks();
        assert!(verdict.has_leak);
        assert!(verdict.leak_rate_percent > 10.0 && verdict.leak_rate_percent < 20.0);
        assert!(verdict.suspected_causes.is_empty());
    }

    #[test]
    fn test_concurrent_collection_is_ignored() {
        let (store, manager) = manager_with(MemoryConfig::default());
        store.put("filtered:q", &vec![1], CacheKind::FilteredList).unwrap();

        manager.shared.collect_in_flight.store(true, Ordering::SeqCst);
        manager.force_collect();
        assert_eq!(manager.memory_status().total_gc_invocations, 0);

        manager.shared.collect_in_flight.store(false, Ordering::SeqCst);
        manager.force_collect();
        assert_eq!(manager.memory_status().total_gc_invocations, 1);
    }

    #[test]
    fn test_force_collect_sweeps_and_evicts() {
        let config = MemoryConfig {
            entry_ttl: Duration::from_millis(30),
            ..MemoryConfig::default()
        };
        let (store, manager) = manager_with(config);

        for i in 0..8 {
            store.put(&format!("filtered:q{}", i), &vec![i], CacheKind::FilteredList).unwrap();
        }
        std::thread::sleep(Duration::from_millis(60));

        manager.force_collect();

        // Everything was past TTL, the sweep alone empties the cache
        assert_eq!(store.total_items(), 0);
        assert_eq!(manager.memory_status().total_gc_invocations, 1);
    }

    #[test]
    fn test_memory_statistics_reflect_store() {
        let (store, manager) = manager_with(MemoryConfig::default());
        store.put("filtered:q", &vec!["a"], CacheKind::FilteredList).unwrap();
        store.put("ranking:r", &vec!["b"], CacheKind::Ranking).unwrap();

        let stats = manager.memory_statistics();
        assert_eq!(stats.total_items, 2);
        assert!(stats.total_bytes > 0);
        assert_eq!(stats.totals_by_kind[&CacheKind::Ranking].count, 1);
        assert_eq!(stats.metrics.inserts, 2);
    }

    #[tokio::test]
    async fn test_monitoring_lifecycle_is_idempotent() {
        let (_store, manager) = manager_with(MemoryConfig::default());
        assert!(!manager.is_monitoring());

        manager.start_monitoring();
        assert!(manager.is_monitoring());

        // Second start is a no-op, not a second timer
        manager.start_monitoring();
        assert!(manager.is_monitoring());

        manager.stop_monitoring().await;
        assert!(!manager.is_monitoring());

        // Stopping again must not panic
        manager.stop_monitoring().await;
        assert!(!manager.is_monitoring());
    }

    #[tokio::test]
    async fn test_monitor_loop_enforces_item_budget() {
        let config = MemoryConfig {
            max_cache_items: 5,
            eviction_margin: 0,
            monitor_interval: Duration::from_millis(20),
            ..MemoryConfig::default()
        };
        let (store, manager) = manager_with(config);

        for i in 0..12 {
            store.put(&format!("filtered:q{}", i), &vec![i], CacheKind::FilteredList).unwrap();
        }

        manager.start_monitoring();
        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.stop_monitoring().await;

        assert!(store.total_items() <= 5);
        assert!(!manager.snapshots().is_empty());
    }
}
