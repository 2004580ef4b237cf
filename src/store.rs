//! Persistence-agnostic cache store.
//!
//! Payloads are serialized to JSON, wrapped in an envelope carrying the entry
//! kind and write timestamp, and stored as bytes in the injected backend. TTL
//! is evaluated at read time; the periodic sweep only reclaims entries that
//! were never re-read. Corrupt entries are deleted and counted, never
//! surfaced as errors.

use crate::accountant::{ AccessLog, AccessRecord, CacheAccountant, KindTotals };
use crate::backend::KvBackend;
use crate::config::StoreConfig;
use crate::errors::{ CacheError, CacheResult };
use crate::keys;
use crate::query::CacheKind;
use chrono::{ DateTime, Duration as ChronoDuration, Utc };
use serde::de::DeserializeOwned;
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::sync::{ Arc, Mutex };
use std::time::Duration;

/// Stored envelope: the payload plus the metadata needed to expire it.
/// Overwritten wholesale on re-write, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub kind: CacheKind,
    pub written_at: DateTime<Utc>,
    pub payload: String,
}

impl CacheEntry {
    fn is_older_than(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let max_age = ChronoDuration::from_std(max_age)
            .unwrap_or_else(|_| ChronoDuration::max_value());
        now.signed_duration_since(self.written_at) > max_age
    }
}

/// Cache operation counters for monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64)
        }
    }
}

/// Everything the store mutates, guarded by a single mutex: the backend, the
/// accountant and the access log move in lockstep on every put and delete.
pub(crate) struct CacheState {
    pub(crate) backend: Box<dyn KvBackend>,
    pub(crate) accountant: CacheAccountant,
    pub(crate) access: AccessLog,
    pub(crate) metrics: CacheMetrics,
    pub(crate) decode_failures: u64,
}

/// Thin wrapper over the byte backend offering typed get/put with TTL
/// metadata. Cloning shares the underlying state.
#[derive(Clone)]
pub struct CacheStore {
    pub(crate) state: Arc<Mutex<CacheState>>,
    config: StoreConfig,
}

impl CacheStore {
    /// Open a store over the given backend, rebuilding size and recency
    /// bookkeeping from whatever the backend already holds. Entries that no
    /// longer decode are dropped and counted.
    pub fn new(backend: Box<dyn KvBackend>, config: StoreConfig) -> CacheResult<Self> {
        let mut state = CacheState {
            backend,
            accountant: CacheAccountant::new(),
            access: AccessLog::new(config.max_items),
            metrics: CacheMetrics::default(),
            decode_failures: 0,
        };

        let mut rebuilt = 0usize;
        let mut dropped = 0usize;
        for key in state.backend.keys()? {
            if key.starts_with(CacheKind::Favorites.prefix()) {
                continue; // favorites live outside the accountant
            }

            match state.backend.get(&key)? {
                Some(bytes) => {
                    match serde_json::from_slice::<CacheEntry>(&bytes) {
                        Ok(entry) => {
                            state.accountant.record(
                                &key,
                                entry.payload.len(),
                                entry.kind,
                                entry.written_at
                            );
                            state.access.touch(&key, entry.kind, entry.written_at);
                            rebuilt += 1;
                        }
                        Err(_) => {
                            let _ = state.backend.delete(&key);
                            state.decode_failures += 1;
                            dropped += 1;
                        }
                    }
                }
                None => {}
            }
        }

        if rebuilt > 0 || dropped > 0 {
            log::info!(
                "🗄️ Cache store opened: {} entries rebuilt, {} corrupt entries dropped",
                rebuilt,
                dropped
            );
        }

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            config,
        })
    }

    /// Get a cached value using the configured default TTL.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_max_age(key, self.config.default_ttl)
    }

    /// Get a cached value, treating anything older than `max_age` as a miss.
    ///
    /// Degrades to a miss on backend read failures and on undecodable data;
    /// stale and corrupt entries are removed on the way out.
    pub fn get_with_max_age<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };

        let bytes = match state.backend.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                state.metrics.misses += 1;
                return None;
            }
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                state.metrics.misses += 1;
                return None;
            }
        };

        let entry = match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => entry,
            Err(_) => {
                Self::drop_undecodable(&mut state, key);
                return None;
            }
        };

        if entry.is_older_than(Utc::now(), max_age) {
            Self::remove_entry(&mut state, key);
            state.metrics.expirations += 1;
            state.metrics.misses += 1;
            return None;
        }

        match serde_json::from_str::<T>(&entry.payload) {
            Ok(value) => {
                state.access.touch(key, entry.kind, Utc::now());
                state.metrics.hits += 1;
                Some(value)
            }
            Err(_) => {
                Self::drop_undecodable(&mut state, key);
                None
            }
        }
    }

    /// Write a value under `key`, overwriting any previous entry wholesale.
    /// Backend write failures propagate so callers can decide to ignore them.
    pub fn put<T: Serialize>(&self, key: &str, value: &T, kind: CacheKind) -> CacheResult<()> {
        let payload = serde_json::to_string(value)?;
        let entry = CacheEntry {
            kind,
            written_at: Utc::now(),
            payload,
        };
        let size_bytes = entry.payload.len();
        let bytes = serde_json::to_vec(&entry)?;

        let mut state = self.lock_state()?;
        state.backend.put(key, &bytes)?;
        state.accountant.record(key, size_bytes, kind, entry.written_at);
        state.access.touch(key, kind, entry.written_at);
        state.metrics.inserts += 1;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> CacheResult<()> {
        let mut state = self.lock_state()?;
        state.backend.delete(key)?;
        state.accountant.forget(key);
        state.access.remove(key);
        Ok(())
    }

    /// Delete every entry whose key starts with `prefix`, e.g. all rankings.
    /// Per-key failures are logged and skipped; returns the number deleted.
    pub fn delete_by_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let mut state = self.lock_state()?;
        let keys: Vec<String> = state.backend.keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();

        let mut deleted = 0;
        for key in keys {
            match state.backend.delete(&key) {
                Ok(_) => {
                    state.accountant.forget(&key);
                    state.access.remove(&key);
                    deleted += 1;
                }
                Err(e) => log::warn!("Failed to delete {}: {}", key, e),
            }
        }
        Ok(deleted)
    }

    /// Wipe the whole cache except the favorites namespace.
    pub fn clear(&self) -> CacheResult<usize> {
        let mut state = self.lock_state()?;
        let keys: Vec<String> = state.backend.keys()?
            .into_iter()
            .filter(|key| !key.starts_with(CacheKind::Favorites.prefix()))
            .collect();

        let mut deleted = 0;
        for key in keys {
            match state.backend.delete(&key) {
                Ok(_) => {
                    state.accountant.forget(&key);
                    state.access.remove(&key);
                    deleted += 1;
                }
                Err(e) => log::warn!("Failed to delete {}: {}", key, e),
            }
        }

        log::debug!("🧹 Cache cleared: {} entries removed", deleted);
        Ok(deleted)
    }

    /// True iff the primary fund list entry exists and is within `max_age`.
    /// Checked against bookkeeping only, no payload read.
    pub fn is_valid(&self, max_age: Duration) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };

        let max_age = ChronoDuration::from_std(max_age)
            .unwrap_or_else(|_| ChronoDuration::max_value());
        match state.accountant.get(&keys::fund_list_key()) {
            Some(stat) => Utc::now().signed_duration_since(stat.written_at) <= max_age,
            None => false,
        }
    }

    /// Remove every entry older than `ttl`. Used by the periodic sweep.
    pub fn sweep_expired(&self, ttl: Duration) -> CacheResult<usize> {
        let mut state = self.lock_state()?;
        let expired = state.accountant.expired_keys(Utc::now(), ttl);

        let mut removed = 0;
        for key in expired {
            match state.backend.delete(&key) {
                Ok(_) => {
                    state.accountant.forget(&key);
                    state.access.remove(&key);
                    state.metrics.expirations += 1;
                    removed += 1;
                }
                Err(e) => log::warn!("Failed to sweep {}: {}", key, e),
            }
        }
        Ok(removed)
    }

    /// Delete eviction victims, counting them in the eviction metric.
    /// Best-effort: failures are logged, the rest proceed.
    pub fn evict_keys(&self, victims: &[String]) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };

        let mut removed = 0;
        for key in victims {
            match state.backend.delete(key) {
                Ok(_) => {
                    state.accountant.forget(key);
                    state.access.remove(key);
                    state.metrics.evictions += 1;
                    removed += 1;
                }
                Err(e) => log::warn!("Failed to evict {}: {}", key, e),
            }
        }
        removed
    }

    pub fn total_items(&self) -> usize {
        self.state.lock().map(|state| state.accountant.total_items()).unwrap_or(0)
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().map(|state| state.accountant.total_bytes()).unwrap_or(0)
    }

    pub fn totals_by_kind(&self) -> HashMap<CacheKind, KindTotals> {
        self.state.lock().map(|state| state.accountant.totals_by_kind()).unwrap_or_default()
    }

    pub fn access_records(&self) -> Vec<AccessRecord> {
        self.state.lock().map(|state| state.access.records()).unwrap_or_default()
    }

    pub fn decode_failures(&self) -> u64 {
        self.state.lock().map(|state| state.decode_failures).unwrap_or(0)
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.state.lock().map(|state| state.metrics.clone()).unwrap_or_default()
    }

    fn lock_state(&self) -> CacheResult<std::sync::MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|_| CacheError::Backend("cache state lock poisoned".to_string()))
    }

    fn drop_undecodable(state: &mut CacheState, key: &str) {
        log::warn!("Dropping undecodable cache entry {}", key);
        Self::remove_entry(state, key);
        state.decode_failures += 1;
        state.metrics.misses += 1;
    }

    fn remove_entry(state: &mut CacheState, key: &str) {
        if let Err(e) = state.backend.delete(key) {
            log::warn!("Failed to delete {}: {}", key, e);
        }
        state.accountant.forget(key);
        state.access.remove(key);
    }
}
