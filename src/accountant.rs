// Size/recency bookkeeping, kept apart from the stored payloads.
use crate::query::CacheKind;
use chrono::{ DateTime, Duration as ChronoDuration, Utc };
use std::collections::HashMap;
use std::time::Duration;

/// Derived metadata for one cached entry. The accountant never holds the
/// payload itself.
#[derive(Debug, Clone)]
pub struct EntryStat {
    pub kind: CacheKind,
    pub size_bytes: usize,
    pub written_at: DateTime<Utc>,
}

/// Aggregate count/bytes for one entry kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindTotals {
    pub count: usize,
    pub bytes: usize,
}

/// Tracks per-key payload sizes and aggregate counts without ever reading the
/// backing store. The cache store is responsible for keeping this in sync on
/// every put and delete.
#[derive(Debug, Default)]
pub struct CacheAccountant {
    entries: HashMap<String, EntryStat>,
}

impl CacheAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: &str, size_bytes: usize, kind: CacheKind, written_at: DateTime<Utc>) {
        self.entries.insert(key.to_string(), EntryStat { kind, size_bytes, written_at });
    }

    /// No-op when the key was never recorded.
    pub fn forget(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<&EntryStat> {
        self.entries.get(key)
    }

    pub fn total_items(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.values().map(|stat| stat.size_bytes).sum()
    }

    pub fn totals_by_kind(&self) -> HashMap<CacheKind, KindTotals> {
        let mut totals: HashMap<CacheKind, KindTotals> = HashMap::new();
        for stat in self.entries.values() {
            let entry = totals.entry(stat.kind).or_default();
            entry.count += 1;
            entry.bytes += stat.size_bytes;
        }
        totals
    }

    /// Keys whose age exceeds `ttl` at `now`.
    pub fn expired_keys(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::max_value());
        self.entries
            .iter()
            .filter(|(_, stat)| now.signed_duration_since(stat.written_at) > ttl)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// One access-recency observation, the unit the eviction policy ranks by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub key: String,
    pub kind: CacheKind,
    pub last_accessed_at: DateTime<Utc>,
}

/// Recency log maintained separately from entries so eviction can rank keys
/// without touching payload metadata. Bounded: when it grows past twice the
/// configured item budget, the oldest half is dropped.
#[derive(Debug)]
pub struct AccessLog {
    entries: HashMap<String, (CacheKind, DateTime<Utc>)>,
    item_budget: usize,
}

impl AccessLog {
    pub fn new(item_budget: usize) -> Self {
        Self {
            entries: HashMap::new(),
            item_budget: item_budget.max(1),
        }
    }

    pub fn touch(&mut self, key: &str, kind: CacheKind, at: DateTime<Utc>) {
        self.entries.insert(key.to_string(), (kind, at));
        if self.entries.len() > self.item_budget * 2 {
            self.prune_oldest_half();
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> Vec<AccessRecord> {
        self.entries
            .iter()
            .map(|(key, (kind, at))| AccessRecord {
                key: key.clone(),
                kind: *kind,
                last_accessed_at: *at,
            })
            .collect()
    }

    fn prune_oldest_half(&mut self) {
        let mut by_age: Vec<(String, DateTime<Utc>)> = self.entries
            .iter()
            .map(|(key, (_, at))| (key.clone(), *at))
            .collect();
        by_age.sort_by_key(|(_, at)| *at);

        for (key, _) in by_age.into_iter().take(self.entries.len() / 2) {
            self.entries.remove(&key);
        }
    }
}
