// Persisted favorites set, outside every cache lifecycle rule.
use crate::keys::FAVORITES_KEY;
use crate::store::CacheStore;
use std::collections::HashSet;

/// Small named set of fund identifiers persisted under a fixed key.
///
/// Favorites share the cache's backend but bypass its accountant and access
/// log entirely, so no TTL, sweep or eviction path can ever touch them. The
/// set changes only through `save` and `clear`, and it survives `clear()` on
/// the cache store.
#[derive(Clone)]
pub struct FavoritesStore {
    store: CacheStore,
}

impl FavoritesStore {
    pub fn new(store: &CacheStore) -> Self {
        Self { store: store.clone() }
    }

    /// Persist the full set, overwriting the previous one. Returns false on
    /// failure so callers can degrade gracefully instead of handling errors.
    pub fn save(&self, ids: &HashSet<String>) -> bool {
        let bytes = match serde_json::to_vec(ids) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to serialize favorites: {}", e);
                return false;
            }
        };

        let Ok(mut state) = self.store.state.lock() else {
            return false;
        };
        match state.backend.put(FAVORITES_KEY, &bytes) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to save favorites: {}", e);
                false
            }
        }
    }

    /// Load the persisted set. Absent or corrupt data yields an empty set;
    /// corruption is swallowed, the next save overwrites it wholesale.
    pub fn load(&self) -> HashSet<String> {
        let Ok(state) = self.store.state.lock() else {
            return HashSet::new();
        };

        match state.backend.get(FAVORITES_KEY) {
            Ok(Some(bytes)) => {
                serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                    log::warn!("Corrupt favorites data, treating as empty: {}", e);
                    HashSet::new()
                })
            }
            Ok(None) => HashSet::new(),
            Err(e) => {
                log::warn!("Failed to load favorites: {}", e);
                HashSet::new()
            }
        }
    }

    /// Remove the persisted set entirely.
    pub fn clear(&self) -> bool {
        let Ok(mut state) = self.store.state.lock() else {
            return false;
        };
        match state.backend.delete(FAVORITES_KEY) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to clear favorites: {}", e);
                false
            }
        }
    }
}
