// Byte-oriented key-value backends for cache persistence.
use crate::errors::{ CacheError, CacheResult };
use rusqlite::{ params, Connection };
use std::collections::HashMap;
use std::path::Path;

/// Opaque byte-oriented key-value store the cache persists into.
///
/// Implementations only need point get/put/delete plus key enumeration; all
/// entry semantics (TTL, kinds, sizes) live above this trait.
pub trait KvBackend: Send {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
    fn put(&mut self, key: &str, value: &[u8]) -> CacheResult<()>;
    /// Returns true when the key existed.
    fn delete(&mut self, key: &str) -> CacheResult<bool>;
    fn keys(&self) -> CacheResult<Vec<String>>;
}

/// Configure database connection for optimal performance and concurrency
fn configure_database_connection(connection: &Connection) -> Result<(), rusqlite::Error> {
    // Set Write-Ahead Logging for better concurrency
    connection.pragma_update(None, "journal_mode", "WAL")?;
    // Reasonable durability/perf tradeoff
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    // Use memory for temp storage
    connection.pragma_update(None, "temp_store", "memory")?;
    // Set busy timeout for lock contention
    connection.busy_timeout(std::time::Duration::from_millis(30_000))?;
    Ok(())
}

/// SQLite-backed store. One table, keys are TEXT, values are opaque BLOBs.
pub struct SqliteBackend {
    connection: Connection,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let connection = Connection::open(path)?;
        Self::from_connection(connection)
    }

    /// Ephemeral in-memory database, mainly for tests and tooling.
    pub fn open_in_memory() -> CacheResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> CacheResult<Self> {
        configure_database_connection(&connection)?;

        connection.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            []
        )?;

        Ok(Self { connection })
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut stmt = self.connection.prepare("SELECT value FROM cache_entries WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0));

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CacheError::Database(e)),
        }
    }

    fn put(&mut self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.connection.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value) VALUES (?1, ?2)",
            params![key, value]
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        let deleted = self.connection.execute(
            "DELETE FROM cache_entries WHERE key = ?1",
            params![key]
        )?;
        Ok(deleted > 0)
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        let mut stmt = self.connection.prepare("SELECT key FROM cache_entries")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

/// In-memory backend over a plain map. No durability; useful for tests and
/// hosts that want a purely ephemeral cache.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        Ok(self.data.remove(key).is_some())
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.data.keys().cloned().collect())
    }
}
