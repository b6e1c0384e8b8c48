//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::error::CacheError;
use super::key::CacheKey;

/// A stored collection snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Hash of the key this entry was stored under
  pub key: String,
  /// Serialized collection
  pub payload: Vec<u8>,
  /// When the collection was fetched and stored
  pub written_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A dumb key-value layer: no staleness logic and no coordination between
/// writers of the same key, which is the cache layer's job.
pub trait CacheStorage: Send + Sync + 'static {
  /// Read the entry for `key`. A missing key is `Ok(None)`, never an error.
  fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

  /// Replace the whole entry for `key`.
  fn put(&self, key: &CacheKey, payload: &[u8], written_at: DateTime<Utc>) -> Result<(), CacheError>;

  /// Remove every entry. Returns how many were removed.
  fn purge(&self) -> Result<usize, CacheError>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - every lookup misses.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
    Ok(None) // Always miss
  }

  fn put(&self, _key: &CacheKey, _payload: &[u8], _written_at: DateTime<Utc>) -> Result<(), CacheError> {
    Ok(()) // Discard
  }

  fn purge(&self) -> Result<usize, CacheError> {
    Ok(0)
  }
}

/// SQLite-based cache storage implementation.
///
/// One row per key. Writes are a single `INSERT OR REPLACE`, so an entry is
/// either the old snapshot or the new one, and a failed write leaves every
/// other row as it was. Separate processes share the file; SQLite serializes
/// their writers and `busy_timeout` bounds how long one waits for another.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open_default(busy_timeout: Duration) -> Result<Self, CacheError> {
    Self::open(&Self::default_path()?, busy_timeout)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, CacheError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Storage(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;
    conn.busy_timeout(busy_timeout)?;

    debug!(path = %path.display(), "opened cache database");
    Self::from_connection(conn)
  }

  /// Create an in-memory store (tests, or a cache that lives for one run).
  pub fn in_memory() -> Result<Self, CacheError> {
    let conn = Connection::open_in_memory()?;
    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, CacheError> {
    crate::config::data_dir()
      .map(|dir| dir.join("cache.db"))
      .ok_or_else(|| CacheError::Storage("Could not determine data directory".to_string()))
  }

  fn from_connection(conn: Connection) -> Result<Self, CacheError> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::Storage(format!("Failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One serialized collection per cache key
CREATE TABLE IF NOT EXISTS collection_cache (
    cache_key TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    data BLOB NOT NULL,
    written_at TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, written_at FROM collection_cache WHERE cache_key = ?",
        params![key.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| CacheError::Storage(format!("Failed to read cache entry {}: {}", key, e)))?;

    match row {
      Some((payload, written_at)) => Ok(Some(CacheEntry {
        key: key.as_str().to_string(),
        payload,
        written_at: parse_datetime(&written_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, key: &CacheKey, payload: &[u8], written_at: DateTime<Utc>) -> Result<(), CacheError> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO collection_cache (cache_key, description, data, written_at)
         VALUES (?, ?, ?, ?)",
        params![
          key.as_str(),
          key.description(),
          payload,
          format_datetime(written_at)
        ],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to store cache entry {}: {}", key, e)))?;

    Ok(())
  }

  fn purge(&self) -> Result<usize, CacheError> {
    let conn = self.lock()?;

    let removed = conn
      .execute("DELETE FROM collection_cache", [])
      .map_err(|e| CacheError::Storage(format!("Failed to purge cache: {}", e)))?;

    Ok(removed)
  }
}

/// Timestamps keep full precision so a read returns exactly what was written.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| CacheError::Storage(format!("Failed to parse datetime '{}': {}", s, e)))
}
