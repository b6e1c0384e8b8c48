//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::error::CacheError;

/// Records that can be stored as part of a cached collection.
///
/// Collections are serialized whole, so any owned serde type qualifies.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Refresh failure that was absorbed by serving stored data
  pub warning: Option<CacheError>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
      warning: None,
    }
  }

  /// Create a new cache result from cached data that is still fresh.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
      warning: None,
    }
  }

  /// Create a new cache result for offline mode: the refresh failed and the
  /// stored collection is served instead.
  pub fn offline(data: T, cached_at: DateTime<Utc>, warning: CacheError) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
      warning: Some(warning),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - refresh failed, serving stale cached data
  Offline,
}

/// Outcome of loading one resource kind's collection.
///
/// Always carries a collection; on an unrecoverable error it is empty and
/// `error` says why.
#[derive(Debug)]
pub struct Loaded<T> {
  pub items: Vec<T>,
  /// `None` when nothing could be loaded
  pub source: Option<CacheSource>,
  /// When the served collection was stored, if it came from the cache
  pub cached_at: Option<DateTime<Utc>>,
  /// Surfaced error (nothing to fall back to) or absorbed refresh warning
  pub error: Option<CacheError>,
}

impl<T> Loaded<T> {
  /// Whether the load failed outright (as opposed to serving stale data).
  pub fn is_failure(&self) -> bool {
    self.source.is_none()
  }

  /// Whether the items came from the stale-on-error fallback.
  pub fn is_offline(&self) -> bool {
    self.source == Some(CacheSource::Offline)
  }
}

impl<T> From<Result<CacheResult<Vec<T>>, CacheError>> for Loaded<T> {
  fn from(result: Result<CacheResult<Vec<T>>, CacheError>) -> Self {
    match result {
      Ok(result) => Self {
        items: result.data,
        source: Some(result.source),
        cached_at: result.cached_at,
        error: result.warning,
      },
      Err(e) => Self {
        items: Vec::new(),
        source: None,
        cached_at: None,
        error: Some(e),
      },
    }
  }
}
