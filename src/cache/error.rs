//! Error kinds produced by the cache layer.

use std::time::Duration;
use thiserror::Error;

/// Failure raised while resolving a cached collection.
///
/// Only `Fetch` and `Timeout` can reach a caller, and only when there is no
/// stored collection to fall back to. Storage and serialization failures are
/// absorbed by the layer and reported through logs.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The fetcher failed (network, API or a page in the middle of pagination).
  #[error("Fetch failed: {0:#}")]
  Fetch(color_eyre::Report),

  /// The fetcher did not finish within the configured deadline.
  #[error("Fetch timed out after {0:?}")]
  Timeout(Duration),

  /// The durable medium could not be opened, read or written.
  #[error("Cache storage error: {0}")]
  Storage(String),

  /// A payload could not be encoded or a stored payload could not be decoded.
  #[error("Cache serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl CacheError {
  /// A copy for another caller waiting on the same refresh.
  ///
  /// Reports are not `Clone`, so a fetch failure is carried over by its
  /// rendered message.
  pub fn share(&self) -> Self {
    match self {
      Self::Fetch(report) => Self::Fetch(color_eyre::eyre::eyre!("{:#}", report)),
      Self::Timeout(deadline) => Self::Timeout(*deadline),
      other => Self::Storage(other.to_string()),
    }
  }
}

impl From<rusqlite::Error> for CacheError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Storage(e.to_string())
  }
}
