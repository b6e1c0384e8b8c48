//! Staleness classification of stored entries.

use chrono::{DateTime, Duration, Utc};

/// How usable a stored entry is right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
  /// Younger than the ttl; serve without fetching.
  Fresh,
  /// Exists but aged past the ttl; refresh, fall back to it on failure.
  Stale,
  /// Nothing stored (or nothing readable).
  Absent,
}

/// Classify an entry written at `written_at` (if any) against `ttl`.
///
/// An entry is fresh iff `now - written_at < ttl`. A timestamp in the future
/// (clock skew between processes) counts as fresh.
pub fn classify(written_at: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) -> Staleness {
  match written_at {
    None => Staleness::Absent,
    Some(written_at) if now - written_at < ttl => Staleness::Fresh,
    Some(_) => Staleness::Stale,
  }
}
