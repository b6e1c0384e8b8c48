//! Durable fetch cache for resource collections.
//!
//! This module decides, per resource kind and account/region context, whether
//! to call a slow paginated API or serve a previously fetched collection:
//! - Keys are composed from the kind name plus every result-shaping dimension
//! - Collections persist in SQLite so they survive the short-lived process
//! - Entries are classified fresh/stale/absent against a per-kind ttl
//! - Failed refreshes serve the stale collection (offline mode)
//! - One refresh per key is in flight at a time within a process

mod error;
mod freshness;
mod key;
mod layer;
mod storage;
mod traits;

pub use error::CacheError;
pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::Cacheable;

#[cfg(test)]
pub(crate) use key::compose_key;
