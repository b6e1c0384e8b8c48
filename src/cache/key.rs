//! Cache key composition.

use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identifier of one cached collection.
///
/// Built from a resource kind name plus every dimension that changes the
/// result set (profile, region, ...). The hash is what the store indexes by;
/// the description is kept alongside for humans inspecting the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  hash: String,
  description: String,
}

impl CacheKey {
  /// Hex SHA-256 identifying the collection.
  pub fn as_str(&self) -> &str {
    &self.hash
  }

  /// Human readable form, e.g. `lambda_functions [default, us-east-1]`.
  pub fn description(&self) -> &str {
    &self.description
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.description)
  }
}

/// Compose the key for a resource kind and its result-shaping dimensions.
///
/// Every part is length-prefixed before hashing so that no two distinct
/// tuples share an encoding (`("a:b",)` vs `("a", "b")`).
pub fn compose_key<S: AsRef<str>>(kind: &str, dimensions: &[S]) -> CacheKey {
  debug_assert!(!kind.is_empty(), "resource kind name must not be empty");

  let mut hasher = Sha256::new();
  for part in std::iter::once(kind).chain(dimensions.iter().map(AsRef::as_ref)) {
    hasher.update(part.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(part.as_bytes());
  }

  let description = if dimensions.is_empty() {
    kind.to_string()
  } else {
    let dims: Vec<&str> = dimensions.iter().map(AsRef::as_ref).collect();
    format!("{} [{}]", kind, dims.join(", "))
  };

  CacheKey {
    hash: hex::encode(hasher.finalize()),
    description,
  }
}
