//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::error::CacheError;
use super::freshness::{classify, Staleness};
use super::key::{compose_key, CacheKey};
use super::storage::CacheStorage;
use super::traits::{CacheResult, Cacheable, Loaded};

/// Source of "now" for staleness decisions.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type Gate = Arc<AsyncMutex<Option<FailedRefresh>>>;
type GateMap = Arc<Mutex<HashMap<String, Gate>>>;

/// Outcome of the last refresh of a key that failed, kept for its waiters.
struct FailedRefresh {
  at: DateTime<Utc>,
  error: CacheError,
}

/// Cache layer that manages caching logic and network fetching.
///
/// Sits between a resource searcher and its fetcher. Serves fresh stored
/// collections, refreshes stale or missing ones, and falls back to stored
/// data when a refresh fails.
///
/// Within one process at most one refresh per key runs at a time. Callers
/// that arrive while a refresh is in flight wait for it and then share its
/// outcome: the collection it stored, or its failure (served through the
/// stale fallback) instead of fetching again.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// How long before cached data is considered stale, unless overridden per kind
  stale_time: Duration,
  ttls: HashMap<String, Duration>,
  fetch_timeout: std::time::Duration,
  /// Treat every lookup as a miss (stored data is still the fallback)
  force_refresh: bool,
  clock: Clock,
  in_flight: GateMap,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      stale_time: Duration::minutes(5),
      ttls: HashMap::new(),
      fetch_timeout: std::time::Duration::from_secs(10),
      force_refresh: false,
      clock: Arc::new(Utc::now),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Set the stale time used for kinds without their own ttl.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Set the ttl for one resource kind.
  pub fn with_ttl(mut self, kind: impl Into<String>, ttl: Duration) -> Self {
    self.ttls.insert(kind.into(), ttl);
    self
  }

  /// Set the deadline for a single fetch.
  pub fn with_fetch_timeout(mut self, timeout: std::time::Duration) -> Self {
    self.fetch_timeout = timeout;
    self
  }

  /// Bypass fresh entries and always refresh.
  pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
    self.force_refresh = force_refresh;
    self
  }

  /// Replace the wall clock.
  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  /// The underlying storage backend.
  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// The ttl applied to `kind`.
  pub fn ttl_for(&self, kind: &str) -> Duration {
    self.ttls.get(kind).copied().unwrap_or(self.stale_time)
  }

  fn now(&self) -> DateTime<Utc> {
    (self.clock)()
  }

  /// Load a resource kind's collection, never failing.
  ///
  /// Composes the key from `kind` and `dimensions`, resolves it with the
  /// kind's ttl, and turns an unrecoverable error into an empty collection
  /// carrying that error, so one kind's failure can't take down its siblings.
  pub async fn load_collection<T, F, Fut, D>(&self, kind: &str, dimensions: &[D], fetcher: F) -> Loaded<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<Vec<T>>>,
    D: AsRef<str>,
  {
    let key = compose_key(kind, dimensions);
    let ttl = self.ttl_for(kind);

    let result = self.resolve(&key, ttl, fetcher).await;
    if let Err(e) = &result {
      error!(kind, key = %key, error = %e, "failed to load collection");
    }

    result.into()
  }

  /// Resolve the collection stored under `key`.
  ///
  /// 1. Fresh entry: return it without calling `fetcher`
  /// 2. Stale or missing entry: call `fetcher` and store what it returns
  /// 3. Fetch failed with an entry on hand: return the entry (offline mode)
  ///    with the failure as a warning
  /// 4. Fetch failed with nothing stored: return the failure
  ///
  /// Storage and decoding problems never fail the call. An unreadable entry
  /// counts as missing, and a failed write only means this result was not
  /// persisted.
  pub async fn resolve<T, F, Fut>(
    &self,
    key: &CacheKey,
    ttl: Duration,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>, CacheError>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<Vec<T>>>,
  {
    let started_at = self.now();
    let mut gate = self.acquire(key).await;

    let cached = self.read::<T>(key).await;

    // A concurrent refresh finished while we waited on the gate
    if let (true, Some((data, cached_at))) = (gate.waited, &cached) {
      if *cached_at >= started_at {
        debug!(key = %key, "reusing collection stored by concurrent refresh");
        return Ok(CacheResult::from_cache(data.clone(), *cached_at));
      }
    }

    let verdict = classify(cached.as_ref().map(|(_, at)| *at), started_at, ttl);
    if let (Staleness::Fresh, false, Some((data, cached_at))) = (verdict, self.force_refresh, &cached) {
      debug!(key = %key, "cache fresh");
      return Ok(CacheResult::from_cache(data.clone(), *cached_at));
    }

    // The refresh we waited on failed; its outcome is ours too
    if let Some(failed) = gate
      .failure()
      .filter(|f| gate.waited && f.at >= started_at)
    {
      debug!(key = %key, error = %failed.error, "sharing failure of concurrent refresh");
      let e = failed.error.share();
      return match cached {
        Some((data, cached_at)) => Ok(CacheResult::offline(data, cached_at, e)),
        None => Err(e),
      };
    }

    info!(key = %key, ?verdict, force_refresh = self.force_refresh, "refreshing collection");

    let fetched = self.fetch(fetcher).await;
    gate.record(match &fetched {
      Ok(_) => None,
      Err(e) => Some(FailedRefresh {
        at: self.now(),
        error: e.share(),
      }),
    });

    match fetched {
      Ok(data) => {
        self.write(key, &data).await;
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match cached {
        Some((data, cached_at)) => {
          warn!(key = %key, error = %e, %cached_at, "refresh failed, serving stale collection");
          Ok(CacheResult::offline(data, cached_at, e))
        }
        None => Err(e),
      },
    }
  }

  async fn fetch<T, F, Fut>(&self, fetcher: F) -> Result<Vec<T>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<Vec<T>>>,
  {
    match tokio::time::timeout(self.fetch_timeout, fetcher()).await {
      Ok(Ok(data)) => Ok(data),
      Ok(Err(e)) => Err(CacheError::Fetch(e)),
      Err(_) => Err(CacheError::Timeout(self.fetch_timeout)),
    }
  }

  /// Read and decode the entry for `key`; any failure degrades to a miss.
  async fn read<T: Cacheable>(&self, key: &CacheKey) -> Option<(Vec<T>, DateTime<Utc>)> {
    let storage = Arc::clone(&self.storage);
    let lookup = key.clone();

    let entry = match tokio::task::spawn_blocking(move || storage.get(&lookup)).await {
      Ok(Ok(entry)) => entry?,
      Ok(Err(e)) => {
        warn!(key = %key, error = %e, "cache read failed, treating as absent");
        return None;
      }
      Err(e) => {
        warn!(key = %key, error = %e, "cache read task failed, treating as absent");
        return None;
      }
    };

    match serde_json::from_slice(&entry.payload) {
      Ok(data) => Some((data, entry.written_at)),
      Err(e) => {
        let e = CacheError::from(e);
        warn!(key = %key, error = %e, "discarding unreadable cache entry");
        None
      }
    }
  }

  /// Persist a freshly fetched collection; failures are logged and dropped.
  async fn write<T: Cacheable>(&self, key: &CacheKey, data: &[T]) {
    let payload = match serde_json::to_vec(data) {
      Ok(payload) => payload,
      Err(e) => {
        let e = CacheError::from(e);
        warn!(key = %key, error = %e, "failed to encode collection, not cached");
        return;
      }
    };

    let storage = Arc::clone(&self.storage);
    let target = key.clone();
    let written_at = self.now();

    match tokio::task::spawn_blocking(move || storage.put(&target, &payload, written_at)).await {
      Ok(Ok(())) => debug!(key = %key, count = data.len(), "stored collection"),
      Ok(Err(e)) => warn!(key = %key, error = %e, "failed to store collection, not cached"),
      Err(e) => warn!(key = %key, error = %e, "cache write task failed, not cached"),
    }
  }

  /// Wait for exclusive refresh rights on `key`.
  async fn acquire(&self, key: &CacheKey) -> KeyGate {
    let gate = {
      let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
      Arc::clone(map.entry(key.as_str().to_string()).or_default())
    };

    let (guard, waited) = match Arc::clone(&gate).try_lock_owned() {
      Ok(guard) => (guard, false),
      Err(_) => (gate.lock_owned().await, true),
    };

    KeyGate {
      guard: Some(guard),
      waited,
      map: Arc::clone(&self.in_flight),
      key: key.as_str().to_string(),
    }
  }

  #[cfg(test)]
  fn in_flight_len(&self) -> usize {
    self.in_flight.lock().unwrap().len()
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      stale_time: self.stale_time,
      ttls: self.ttls.clone(),
      fetch_timeout: self.fetch_timeout,
      force_refresh: self.force_refresh,
      clock: Arc::clone(&self.clock),
      in_flight: Arc::clone(&self.in_flight),
    }
  }
}

/// Held for the duration of one refresh. Removes its map slot on release
/// when nobody else is waiting on it.
struct KeyGate {
  guard: Option<OwnedMutexGuard<Option<FailedRefresh>>>,
  /// Whether another caller held the gate when this one arrived
  waited: bool,
  map: GateMap,
  key: String,
}

impl KeyGate {
  fn failure(&self) -> Option<&FailedRefresh> {
    self.guard.as_ref().and_then(|guard| guard.as_ref())
  }

  fn record(&mut self, failure: Option<FailedRefresh>) {
    if let Some(guard) = self.guard.as_mut() {
      **guard = failure;
    }
  }
}

impl Drop for KeyGate {
  fn drop(&mut self) {
    self.guard.take();
    let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
    if map
      .get(&self.key)
      .is_some_and(|gate| Arc::strong_count(gate) == 1)
    {
      map.remove(&self.key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{CacheEntry, NoopStorage, SqliteStorage};
  use crate::cache::traits::CacheSource;
  use chrono::TimeZone;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

  fn manual_clock(start: i64) -> (Arc<AtomicI64>, Clock) {
    let secs = Arc::new(AtomicI64::new(start));
    let handle = Arc::clone(&secs);
    let clock: Clock = Arc::new(move || Utc.timestamp_opt(handle.load(Ordering::SeqCst), 0).unwrap());
    (secs, clock)
  }

  fn lambda_key() -> CacheKey {
    compose_key("lambda", &["us-east-1"])
  }

  fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  /// Fetcher returning `items` and counting invocations.
  fn counting(
    counter: &Arc<AtomicU32>,
    items: Vec<String>,
  ) -> impl FnOnce() -> std::future::Ready<color_eyre::Result<Vec<String>>> {
    let counter = Arc::clone(counter);
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::future::ready(Ok(items))
    }
  }

  fn failing(counter: &Arc<AtomicU32>) -> impl FnOnce() -> std::future::Ready<color_eyre::Result<Vec<String>>> {
    let counter = Arc::clone(counter);
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::future::ready(Err(eyre!("network unreachable")))
    }
  }

  fn stored(layer: &CacheLayer<SqliteStorage>, key: &CacheKey) -> Option<(Vec<String>, DateTime<Utc>)> {
    layer
      .storage()
      .get(key)
      .unwrap()
      .map(|entry| (serde_json::from_slice(&entry.payload).unwrap(), entry.written_at))
  }

  /// Storage whose reads or writes always fail.
  struct BrokenStorage {
    reads: bool,
    writes: bool,
    inner: SqliteStorage,
  }

  impl CacheStorage for BrokenStorage {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
      if self.reads {
        return Err(CacheError::Storage("disk unreadable".into()));
      }
      self.inner.get(key)
    }

    fn put(&self, key: &CacheKey, payload: &[u8], written_at: DateTime<Utc>) -> Result<(), CacheError> {
      if self.writes {
        return Err(CacheError::Storage("disk full".into()));
      }
      self.inner.put(key, payload, written_at)
    }

    fn purge(&self) -> Result<usize, CacheError> {
      self.inner.purge()
    }
  }

  #[tokio::test]
  async fn test_fresh_entry_skips_fetch() {
    let (_, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);

    let first = layer
      .resolve(&lambda_key(), ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();
    let second = layer
      .resolve(&lambda_key(), ttl, counting(&counter, names(&["f2"])))
      .await
      .unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, names(&["f1"]));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_lambda_refresh_scenario() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);
    let key = lambda_key();

    let result = layer
      .resolve(&key, ttl, counting(&counter, names(&["f1", "f2"])))
      .await
      .unwrap();
    assert_eq!(result.data, names(&["f1", "f2"]));

    now.store(100, Ordering::SeqCst);
    let result = layer
      .resolve(&key, ttl, counting(&counter, names(&["unused"])))
      .await
      .unwrap();
    assert_eq!(result.data, names(&["f1", "f2"]));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    now.store(400, Ordering::SeqCst);
    let result = layer
      .resolve(&key, ttl, counting(&counter, names(&["f1", "f3"])))
      .await
      .unwrap();
    assert_eq!(result.data, names(&["f1", "f3"]));
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    let (data, written_at) = stored(&layer, &key).unwrap();
    assert_eq!(data, names(&["f1", "f3"]));
    assert_eq!(written_at, Utc.timestamp_opt(400, 0).unwrap());
  }

  #[tokio::test]
  async fn test_stale_entry_served_when_refresh_fails() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);
    let key = lambda_key();

    layer
      .resolve(&key, ttl, counting(&counter, names(&["f1", "f2"])))
      .await
      .unwrap();

    now.store(400, Ordering::SeqCst);
    let result = layer.resolve(&key, ttl, failing(&counter)).await.unwrap();

    assert_eq!(result.data, names(&["f1", "f2"]));
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.cached_at, Some(Utc.timestamp_opt(0, 0).unwrap()));
    assert!(matches!(result.warning, Some(CacheError::Fetch(_))));

    // The stale entry is left untouched
    let (_, written_at) = stored(&layer, &key).unwrap();
    assert_eq!(written_at, Utc.timestamp_opt(0, 0).unwrap());
  }

  #[tokio::test]
  async fn test_cold_start_failure_is_surfaced() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();

    let result = layer
      .resolve(&key, Duration::seconds(300), failing(&counter))
      .await;

    assert!(matches!(result, Err(CacheError::Fetch(_))));
    assert!(stored(&layer, &key).is_none());
  }

  #[tokio::test]
  async fn test_slow_fetch_times_out_to_stale() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap())
      .with_clock(clock)
      .with_fetch_timeout(std::time::Duration::from_millis(20));
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);
    let key = lambda_key();

    layer
      .resolve(&key, ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    now.store(1_000, Ordering::SeqCst);
    let result = layer
      .resolve(&key, ttl, || async {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(names(&["never"]))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, names(&["f1"]));
    assert!(matches!(result.warning, Some(CacheError::Timeout(_))));
  }

  #[tokio::test]
  async fn test_slow_fetch_without_entry_times_out() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap())
      .with_fetch_timeout(std::time::Duration::from_millis(20));

    let result = layer
      .resolve(&lambda_key(), Duration::seconds(300), || async {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok::<_, color_eyre::Report>(names(&["never"]))
      })
      .await;

    assert!(matches!(result, Err(CacheError::Timeout(_))));
  }

  #[tokio::test]
  async fn test_force_refresh_ignores_fresh_entry() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);
    let key = lambda_key();

    layer
      .resolve(&key, ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    now.store(10, Ordering::SeqCst);
    let forced = layer.clone().with_force_refresh(true);
    let result = forced
      .resolve(&key, ttl, counting(&counter, names(&["f2"])))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, names(&["f2"]));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_force_refresh_in_same_tick_still_fetches() {
    let (_, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);
    let key = lambda_key();

    layer
      .resolve(&key, ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    let forced = layer.clone().with_force_refresh(true);
    let result = forced
      .resolve(&key, ttl, counting(&counter, names(&["f2"])))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, names(&["f2"]));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_force_refresh_failure_falls_back() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);
    let key = lambda_key();

    layer
      .resolve(&key, ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    now.store(10, Ordering::SeqCst);
    let forced = layer.clone().with_force_refresh(true);
    let result = forced.resolve(&key, ttl, failing(&counter)).await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, names(&["f1"]));
  }

  #[tokio::test]
  async fn test_concurrent_callers_share_one_fetch() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    let ttl = Duration::seconds(300);

    let slow = |items: Vec<String>| {
      let counter = Arc::clone(&counter);
      move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok::<_, color_eyre::Report>(items)
      }
    };

    let (a, b) = tokio::join!(
      layer.resolve(&key, ttl, slow(names(&["f1", "f2"]))),
      layer.resolve(&key, ttl, slow(names(&["other"]))),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(a.data, names(&["f1", "f2"]));
    assert_eq!(b.data, names(&["f1", "f2"]));
    assert_eq!(layer.in_flight_len(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_forced_callers_share_one_fetch() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_force_refresh(true);
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    let ttl = Duration::seconds(300);

    let slow = || {
      let counter = Arc::clone(&counter);
      move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok::<_, color_eyre::Report>(names(&["f1"]))
      }
    };

    let (a, b) = tokio::join!(layer.resolve(&key, ttl, slow()), layer.resolve(&key, ttl, slow()));

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_waiter_shares_failed_refresh() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    let ttl = Duration::seconds(300);

    let first = Arc::clone(&counter);
    let (a, b) = tokio::join!(
      layer.resolve(&key, ttl, || async move {
        first.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        Err::<Vec<String>, _>(eyre!("throttled"))
      }),
      layer.resolve(&key, ttl, counting(&counter, names(&["f1"]))),
    );

    assert!(matches!(a, Err(CacheError::Fetch(_))));
    match b {
      Err(CacheError::Fetch(report)) => assert!(report.to_string().contains("throttled")),
      other => panic!("expected shared fetch failure, got {:?}", other.map(|r| r.data)),
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(layer.in_flight_len(), 0);
  }

  #[tokio::test]
  async fn test_waiters_share_one_timeout() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap())
      .with_fetch_timeout(std::time::Duration::from_millis(100));
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    let ttl = Duration::seconds(300);

    let hanging = || {
      let counter = Arc::clone(&counter);
      move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok::<_, color_eyre::Report>(names(&["never"]))
      }
    };

    let started = std::time::Instant::now();
    let (a, b, c) = tokio::join!(
      layer.resolve(&key, ttl, hanging()),
      layer.resolve(&key, ttl, hanging()),
      layer.resolve(&key, ttl, hanging()),
    );

    assert!(matches!(a, Err(CacheError::Timeout(_))));
    assert!(matches!(b, Err(CacheError::Timeout(_))));
    assert!(matches!(c, Err(CacheError::Timeout(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < std::time::Duration::from_millis(190));
  }

  #[tokio::test]
  async fn test_waiter_serves_stale_after_shared_failure() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    let ttl = Duration::seconds(300);

    layer
      .resolve(&key, ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();
    now.store(400, Ordering::SeqCst);

    let first = Arc::clone(&counter);
    let (a, b) = tokio::join!(
      layer.resolve(&key, ttl, || async move {
        first.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        Err::<Vec<String>, _>(eyre!("throttled"))
      }),
      layer.resolve(&key, ttl, counting(&counter, names(&["f2"]))),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.source, CacheSource::Offline);
    assert_eq!(b.source, CacheSource::Offline);
    assert_eq!(b.data, names(&["f1"]));
    assert!(matches!(b.warning, Some(CacheError::Fetch(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_failure_not_shared_with_later_caller() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    let ttl = Duration::seconds(300);

    assert!(layer.resolve(&key, ttl, failing(&counter)).await.is_err());
    let result = layer
      .resolve(&key, ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_different_keys_fetch_in_parallel() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let ttl = Duration::seconds(300);
    let east = compose_key("lambda", &["us-east-1"]);
    let west = compose_key("lambda", &["us-west-2"]);

    let started = std::time::Instant::now();
    let slow = |item: &'static str| {
      move || async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok::<_, color_eyre::Report>(names(&[item]))
      }
    };
    let (a, b) = tokio::join!(
      layer.resolve(&east, ttl, slow("east")),
      layer.resolve(&west, ttl, slow("west")),
    );

    assert_eq!(a.unwrap().data, names(&["east"]));
    assert_eq!(b.unwrap().data, names(&["west"]));
    assert!(started.elapsed() < std::time::Duration::from_millis(190));
  }

  #[tokio::test]
  async fn test_corrupt_entry_is_refetched() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    layer.storage().put(&key, b"{not json", Utc::now()).unwrap();

    let result = layer
      .resolve(&key, Duration::seconds(300), counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(stored(&layer, &key).unwrap().0, names(&["f1"]));
  }

  #[tokio::test]
  async fn test_corrupt_entry_is_not_a_fallback() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();
    layer.storage().put(&key, b"\xff\xfe", Utc::now()).unwrap();

    let result = layer
      .resolve(&key, Duration::seconds(300), failing(&counter))
      .await;

    assert!(matches!(result, Err(CacheError::Fetch(_))));
  }

  #[tokio::test]
  async fn test_write_failure_still_returns_data() {
    let layer = CacheLayer::new(BrokenStorage {
      reads: false,
      writes: true,
      inner: SqliteStorage::in_memory().unwrap(),
    });
    let counter = Arc::new(AtomicU32::new(0));
    let key = lambda_key();

    let result = layer
      .resolve(&key, Duration::seconds(300), counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, names(&["f1"]));
    assert_eq!(layer.storage().inner.get(&key).unwrap(), None);
  }

  #[tokio::test]
  async fn test_read_failure_counts_as_absent() {
    let layer = CacheLayer::new(BrokenStorage {
      reads: true,
      writes: false,
      inner: SqliteStorage::in_memory().unwrap(),
    });
    let counter = Arc::new(AtomicU32::new(0));

    let result = layer
      .resolve(&lambda_key(), Duration::seconds(300), counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_noop_storage_always_fetches() {
    let layer = CacheLayer::new(NoopStorage);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);

    layer
      .resolve(&lambda_key(), ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();
    layer
      .resolve(&lambda_key(), ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_purged_store_reads_as_absent() {
    let (_, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let ttl = Duration::seconds(300);

    layer
      .resolve(&lambda_key(), ttl, counting(&counter, names(&["f1"])))
      .await
      .unwrap();
    layer.storage().purge().unwrap();

    let result = layer.resolve(&lambda_key(), ttl, failing(&counter)).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_load_collection_failure_is_empty() {
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let counter = Arc::new(AtomicU32::new(0));

    let loaded = layer
      .load_collection("lambda_functions", &["default", "us-east-1"], failing(&counter))
      .await;

    assert!(loaded.items.is_empty());
    assert!(loaded.is_failure());
    assert!(loaded.error.is_some());
  }

  #[tokio::test]
  async fn test_load_collection_uses_kind_ttl() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap())
      .with_clock(clock)
      .with_stale_time(Duration::seconds(60))
      .with_ttl("route53_hosted_zones", Duration::seconds(3600));
    let counter = Arc::new(AtomicU32::new(0));
    let dims: [&str; 1] = ["default"];

    layer
      .load_collection("route53_hosted_zones", &dims, counting(&counter, names(&["z1"])))
      .await;
    layer
      .load_collection("lambda_functions", &dims, counting(&counter, names(&["f1"])))
      .await;

    now.store(600, Ordering::SeqCst);
    let zones = layer
      .load_collection("route53_hosted_zones", &dims, counting(&counter, names(&["z2"])))
      .await;
    let functions = layer
      .load_collection("lambda_functions", &dims, counting(&counter, names(&["f2"])))
      .await;

    assert_eq!(zones.items, names(&["z1"]));
    assert_eq!(functions.items, names(&["f2"]));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_load_collection_offline_keeps_warning() {
    let (now, clock) = manual_clock(0);
    let layer = CacheLayer::new(SqliteStorage::in_memory().unwrap()).with_clock(clock);
    let counter = Arc::new(AtomicU32::new(0));
    let dims: [&str; 2] = ["default", "us-east-1"];

    layer
      .load_collection("lambda_functions", &dims, counting(&counter, names(&["f1"])))
      .await;
    now.store(10_000, Ordering::SeqCst);
    let loaded = layer
      .load_collection("lambda_functions", &dims, failing(&counter))
      .await;

    assert!(loaded.is_offline());
    assert!(!loaded.is_failure());
    assert_eq!(loaded.items, names(&["f1"]));
    assert!(loaded.error.is_some());
  }
}
