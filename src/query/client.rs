//! Keyed, request-deduplicating, revalidatable cache of remote resources.
//!
//! Inspired by TanStack Query. Components subscribe to a [`ResourceKey`] with
//! a fetcher; the first subscriber triggers the fetch, later ones attach to
//! the request already in flight or are served from cache while the data is
//! fresh. Writes go through [`MutationExecutor`](super::MutationExecutor),
//! which invalidates keys so active subscribers refetch.
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryClient::new(CacheConfig::default());
//! let api = transport.clone();
//! let mut projects = cache.subscribe("projects", move || {
//!     let api = api.clone();
//!     async move { api.send(ApiRequest::get("/projects")).await }
//! })?;
//!
//! // In event loop tick
//! if projects.poll() {
//!     render(projects.current());
//! }
//! ```
//!
//! All bookkeeping happens under one lock that is never held across an
//! `.await`, so state transitions between network suspension points are
//! atomic. Fetches run on spawned Tokio tasks. Outside a runtime nothing is
//! sent and the entry reports a `Request` error instead.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::key::{IntoResourceKey, KeyError, ResourceKey};
use super::registry::KeyRegistry;
use super::state::QueryResult;
use crate::transport::TransportError;

/// A factory for fetch futures. Called once per dispatched request.
pub type Fetcher =
  Arc<dyn Fn() -> BoxFuture<'static, Result<Value, TransportError>> + Send + Sync>;

/// The single in-flight request for a key, shared by everyone waiting on it.
type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, TransportError>>>;

/// Errors from one-shot reads through the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
  #[error(transparent)]
  Key(#[from] KeyError),
  #[error(transparent)]
  Transport(#[from] TransportError),
}

/// Cache timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  /// How long after a successful fetch data is served without refetching
  pub stale_time: Duration,
  /// How long an entry without subscribers is kept before eviction
  pub gc_time: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      gc_time: Duration::from_secs(300),
    }
  }
}

/// Handle identifying one subscriber of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct InFlight {
  seq: u64,
  result: SharedFetch,
}

struct Entry {
  /// Distinguishes this entry from an earlier one evicted under the same key
  epoch: u64,
  data: Option<Arc<Value>>,
  error: Option<TransportError>,
  fetched_at: Option<Instant>,
  updated_at: Option<DateTime<Utc>>,
  stale: bool,
  in_flight: Option<InFlight>,
  /// Invalidated while a request was in flight; refetch when it settles
  refetch_queued: bool,
  /// Sequence number of the last write applied to `data`/`error`
  last_write: u64,
  subscribers: HashSet<SubscriberId>,
  idle_generation: u64,
  fetcher: Fetcher,
  sender: watch::Sender<QueryResult>,
}

impl Entry {
  fn new(epoch: u64, fetcher: Fetcher) -> Self {
    let (sender, _) = watch::channel(QueryResult::default());
    Self {
      epoch,
      data: None,
      error: None,
      fetched_at: None,
      updated_at: None,
      stale: false,
      in_flight: None,
      refetch_queued: false,
      last_write: 0,
      subscribers: HashSet::new(),
      idle_generation: 0,
      fetcher,
      sender,
    }
  }

  fn snapshot(&self) -> QueryResult {
    let is_fetching = self.in_flight.is_some();
    QueryResult {
      data: self.data.clone(),
      is_loading: is_fetching && self.data.is_none(),
      is_fetching,
      is_error: self.error.is_some(),
      error: self.error.clone(),
      updated_at: self.updated_at,
    }
  }

  fn publish(&self) {
    self.sender.send_replace(self.snapshot());
  }

  fn is_fresh(&self, now: Instant, stale_time: Duration) -> bool {
    if self.stale || self.data.is_none() {
      return false;
    }
    self
      .fetched_at
      .map(|at| now.saturating_duration_since(at) < stale_time)
      .unwrap_or(false)
  }
}

#[derive(Default)]
struct CacheState {
  registry: KeyRegistry<Entry>,
  next_epoch: u64,
  next_subscriber: u64,
  next_seq: u64,
}

struct Inner {
  config: CacheConfig,
  state: Mutex<CacheState>,
}

/// Shared cache context. Clones refer to the same cache.
///
/// Build one per process (or per test) and pass it explicitly to whoever
/// reads or writes remote resources.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryClient")
      .field("config", &self.inner.config)
      .field("entries", &self.len())
      .finish()
  }
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new(CacheConfig::default())
  }
}

fn boxed_fetcher<F, Fut>(fetcher: F) -> Fetcher
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
{
  Arc::new(move || fetcher().boxed())
}

impl QueryClient {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        config,
        state: Mutex::new(CacheState::default()),
      }),
    }
  }

  pub fn config(&self) -> CacheConfig {
    self.inner.config
  }

  fn lock(&self) -> MutexGuard<'_, CacheState> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Subscribe to a key.
  ///
  /// Fetches when there is no fresh data and nothing in flight; otherwise
  /// attaches to the pending request or serves the cached payload. Stale data
  /// is returned immediately while the refetch runs in the background.
  /// The most recent subscriber's fetcher is used for later refetches.
  pub fn subscribe<K, F, Fut>(&self, key: K, fetcher: F) -> Result<Subscription, KeyError>
  where
    K: IntoResourceKey,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
  {
    let key = key.into_resource_key()?;
    let fetcher = boxed_fetcher(fetcher);
    let now = Instant::now();
    let stale_time = self.inner.config.stale_time;

    let mut guard = self.lock();
    let state = &mut *guard;

    state.next_subscriber += 1;
    let id = SubscriberId(state.next_subscriber);

    let next_epoch = &mut state.next_epoch;
    let entry = state.registry.get_or_insert_with(key.clone(), || {
      *next_epoch += 1;
      debug!(key = %key, "Created cache entry");
      Entry::new(*next_epoch, Arc::clone(&fetcher))
    });

    entry.fetcher = fetcher;
    entry.subscribers.insert(id);
    // Cancels any pending idle eviction.
    entry.idle_generation += 1;

    if entry.in_flight.is_some() {
      trace!(key = %key, "Attaching to in-flight request");
    } else if entry.is_fresh(now, stale_time) {
      trace!(key = %key, "Serving fresh data from cache");
    } else {
      state.next_seq += 1;
      self.dispatch(&key, entry, state.next_seq);
    }

    let receiver = entry.sender.subscribe();
    drop(guard);

    Ok(Subscription {
      client: self.clone(),
      key,
      id,
      receiver,
    })
  }

  /// Remove a subscriber. Returns false if it was not subscribed.
  ///
  /// When the last subscriber leaves, the entry is evicted after `gc_time`
  /// unless someone subscribes again in the meantime.
  pub fn unsubscribe(&self, key: &ResourceKey, id: SubscriberId) -> bool {
    let mut guard = self.lock();
    let Some(entry) = guard.registry.get_mut(key) else {
      return false;
    };
    if !entry.subscribers.remove(&id) {
      return false;
    }
    trace!(key = %key, remaining = entry.subscribers.len(), "Unsubscribed");

    if entry.subscribers.is_empty() && !self.schedule_eviction(key, entry) {
      guard.registry.remove(key);
      debug!(key = %key, "Evicted cache entry (no runtime for idle timer)");
    }
    true
  }

  /// Mark every entry in the family of `prefix` stale.
  ///
  /// Entries with subscribers refetch now (or right after their in-flight
  /// request settles); the rest refetch on their next subscription or
  /// `fetch_query`. A request still in flight settles stale either way.
  /// Returns the number of entries invalidated.
  pub fn invalidate_prefix(&self, prefix: &ResourceKey) -> usize {
    let mut guard = self.lock();
    let state = &mut *guard;

    let keys = state.registry.keys_with_prefix(prefix);
    for key in &keys {
      let Some(entry) = state.registry.get_mut(key) else {
        continue;
      };
      entry.stale = true;

      // The pending result predates this invalidation and must not count as fresh.
      if entry.in_flight.is_some() {
        entry.refetch_queued = true;
        debug!(key = %key, "Queued refetch behind in-flight request");
      } else if entry.subscribers.is_empty() {
        trace!(key = %key, "Marked stale");
      } else {
        state.next_seq += 1;
        self.dispatch(key, entry, state.next_seq);
      }
    }

    debug!(prefix = %prefix, count = keys.len(), "Invalidated");
    keys.len()
  }

  /// Normalize `key` and invalidate its family.
  pub fn invalidate(&self, key: impl IntoResourceKey) -> Result<usize, KeyError> {
    let prefix = key.into_resource_key()?;
    Ok(self.invalidate_prefix(&prefix))
  }

  /// Refetch a key now, or attach to its in-flight request.
  ///
  /// Returns false if the key has no entry.
  pub fn refetch(&self, key: &ResourceKey) -> bool {
    let mut guard = self.lock();
    let state = &mut *guard;
    let Some(entry) = state.registry.get_mut(key) else {
      return false;
    };
    if entry.in_flight.is_none() {
      state.next_seq += 1;
      self.dispatch(key, entry, state.next_seq);
    }
    true
  }

  /// Read through the cache once.
  ///
  /// Fresh data is returned without a network call; a request already in
  /// flight is awaited rather than duplicated.
  pub async fn fetch_query<K, F, Fut>(&self, key: K, fetcher: F) -> Result<Arc<Value>, QueryError>
  where
    K: IntoResourceKey,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
  {
    let key = key.into_resource_key()?;
    let fetcher = boxed_fetcher(fetcher);
    let now = Instant::now();
    let stale_time = self.inner.config.stale_time;

    let pending = {
      let mut guard = self.lock();
      let state = &mut *guard;

      let mut created = false;
      let next_epoch = &mut state.next_epoch;
      let entry = state.registry.get_or_insert_with(key.clone(), || {
        created = true;
        *next_epoch += 1;
        Entry::new(*next_epoch, Arc::clone(&fetcher))
      });

      if entry.is_fresh(now, stale_time) {
        if let Some(data) = &entry.data {
          trace!(key = %key, "Serving fresh data from cache");
          return Ok(Arc::clone(data));
        }
      }

      if entry.in_flight.is_some() {
        trace!(key = %key, "Attaching to in-flight request");
      } else {
        entry.fetcher = fetcher;
        state.next_seq += 1;
        self.dispatch(&key, entry, state.next_seq);
      }
      let pending = entry.in_flight.as_ref().map(|f| f.result.clone());

      // Nobody subscribed; let the entry age out like an abandoned one.
      if created {
        self.schedule_eviction(&key, entry);
      }
      pending
    };

    match pending {
      Some(request) => Ok(request.await?),
      None => Err(TransportError::Request(format!("fetch for {} not started (no Tokio runtime)", key)).into()),
    }
  }

  /// Current payload for a key, if any.
  pub fn get_query_data(&self, key: &ResourceKey) -> Option<Arc<Value>> {
    self.lock().registry.get(key).and_then(|e| e.data.clone())
  }

  /// Current snapshot for a key, if it has an entry.
  pub fn snapshot(&self, key: &ResourceKey) -> Option<QueryResult> {
    self.lock().registry.get(key).map(Entry::snapshot)
  }

  /// Replace the payload of an existing entry (e.g. with a mutation response).
  ///
  /// Any request dispatched before this write is discarded when it lands.
  /// Returns `Ok(false)` if the key has no entry.
  pub fn set_query_data(&self, key: impl IntoResourceKey, data: Value) -> Result<bool, KeyError> {
    let key = key.into_resource_key()?;
    let mut guard = self.lock();
    let state = &mut *guard;
    let Some(entry) = state.registry.get_mut(&key) else {
      return Ok(false);
    };

    state.next_seq += 1;
    entry.last_write = state.next_seq;
    entry.data = Some(Arc::new(data));
    entry.error = None;
    entry.stale = false;
    entry.fetched_at = Some(Instant::now());
    entry.updated_at = Some(Utc::now());
    entry.publish();
    debug!(key = %key, "Replaced cached data");
    Ok(true)
  }

  /// Drop every entry in the family of `prefix`. Subscribers of removed
  /// entries stop receiving updates.
  pub fn remove_queries(&self, prefix: &ResourceKey) -> usize {
    let mut guard = self.lock();
    let keys = guard.registry.keys_with_prefix(prefix);
    for key in &keys {
      guard.registry.remove(key);
    }
    keys.len()
  }

  /// Drop all entries.
  pub fn clear(&self) {
    self.lock().registry.clear();
  }

  pub fn len(&self) -> usize {
    self.lock().registry.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().registry.is_empty()
  }

  /// Start a request for `entry` and spawn the task that settles it.
  ///
  /// Without a Tokio runtime nothing is sent; the entry records the failure.
  fn dispatch(&self, key: &ResourceKey, entry: &mut Entry, seq: u64) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      warn!(key = %key, seq, "No Tokio runtime, fetch not started");
      entry.error = Some(TransportError::Request(
        "no Tokio runtime to run the fetch on".to_string(),
      ));
      entry.publish();
      return;
    };

    let fetcher = Arc::clone(&entry.fetcher);
    let request: SharedFetch = async move { fetcher().await.map(Arc::new) }
      .boxed()
      .shared();

    entry.in_flight = Some(InFlight {
      seq,
      result: request.clone(),
    });
    entry.publish();
    debug!(key = %key, seq, "Dispatching fetch");

    let client = self.clone();
    let key = key.clone();
    let epoch = entry.epoch;
    let driver = request.clone();
    runtime.spawn(async move {
      let outcome = driver.await;
      client.settle(&key, epoch, seq, outcome);
    });
  }

  fn settle(
    &self,
    key: &ResourceKey,
    epoch: u64,
    seq: u64,
    outcome: Result<Arc<Value>, TransportError>,
  ) {
    let mut guard = self.lock();
    let state = &mut *guard;

    let Some(entry) = state.registry.get_mut(key).filter(|e| e.epoch == epoch) else {
      debug!(key = %key, seq, "Discarding result for evicted entry");
      return;
    };

    if entry.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
      entry.in_flight = None;
    }

    if seq < entry.last_write {
      debug!(key = %key, seq, last_write = entry.last_write, "Discarding out-of-order completion");
    } else {
      entry.last_write = seq;
      match outcome {
        Ok(data) => {
          entry.data = Some(data);
          entry.error = None;
          entry.stale = false;
          entry.fetched_at = Some(Instant::now());
          entry.updated_at = Some(Utc::now());
          debug!(key = %key, seq, "Fetch succeeded");
        }
        Err(error) => {
          warn!(key = %key, seq, %error, "Fetch failed");
          entry.error = Some(error);
        }
      }
    }

    if entry.refetch_queued {
      entry.refetch_queued = false;
      entry.stale = true;
      if !entry.subscribers.is_empty() && entry.in_flight.is_none() {
        state.next_seq += 1;
        self.dispatch(key, entry, state.next_seq);
        return;
      }
    }

    entry.publish();
  }

  /// Start the idle timer. Returns false if there is no runtime to run it on.
  fn schedule_eviction(&self, key: &ResourceKey, entry: &mut Entry) -> bool {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      return false;
    };

    entry.idle_generation += 1;
    let generation = entry.idle_generation;
    let epoch = entry.epoch;
    let gc_time = self.inner.config.gc_time;
    let inner = Arc::downgrade(&self.inner);
    let key = key.clone();

    runtime.spawn(async move {
      tokio::time::sleep(gc_time).await;
      if let Some(inner) = inner.upgrade() {
        QueryClient { inner }.evict_if_idle(&key, epoch, generation);
      }
    });
    true
  }

  fn evict_if_idle(&self, key: &ResourceKey, epoch: u64, generation: u64) {
    let mut guard = self.lock();
    let idle = guard.registry.get(key).is_some_and(|e| {
      e.epoch == epoch && e.idle_generation == generation && e.subscribers.is_empty()
    });
    if idle {
      guard.registry.remove(key);
      debug!(key = %key, "Evicted idle cache entry");
    }
  }
}

/// A live view of one cache entry.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
  client: QueryClient,
  key: ResourceKey,
  id: SubscriberId,
  receiver: watch::Receiver<QueryResult>,
}

impl Subscription {
  pub fn key(&self) -> &ResourceKey {
    &self.key
  }

  pub fn id(&self) -> SubscriberId {
    self.id
  }

  /// Latest snapshot.
  pub fn current(&self) -> QueryResult {
    self.receiver.borrow().clone()
  }

  /// Returns `true` if the snapshot changed since the last check.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.receiver.has_changed() {
      Ok(true) => {
        self.receiver.borrow_and_update();
        true
      }
      _ => false,
    }
  }

  /// Wait for the next snapshot. `None` once the entry has been removed.
  pub async fn changed(&mut self) -> Option<QueryResult> {
    self.receiver.changed().await.ok()?;
    Some(self.receiver.borrow_and_update().clone())
  }

  /// Wait until no fetch is in flight and return that snapshot.
  pub async fn settled(&mut self) -> QueryResult {
    let settled = self
      .receiver
      .wait_for(|state| !state.is_fetching)
      .await
      .map(|state| state.clone());
    settled.unwrap_or_else(|_| self.current())
  }

  /// Force a refetch (attaches if one is already in flight).
  pub fn refetch(&self) -> bool {
    self.client.refetch(&self.key)
  }

  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.client.unsubscribe(&self.key, self.id);
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish_non_exhaustive()
  }
}
