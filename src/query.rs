//! Offline-first query state for a single cache key.
//!
//! An `OfflineQuery<T>` wraps a loader that resolves data from the network or
//! the offline store, and exposes loading/success/error states to whoever
//! renders them. Results arrive over a channel and are applied by `poll`.
//!
//! # Example
//!
//! ```ignore
//! let remote = remote.clone();
//! let mut plots = service.query(
//!     FarmQueryKey::Plots { farm_id: farm.clone() },
//!     move || {
//!         let remote = remote.clone();
//!         let farm = farm.clone();
//!         async move { remote.list_plots(&farm).await }
//!     },
//!     QueryOptions::default().with_fallback(Vec::new()),
//! );
//!
//! plots.fetch();
//!
//! // In the event loop tick
//! if plots.poll() {
//!     // State changed, trigger re-render
//! }
//! ```
//!
//! Every load is tagged with a generation number. Only the result of the
//! most recently started load is applied; older results are dropped.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::offline::{CacheSource, Loaded, NetworkMonitor, Subscription};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently loading data
  Loading,
  /// Query resolved, from network, cache or fallback
  Success(T),
  /// Neither network, cache nor fallback could answer
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Per-query read options.
#[derive(Debug, Clone)]
pub struct QueryOptions<T> {
  /// Overrides the service-wide stale time
  pub stale_time: Option<Duration>,
  /// Served when neither network nor cache can answer
  pub fallback: Option<T>,
  /// Refetch stale data when connectivity comes back
  pub refetch_on_reconnect: bool,
}

impl<T> Default for QueryOptions<T> {
  fn default() -> Self {
    Self {
      stale_time: None,
      fallback: None,
      refetch_on_reconnect: true,
    }
  }
}

impl<T> QueryOptions<T> {
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn with_fallback(mut self, fallback: T) -> Self {
    self.fallback = Some(fallback);
    self
  }

  pub fn refetch_on_reconnect(mut self, enabled: bool) -> Self {
    self.refetch_on_reconnect = enabled;
    self
  }
}

type LoadResult<T> = Result<Loaded<T>, String>;

/// A loader receives `force = true` when cache freshness must be bypassed.
type LoaderFn<T> = Box<dyn Fn(bool) -> BoxFuture<'static, LoadResult<T>> + Send + Sync>;

/// Offline-first query with state management.
pub struct OfflineQuery<T> {
  state: QueryState<T>,
  source: Option<CacheSource>,
  loader: LoaderFn<T>,
  tx: mpsc::UnboundedSender<(u64, LoadResult<T>)>,
  rx: mpsc::UnboundedReceiver<(u64, LoadResult<T>)>,
  generation: u64,
  fetched_at: Option<DateTime<Utc>>,
  stale_time: Duration,
  refetch_on_reconnect: bool,
  reconnects: Option<mpsc::UnboundedReceiver<bool>>,
  _subscription: Option<Subscription>,
}

impl<T: Send + 'static> OfflineQuery<T> {
  /// Create a new query with the given loader.
  pub fn new<F, Fut>(loader: F) -> Self
  where
    F: Fn(bool) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult<T>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      state: QueryState::Idle,
      source: None,
      loader: Box::new(move |force| Box::pin(loader(force))),
      tx,
      rx,
      generation: 0,
      fetched_at: None,
      stale_time: Duration::from_secs(5 * 60),
      refetch_on_reconnect: false,
      reconnects: None,
      _subscription: None,
    }
  }

  /// Set the stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Refetch stale data whenever the monitor reports a reconnect.
  pub fn refetch_on_reconnect(mut self, monitor: &NetworkMonitor) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    self._subscription = Some(monitor.on_status_change(move |online| {
      let _ = tx.send(online);
    }));
    self.reconnects = Some(rx);
    self.refetch_on_reconnect = true;
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Where the current data came from.
  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Check if the data is stale (last network fetch older than stale_time).
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self.needs_revalidation(),
      _ => false,
    }
  }

  fn needs_revalidation(&self) -> bool {
    match self.fetched_at {
      Some(t) => (Utc::now() - t).to_std().map_or(false, |age| age > self.stale_time),
      None => true,
    }
  }

  /// Start loading if not already loading. Fresh cache is served as is.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start(false);
  }

  /// Force a network fetch, superseding any load in flight.
  pub fn refetch(&mut self) {
    self.start(true);
  }

  /// Apply results from finished loads and react to reconnects.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    while let Ok((generation, result)) = self.rx.try_recv() {
      if generation != self.generation {
        tracing::debug!(generation, latest = self.generation, "Dropping superseded load");
        continue;
      }
      match result {
        Ok(loaded) => {
          self.source = Some(loaded.source);
          if loaded.fetched_at.is_some() {
            self.fetched_at = loaded.fetched_at;
          }
          self.state = QueryState::Success(loaded.data);
        }
        Err(error) => {
          self.state = QueryState::Error(error);
        }
      }
      changed = true;
    }

    let mut reconnected = false;
    if let Some(reconnects) = &mut self.reconnects {
      while let Ok(online) = reconnects.try_recv() {
        reconnected |= online;
      }
    }
    if reconnected
      && self.refetch_on_reconnect
      && !self.state.is_loading()
      && self.needs_revalidation()
    {
      tracing::debug!("Reconnected with stale data, refetching");
      self.refetch();
      changed = true;
    }

    changed
  }

  fn start(&mut self, force: bool) {
    self.generation += 1;
    self.state = QueryState::Loading;

    let generation = self.generation;
    let tx = self.tx.clone();
    let future = (self.loader)(force);
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - the query may have been dropped
      let _ = tx.send((generation, result));
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for OfflineQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OfflineQuery")
      .field("state", &self.state)
      .field("source", &self.source)
      .field("generation", &self.generation)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}
