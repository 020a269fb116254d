//! Core traits and types for the offline layer.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::Result;
use futures::future::BoxFuture;

use super::action::QueuedAction;

/// Keys for cached reads.
///
/// Implementors map a typed query onto the string key used by the store.
/// Keys of the form `namespace:rest` can be cleared together by namespace.
pub trait QueryKey {
  /// Storage key for this query
  fn cache_key(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;
}

impl QueryKey for str {
  fn cache_key(&self) -> String {
    self.to_string()
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

impl QueryKey for String {
  fn cache_key(&self) -> String {
    self.clone()
  }

  fn description(&self) -> String {
    self.clone()
  }
}

/// Remote counterpart that receives queued mutations.
pub trait Remote: Send + Sync {
  /// Deliver one queued action. An error leaves the action queued.
  fn deliver<'a>(&'a self, action: &'a QueuedAction) -> BoxFuture<'a, Result<()>>;

  /// Whether the remote is currently reachable.
  fn ping(&self) -> BoxFuture<'_, bool>;
}

/// A cached payload with its write time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub data: T,
  /// Epoch millis of the last write
  pub timestamp: i64,
}

impl<T> CacheEntry<T> {
  pub fn cached_at(&self) -> DateTime<Utc> {
    Utc
      .timestamp_millis_opt(self.timestamp)
      .single()
      // Unrepresentable timestamps read as the epoch, so they are always stale
      .unwrap_or_default()
  }

  pub fn is_stale(&self, stale_time: chrono::Duration) -> bool {
    Utc::now() - self.cached_at() > stale_time
  }
}

/// Indicates where loaded data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale and the network fetch failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Neither network nor cache could answer; caller default used
  Fallback,
}

/// Result of a read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was last fetched from the network
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> Loaded<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: Some(Utc::now()),
    }
  }

  pub fn from_cache(entry: CacheEntry<T>, source: CacheSource) -> Self {
    let fetched_at = Some(entry.cached_at());
    Self {
      data: entry.data,
      source,
      fetched_at,
    }
  }

  pub fn fallback(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      fetched_at: None,
    }
  }
}
