//! Offline service that composes the store, network monitor and sync engine.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use super::action::{NewAction, QueuedAction};
use super::network::{NetworkMonitor, Subscription};
use super::storage::OfflineStore;
use super::sync::{SyncEngine, SyncReport};
use super::traits::{CacheSource, Loaded, QueryKey, Remote};
use crate::config::SyncConfig;
use crate::query::{OfflineQuery, QueryOptions};

/// Delay between queueing an action and the sync it triggers.
const QUEUED_SYNC_DELAY: Duration = Duration::from_millis(100);

/// Floor for timer periods; tokio intervals cannot be zero.
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Timing and trigger settings for the service.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  pub auto_sync: bool,
  pub interval: Duration,
  pub stale_time: Duration,
  pub probe_interval: Option<Duration>,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self::from(&SyncConfig::default())
  }
}

impl From<&SyncConfig> for SyncSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      auto_sync: config.auto_sync,
      interval: config.interval(),
      stale_time: config.stale_time(),
      probe_interval: config.probe_interval(),
    }
  }
}

/// Snapshot of the offline layer for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineStatus {
  pub is_online: bool,
  pub is_syncing: bool,
  /// Epoch millis of the last completed sync pass
  pub last_sync_time: Option<i64>,
  pub queued_actions: usize,
  /// Approximate bytes held offline
  pub cache_size: u64,
  /// Errors from the last completed sync pass
  pub sync_errors: Vec<String>,
}

/// Offline-first data access for one application root.
///
/// Construct one per application and share it behind an `Arc`; queries and
/// the background worker hold clones of that `Arc`.
pub struct OfflineService<S: OfflineStore> {
  store: S,
  remote: Arc<dyn Remote>,
  monitor: NetworkMonitor,
  engine: SyncEngine,
  settings: SyncSettings,
  sync_errors: Mutex<Vec<String>>,
  sync_requested: Notify,
}

impl<S: OfflineStore> OfflineService<S> {
  pub fn new(
    store: S,
    remote: Arc<dyn Remote>,
    monitor: NetworkMonitor,
    settings: SyncSettings,
  ) -> Self {
    Self {
      store,
      remote,
      monitor,
      engine: SyncEngine::new(),
      settings,
      sync_errors: Mutex::new(Vec::new()),
      sync_requested: Notify::new(),
    }
  }

  pub fn monitor(&self) -> &NetworkMonitor {
    &self.monitor
  }

  pub fn settings(&self) -> &SyncSettings {
    &self.settings
  }

  pub fn is_online(&self) -> bool {
    self.monitor.is_online()
  }

  pub fn is_syncing(&self) -> bool {
    self.engine.is_syncing()
  }

  pub fn on_network_status_change<F>(&self, callback: F) -> Subscription
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    self.monitor.on_status_change(callback)
  }

  pub fn store_data<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
    logged("store data", self.store.store_data(key, data))
  }

  pub fn get_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    logged("read data", self.store.get_data(key))
  }

  pub fn clear_data(&self, key: Option<&str>) -> Result<()> {
    logged("clear data", self.store.clear_data(key))
  }

  /// Hard reset: cached data, queued actions, sync time and sync errors.
  pub fn clear_cache(&self) -> Result<()> {
    logged("clear cache", self.store.clear_cache())?;
    self.set_sync_errors(Vec::new())
  }

  pub fn last_sync_time(&self) -> Result<Option<i64>> {
    logged("read last sync time", self.store.last_sync_time())
  }

  pub fn queued_actions(&self) -> Result<Vec<QueuedAction>> {
    logged("read queued actions", self.store.queued_actions())
  }

  pub fn cache_size(&self) -> Result<u64> {
    logged("measure cache", self.store.cache_size())
  }

  pub fn sync_errors(&self) -> Result<Vec<String>> {
    self
      .sync_errors
      .lock()
      .map(|errors| errors.clone())
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_sync_errors(&self, errors: Vec<String>) -> Result<()> {
    *self
      .sync_errors
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = errors;
    Ok(())
  }

  /// Queue a mutation for delivery.
  ///
  /// While online this also asks the background worker to sync shortly.
  pub fn queue_action(&self, action: NewAction) -> Result<QueuedAction> {
    let queued = logged("queue action", self.store.queue_action(action))?;
    tracing::debug!(id = queued.id, "Queued {}", queued);

    if self.is_online() {
      self.sync_requested.notify_one();
    }

    Ok(queued)
  }

  /// Run one sync pass now.
  pub async fn sync_data(&self) -> Result<SyncReport> {
    let report = logged(
      "sync",
      self
        .engine
        .run(&self.store, self.remote.as_ref(), &self.monitor)
        .await,
    )?;

    if !report.is_skipped() {
      self.set_sync_errors(report.errors.clone())?;
    }

    Ok(report)
  }

  pub fn status(&self) -> Result<OfflineStatus> {
    Ok(OfflineStatus {
      is_online: self.is_online(),
      is_syncing: self.is_syncing(),
      last_sync_time: self.last_sync_time()?,
      queued_actions: self.queued_actions()?.len(),
      cache_size: self.cache_size()?,
      sync_errors: self.sync_errors()?,
    })
  }

  /// Resolve a read offline-first.
  ///
  /// 1. Fresh cache, or any cache while offline, is returned without fetching
  ///    (unless `force` is set)
  /// 2. Otherwise fetch from network and cache the result
  /// 3. On failure or when offline, fall back to stale cache, then to the
  ///    caller's fallback, then report the error
  pub async fn load<K, T, F, Fut>(
    &self,
    key: &K,
    fetcher: F,
    options: &QueryOptions<T>,
    force: bool,
  ) -> Result<Loaded<T>>
  where
    K: QueryKey + ?Sized,
    T: Serialize + DeserializeOwned + Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let cache_key = key.cache_key();
    let stale_time = chrono::Duration::from_std(options.stale_time.unwrap_or(self.settings.stale_time))
      .map_err(|e| eyre!("Invalid stale time: {}", e))?;
    let online = self.is_online();

    let cached = logged("read cache", self.store.get_entry::<T>(&cache_key))?;
    let cached = if force {
      cached
    } else {
      match cached {
        Some(entry) if !online => return Ok(Loaded::from_cache(entry, CacheSource::Offline)),
        Some(entry) if !entry.is_stale(stale_time) => {
          return Ok(Loaded::from_cache(entry, CacheSource::CacheFresh))
        }
        other => other,
      }
    };

    if !online {
      return match (cached, options.fallback.clone()) {
        (Some(entry), _) => Ok(Loaded::from_cache(entry, CacheSource::Offline)),
        (None, Some(fallback)) => Ok(Loaded::fallback(fallback)),
        (None, None) => Err(eyre!("No cached data available and device is offline")),
      };
    }

    match fetcher().await {
      Ok(data) => {
        if let Err(e) = self.store.store_data(&cache_key, &data) {
          tracing::error!("Failed to cache {}: {}", key.description(), e);
        }
        Ok(Loaded::from_network(data))
      }
      Err(e) => {
        tracing::warn!("Failed to fetch {}: {}", key.description(), e);
        match (cached, options.fallback.clone()) {
          (Some(entry), _) => Ok(Loaded::from_cache(entry, CacheSource::CacheStale)),
          (None, Some(fallback)) => Ok(Loaded::fallback(fallback)),
          (None, None) => Err(e),
        }
      }
    }
  }
}

impl<S: OfflineStore + 'static> OfflineService<S> {
  /// Build a query bound to this service.
  pub fn query<K, T, F, Fut>(
    self: &Arc<Self>,
    key: K,
    fetcher: F,
    options: QueryOptions<T>,
  ) -> OfflineQuery<T>
  where
    K: QueryKey + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let stale_time = options.stale_time.unwrap_or(self.settings.stale_time);
    let refetch_on_reconnect = options.refetch_on_reconnect;

    let service = Arc::clone(self);
    let key = Arc::new(key);
    let fetcher = Arc::new(fetcher);
    let options = Arc::new(options);

    let query = OfflineQuery::new(move |force| {
      let service = Arc::clone(&service);
      let key = Arc::clone(&key);
      let fetcher = Arc::clone(&fetcher);
      let options = Arc::clone(&options);
      async move {
        service
          .load(&*key, || (*fetcher)(), &options, force)
          .await
          .map_err(|e| format!("{:#}", e))
      }
    })
    .with_stale_time(stale_time);

    if refetch_on_reconnect {
      query.refetch_on_reconnect(&self.monitor)
    } else {
      query
    }
  }

  /// Start the background sync worker.
  ///
  /// The worker syncs on reconnect (when auto sync is on), on every interval
  /// tick while online, shortly after an action is queued, and probes the
  /// remote when a probe interval is configured. Dropping the handle stops it.
  pub fn spawn_worker(self: &Arc<Self>) -> SyncWorker {
    let (tx, mut transitions) = mpsc::unbounded_channel();
    let subscription = self.monitor.on_status_change(move |online| {
      let _ = tx.send(online);
    });

    let service = Arc::clone(self);
    let handle = tokio::spawn(async move {
      let _subscription = subscription;

      let mut interval = tokio::time::interval(service.settings.interval.max(MIN_PERIOD));
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      interval.tick().await;

      let mut probe = service
        .settings
        .probe_interval
        .map(|period| tokio::time::interval(period.max(MIN_PERIOD)));

      loop {
        tokio::select! {
          _ = interval.tick() => {
            if service.is_online() {
              service.run_sync("interval").await;
            }
          }
          Some(online) = transitions.recv() => {
            if online && service.settings.auto_sync {
              service.run_sync("reconnect").await;
            }
          }
          _ = service.sync_requested.notified() => {
            tokio::time::sleep(QUEUED_SYNC_DELAY).await;
            service.run_sync("queued action").await;
          }
          _ = next_probe(&mut probe) => {
            service.monitor.probe(service.remote.as_ref()).await;
          }
        }
      }
    });

    SyncWorker { handle }
  }

  async fn run_sync(&self, trigger: &str) {
    match self.sync_data().await {
      Ok(report) => {
        tracing::debug!(trigger, status = ?report.status, "Background sync finished");
      }
      Err(e) => {
        tracing::error!(trigger, "Background sync failed: {:#}", e);
      }
    }
  }
}

async fn next_probe(probe: &mut Option<Interval>) {
  match probe {
    Some(interval) => {
      interval.tick().await;
    }
    None => std::future::pending().await,
  }
}

/// Log a storage failure before handing it back to the caller.
fn logged<T>(operation: &str, result: Result<T>) -> Result<T> {
  result.map_err(|e| {
    tracing::error!("Failed to {}: {:#}", operation, e);
    e
  })
}

/// Handle to the background sync worker.
pub struct SyncWorker {
  handle: JoinHandle<()>,
}

impl SyncWorker {
  pub fn stop(self) {
    // Drop aborts the task
  }

  pub fn is_running(&self) -> bool {
    !self.handle.is_finished()
  }
}

impl Drop for SyncWorker {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::farm::{EntityKind, ProgressEvent, Record};
  use crate::offline::storage::SqliteStore;
  use crate::offline::sync::SyncStatus;
  use crate::offline::test_support::MockRemote;
  use crate::offline::CacheEntry;
  use crate::query::QueryState;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn service(online: bool) -> (Arc<OfflineService<SqliteStore>>, Arc<MockRemote>) {
    service_with(online, SyncSettings::default())
  }

  fn service_with(
    online: bool,
    settings: SyncSettings,
  ) -> (Arc<OfflineService<SqliteStore>>, Arc<MockRemote>) {
    let remote = Arc::new(MockRemote::new());
    let service = OfflineService::new(
      SqliteStore::open_in_memory().unwrap(),
      remote.clone(),
      NetworkMonitor::new(online),
      settings,
    );
    (Arc::new(service), remote)
  }

  fn xp(id: &str, points: u32) -> Record {
    Record::Progress(ProgressEvent {
      id: id.to_string(),
      user_id: "u1".to_string(),
      xp: points,
      reason: "watered crops".to_string(),
    })
  }

  fn counting_fetcher(
    value: Vec<u32>,
  ) -> (
    Arc<AtomicU32>,
    impl Fn() -> std::future::Ready<Result<Vec<u32>>> + Send + Sync + 'static,
  ) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    (calls, move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::future::ready(Ok(value.clone()))
    })
  }

  fn failing_fetch() -> std::future::Ready<Result<Vec<u32>>> {
    std::future::ready(Err(eyre!("connection refused")))
  }

  fn options() -> QueryOptions<Vec<u32>> {
    QueryOptions::default()
  }

  #[test]
  fn test_store_then_get_is_independent_of_connectivity() {
    let (service, _) = service(false);
    service.store_data("plots:f1", &vec![1, 2]).unwrap();
    assert_eq!(service.get_data::<Vec<i32>>("plots:f1").unwrap(), Some(vec![1, 2]));

    service.monitor().set_online(true);
    service.store_data("plots:f1", &vec![3]).unwrap();
    assert_eq!(service.get_data::<Vec<i32>>("plots:f1").unwrap(), Some(vec![3]));
  }

  #[tokio::test]
  async fn test_fresh_cache_skips_fetcher() {
    let (service, _) = service(true);
    service.store_data("k", &vec![9u32]).unwrap();
    let (calls, fetcher) = counting_fetcher(vec![1]);

    let loaded = service.load("k", fetcher, &options(), false).await.unwrap();

    assert_eq!(loaded.data, vec![9]);
    assert_eq!(loaded.source, CacheSource::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_stale_cache_is_refreshed_when_online() {
    let (service, _) = service(true);
    service.store_data("k", &vec![9u32]).unwrap();
    let (calls, fetcher) = counting_fetcher(vec![1]);
    let opts = options().with_stale_time(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let loaded = service.load("k", fetcher, &opts, false).await.unwrap();

    assert_eq!(loaded.data, vec![1]);
    assert_eq!(loaded.source, CacheSource::Network);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.get_data::<Vec<u32>>("k").unwrap(), Some(vec![1]));
  }

  #[tokio::test]
  async fn test_stale_cache_served_offline_without_fetch() {
    let (service, _) = service(false);
    service.store_data("k", &vec![9u32]).unwrap();
    let (calls, fetcher) = counting_fetcher(vec![1]);
    let opts = options().with_stale_time(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let loaded = service.load("k", fetcher, &opts, false).await.unwrap();

    assert_eq!(loaded.data, vec![9]);
    assert_eq!(loaded.source, CacheSource::Offline);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_failed_fetch_falls_back_to_stale_cache() {
    let (service, _) = service(true);
    service.store_data("k", &vec![9u32]).unwrap();
    let opts = options()
      .with_stale_time(Duration::ZERO)
      .with_fallback(vec![0]);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let loaded = service.load("k", failing_fetch, &opts, false).await.unwrap();

    assert_eq!(loaded.data, vec![9]);
    assert_eq!(loaded.source, CacheSource::CacheStale);
  }

  #[tokio::test]
  async fn test_failed_fetch_without_cache_uses_fallback() {
    let (service, _) = service(true);
    let opts = options().with_fallback(vec![0]);

    let loaded = service.load("k", failing_fetch, &opts, false).await.unwrap();

    assert_eq!(loaded.data, vec![0]);
    assert_eq!(loaded.source, CacheSource::Fallback);
    assert_eq!(service.get_data::<Vec<u32>>("k").unwrap(), None);
  }

  #[tokio::test]
  async fn test_failed_fetch_without_cache_or_fallback_errors() {
    let (service, _) = service(true);

    let err = service
      .load("k", failing_fetch, &options(), false)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("connection refused"));
  }

  #[tokio::test]
  async fn test_offline_without_cache_or_fallback_errors() {
    let (service, _) = service(false);
    let (calls, fetcher) = counting_fetcher(vec![1]);

    let err = service.load("k", fetcher, &options(), false).await.unwrap_err();

    assert!(err.to_string().contains("device is offline"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_forced_load_bypasses_fresh_cache() {
    let (service, _) = service(true);
    service.store_data("k", &vec![9u32]).unwrap();
    let (calls, fetcher) = counting_fetcher(vec![1]);

    let loaded = service.load("k", fetcher, &options(), true).await.unwrap();

    assert_eq!(loaded.data, vec![1]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_forced_load_offline_serves_cache() {
    let (service, _) = service(false);
    service.store_data("k", &vec![9u32]).unwrap();
    let (calls, fetcher) = counting_fetcher(vec![1]);

    let loaded = service.load("k", fetcher, &options(), true).await.unwrap();

    assert_eq!(loaded.data, vec![9]);
    assert_eq!(loaded.source, CacheSource::Offline);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_query_offline_without_data_is_error_state() {
    let (service, _) = service(false);
    let (calls, fetcher) = counting_fetcher(vec![1]);
    let mut query = service.query("plots:none".to_string(), fetcher, options());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    query.poll();

    assert!(query.is_error());
    assert!(query.error().unwrap().contains("device is offline"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_query_fresh_cache_never_fetches() {
    let (service, _) = service(true);
    service.store_data("plots:f1", &vec![4u32]).unwrap();
    let (calls, fetcher) = counting_fetcher(vec![1]);
    let mut query = service.query("plots:f1".to_string(), fetcher, options());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    query.poll();

    assert!(matches!(query.state(), QueryState::Success(data) if data == &vec![4]));
    assert_eq!(query.source(), Some(CacheSource::CacheFresh));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_query_refetches_after_reconnect() {
    let (service, _) = service(false);
    let (calls, fetcher) = counting_fetcher(vec![1]);
    let mut query = service.query(
      "weather:home".to_string(),
      fetcher,
      options().with_fallback(Vec::new()),
    );

    query.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    query.poll();
    assert_eq!(query.source(), Some(CacheSource::Fallback));

    service.monitor().set_online(true);
    assert!(query.poll());
    tokio::time::sleep(Duration::from_millis(20)).await;
    query.poll();

    assert_eq!(query.data(), Some(&vec![1]));
    assert_eq!(query.source(), Some(CacheSource::Network));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_queue_offline_then_sync_online() {
    let (service, remote) = service(false);

    service.queue_action(NewAction::create(xp("e1", 10))).unwrap();
    assert_eq!(service.status().unwrap().queued_actions, 1);

    service.monitor().set_online(true);
    let report = service.sync_data().await.unwrap();

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(service.status().unwrap().queued_actions, 0);
    assert_eq!(remote.delivered(), vec!["CREATE progress e1".to_string()]);
  }

  #[tokio::test]
  async fn test_partial_failure_scenario() {
    let (service, remote) = service(false);

    service.queue_action(NewAction::create(xp("e1", 10))).unwrap();
    service.queue_action(NewAction::update(xp("e2", 20))).unwrap();
    service
      .queue_action(NewAction::delete(EntityKind::Progress, "e3"))
      .unwrap();
    assert_eq!(service.status().unwrap().queued_actions, 3);

    service.monitor().set_online(true);
    remote.fail_entity("e2");
    service.sync_data().await.unwrap();

    let status = service.status().unwrap();
    assert_eq!(status.queued_actions, 1);
    assert_eq!(status.sync_errors.len(), 1);
    assert!(status.last_sync_time.is_some());
  }

  #[tokio::test]
  async fn test_skipped_sync_keeps_previous_errors() {
    let (service, remote) = service(true);
    service.queue_action(NewAction::create(xp("e1", 10))).unwrap();
    remote.fail_entity("e1");
    service.sync_data().await.unwrap();

    service.monitor().set_online(false);
    let report = service.sync_data().await.unwrap();

    assert_eq!(report.status, SyncStatus::SkippedOffline);
    assert_eq!(service.sync_errors().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_clear_cache_resets_everything() {
    let (service, remote) = service(true);
    service.store_data("plots:f1", &vec![1u32]).unwrap();
    service.queue_action(NewAction::create(xp("e1", 10))).unwrap();
    remote.fail_entity("e1");
    service.sync_data().await.unwrap();
    service.queue_action(NewAction::create(xp("e2", 5))).unwrap();

    service.clear_cache().unwrap();

    let status = service.status().unwrap();
    assert_eq!(status.queued_actions, 0);
    assert_eq!(status.cache_size, 0);
    assert_eq!(status.last_sync_time, None);
    assert!(status.sync_errors.is_empty());
  }

  #[tokio::test]
  async fn test_worker_syncs_shortly_after_queueing() {
    let settings = SyncSettings {
      interval: Duration::from_secs(3600),
      ..SyncSettings::default()
    };
    let (service, remote) = service_with(true, settings);
    let _worker = service.spawn_worker();

    service.queue_action(NewAction::create(xp("e1", 10))).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(remote.delivered(), vec!["CREATE progress e1".to_string()]);
    assert_eq!(service.status().unwrap().queued_actions, 0);
  }

  #[tokio::test]
  async fn test_worker_syncs_on_reconnect() {
    let settings = SyncSettings {
      interval: Duration::from_secs(3600),
      ..SyncSettings::default()
    };
    let (service, remote) = service_with(false, settings);
    let _worker = service.spawn_worker();

    service.queue_action(NewAction::create(xp("e1", 10))).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(remote.delivered().is_empty());

    service.monitor().set_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(service.status().unwrap().queued_actions, 0);
  }

  #[tokio::test]
  async fn test_worker_respects_auto_sync_off() {
    let settings = SyncSettings {
      auto_sync: false,
      interval: Duration::from_secs(3600),
      ..SyncSettings::default()
    };
    let (service, remote) = service_with(false, settings);
    let _worker = service.spawn_worker();

    service.queue_action(NewAction::create(xp("e1", 10))).unwrap();
    service.monitor().set_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(remote.delivered().is_empty());
    assert_eq!(service.status().unwrap().queued_actions, 1);
  }

  #[tokio::test]
  async fn test_worker_syncs_on_interval() {
    let settings = SyncSettings {
      interval: Duration::from_millis(50),
      ..SyncSettings::default()
    };
    let (service, remote) = service_with(true, settings);
    let _worker = service.spawn_worker();

    // Straight into the store, so no post-enqueue sync is requested
    service
      .store
      .queue_action(NewAction::create(xp("e1", 10)))
      .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(remote.delivered(), vec!["CREATE progress e1".to_string()]);
    assert_eq!(service.status().unwrap().queued_actions, 0);
    assert!(service.last_sync_time().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_worker_interval_idles_while_offline() {
    let settings = SyncSettings {
      interval: Duration::from_millis(50),
      ..SyncSettings::default()
    };
    let (service, remote) = service_with(false, settings);
    let _worker = service.spawn_worker();

    service
      .store
      .queue_action(NewAction::create(xp("e1", 10)))
      .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(remote.delivered().is_empty());
    assert_eq!(service.status().unwrap().queued_actions, 1);
    assert_eq!(service.last_sync_time().unwrap(), None);
  }

  #[tokio::test]
  async fn test_worker_probes_remote() {
    let settings = SyncSettings {
      interval: Duration::from_secs(3600),
      probe_interval: Some(Duration::from_millis(20)),
      ..SyncSettings::default()
    };
    let (service, remote) = service_with(true, settings);
    remote.set_reachable(false);
    let worker = service.spawn_worker();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!service.is_online());
    assert!(worker.is_running());

    worker.stop();
  }

  #[test]
  fn test_cache_entry_staleness() {
    let entry = CacheEntry {
      data: (),
      timestamp: chrono::Utc::now().timestamp_millis() - 10_000,
    };
    assert!(entry.is_stale(chrono::Duration::seconds(5)));
    assert!(!entry.is_stale(chrono::Duration::seconds(60)));
  }
}
