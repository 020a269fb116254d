//! Delivery of queued mutations.

use chrono::Utc;
use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};

use super::network::NetworkMonitor;
use super::storage::OfflineStore;
use super::traits::Remote;

/// How a sync request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
  /// The queue was walked
  Completed,
  /// Another pass was already running
  SkippedInFlight,
  /// The device is offline
  SkippedOffline,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub status: SyncStatus,
  /// Actions delivered and removed from the queue
  pub delivered: usize,
  /// One message per action that stayed queued
  pub errors: Vec<String>,
}

impl SyncReport {
  fn skipped(status: SyncStatus) -> Self {
    Self {
      status,
      delivered: 0,
      errors: Vec::new(),
    }
  }

  pub fn is_skipped(&self) -> bool {
    self.status != SyncStatus::Completed
  }
}

/// Drains the action queue, with at most one pass in flight.
#[derive(Debug, Default)]
pub struct SyncEngine {
  syncing: AtomicBool,
}

/// Clears the in-flight flag when the pass ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

impl SyncEngine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_syncing(&self) -> bool {
    self.syncing.load(Ordering::SeqCst)
  }

  /// Run one sync pass.
  ///
  /// Every queued action is attempted in order. Delivered actions are
  /// removed; failed ones stay queued with their retry count bumped and add
  /// one message to the report. A failure never stops the pass.
  pub async fn run<S>(
    &self,
    store: &S,
    remote: &dyn Remote,
    monitor: &NetworkMonitor,
  ) -> Result<SyncReport>
  where
    S: OfflineStore,
  {
    if !monitor.is_online() {
      return Ok(SyncReport::skipped(SyncStatus::SkippedOffline));
    }
    if self
      .syncing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      tracing::debug!("Sync already in progress");
      return Ok(SyncReport::skipped(SyncStatus::SkippedInFlight));
    }
    let _guard = InFlight(&self.syncing);

    let actions = store.queued_actions()?;
    let mut report = SyncReport {
      status: SyncStatus::Completed,
      delivered: 0,
      errors: Vec::new(),
    };

    if !actions.is_empty() {
      tracing::info!(pending = actions.len(), "Syncing queued actions");
    }

    for action in actions {
      match remote.deliver(&action).await {
        Ok(()) => {
          store.remove_action(action.id)?;
          report.delivered += 1;
        }
        Err(e) => {
          match store.record_failure(action.id)? {
            Some(retries) => tracing::warn!(retries, "Failed to sync {}: {}", action, e),
            // Cleared from the queue while the pass was running
            None => tracing::warn!("Failed to sync {} (no longer queued): {}", action, e),
          }
          report
            .errors
            .push(format!("Failed to sync {}: {}", action, e));
        }
      }
    }

    store.set_last_sync_time(Utc::now().timestamp_millis())?;

    if report.delivered > 0 || !report.errors.is_empty() {
      tracing::info!(
        delivered = report.delivered,
        failed = report.errors.len(),
        "Sync pass finished"
      );
    }

    Ok(report)
  }
}
