//! Connectivity tracking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::traits::Remote;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Listeners {
  next_id: AtomicU64,
  callbacks: Mutex<BTreeMap<u64, Listener>>,
}

/// Single source of truth for online/offline state.
///
/// Listeners are edge-triggered: each registered callback runs exactly once
/// per transition and never for a repeated report of the same state.
pub struct NetworkMonitor {
  online: AtomicBool,
  listeners: Arc<Listeners>,
}

impl NetworkMonitor {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
      listeners: Arc::new(Listeners::default()),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Record the current connectivity. Returns `true` if this was a transition.
  pub fn set_online(&self, online: bool) -> bool {
    if self.online.swap(online, Ordering::SeqCst) == online {
      return false;
    }

    if online {
      tracing::info!("Network is back online");
    } else {
      tracing::warn!("Network went offline");
    }

    // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
    let callbacks: Vec<Listener> = match self.listeners.callbacks.lock() {
      Ok(callbacks) => callbacks.values().cloned().collect(),
      Err(e) => {
        tracing::error!("Network listeners lock poisoned: {}", e);
        return true;
      }
    };
    for callback in callbacks {
      callback(online);
    }

    true
  }

  /// Register a callback for connectivity transitions.
  ///
  /// The callback stays registered until the returned subscription is
  /// dropped or `unsubscribe` is called.
  pub fn on_status_change<F>(&self, callback: F) -> Subscription
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut callbacks) = self.listeners.callbacks.lock() {
      callbacks.insert(id, Arc::new(callback));
    }

    Subscription {
      id,
      listeners: Arc::downgrade(&self.listeners),
    }
  }

  /// Ping the remote and record the result.
  pub async fn probe(&self, remote: &dyn Remote) -> bool {
    let reachable = remote.ping().await;
    tracing::debug!(reachable, "Connectivity probe finished");
    self.set_online(reachable);
    reachable
  }

  #[cfg(test)]
  fn listener_count(&self) -> usize {
    self
      .listeners
      .callbacks
      .lock()
      .map(|c| c.len())
      .unwrap_or_default()
  }
}

impl std::fmt::Debug for NetworkMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NetworkMonitor")
      .field("online", &self.is_online())
      .finish_non_exhaustive()
  }
}

/// Handle for a registered connectivity listener.
#[must_use = "dropping a subscription unregisters the listener"]
pub struct Subscription {
  id: u64,
  listeners: Weak<Listeners>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    // Drop does the work
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(listeners) = self.listeners.upgrade() {
      if let Ok(mut callbacks) = listeners.callbacks.lock() {
        callbacks.remove(&self.id);
      }
    }
  }
}
