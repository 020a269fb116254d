//! Scripted remote for tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::action::QueuedAction;
use super::traits::Remote;

/// Remote that accepts everything except the entity ids it is told to reject.
pub struct MockRemote {
  reachable: AtomicBool,
  failing: Mutex<HashSet<String>>,
  delivered: Mutex<Vec<String>>,
  delay: Mutex<Duration>,
}

impl MockRemote {
  pub fn new() -> Self {
    Self {
      reachable: AtomicBool::new(true),
      failing: Mutex::new(HashSet::new()),
      delivered: Mutex::new(Vec::new()),
      delay: Mutex::new(Duration::ZERO),
    }
  }

  pub fn set_reachable(&self, reachable: bool) {
    self.reachable.store(reachable, Ordering::SeqCst);
  }

  pub fn fail_entity(&self, entity_id: &str) {
    self.failing.lock().unwrap().insert(entity_id.to_string());
  }

  pub fn heal_entity(&self, entity_id: &str) {
    self.failing.lock().unwrap().remove(entity_id);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  /// Delivered actions rendered as "ACTION entity id".
  pub fn delivered(&self) -> Vec<String> {
    self.delivered.lock().unwrap().clone()
  }
}

impl Remote for MockRemote {
  fn deliver<'a>(&'a self, action: &'a QueuedAction) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      let delay = *self.delay.lock().unwrap();
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      if self.failing.lock().unwrap().contains(&action.entity_id) {
        return Err(eyre!("remote rejected {}", action.entity_id));
      }
      self.delivered.lock().unwrap().push(action.to_string());
      Ok(())
    })
  }

  fn ping(&self) -> BoxFuture<'_, bool> {
    Box::pin(async move { self.reachable.load(Ordering::SeqCst) })
  }
}
