//! Offline-first data layer.
//!
//! This module provides the pieces the farm app uses to keep working without
//! a connection:
//! - A durable key/value cache with staleness, served when the network can't be
//! - A FIFO queue of pending mutations delivered when connectivity returns
//! - A network monitor that is the single source of truth for connectivity
//! - A sync engine that drains the queue with at most one pass in flight

mod action;
mod network;
mod service;
mod storage;
mod sync;
mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use action::{ActionType, NewAction, QueuedAction};
pub use network::{NetworkMonitor, Subscription};
pub use service::{OfflineService, OfflineStatus, SyncSettings, SyncWorker};
pub use storage::{OfflineStore, SqliteStore};
pub use sync::{SyncEngine, SyncReport, SyncStatus};
pub use traits::{CacheEntry, CacheSource, Loaded, QueryKey, Remote};
