//! Offline store trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::action::{ActionType, NewAction, QueuedAction};
use super::traits::CacheEntry;
use crate::farm::{EntityKind, Record};

/// Trait for offline storage backends.
pub trait OfflineStore: Send + Sync {
  /// Write or overwrite a cached payload.
  fn store_data<T: Serialize>(&self, key: &str, data: &T) -> Result<()>;

  /// Get a cached payload with its write time. Staleness is not checked.
  fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>>;

  /// Get a cached payload. Staleness is not checked.
  fn get_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    Ok(self.get_entry(key)?.map(|entry| entry.data))
  }

  /// Remove one key and its namespace (`key:*`), or every cached payload.
  fn clear_data(&self, key: Option<&str>) -> Result<()>;

  /// Append a mutation to the queue.
  fn queue_action(&self, action: NewAction) -> Result<QueuedAction>;

  /// All queued mutations, oldest first.
  fn queued_actions(&self) -> Result<Vec<QueuedAction>>;

  /// Drop a delivered mutation.
  fn remove_action(&self, id: i64) -> Result<()>;

  /// Bump the retry count of a failed mutation, returning the new count.
  ///
  /// `None` when the mutation is no longer queued (e.g. after a reset).
  fn record_failure(&self, id: i64) -> Result<Option<u32>>;

  /// Epoch millis of the last completed sync pass.
  fn last_sync_time(&self) -> Result<Option<i64>>;

  fn set_last_sync_time(&self, millis: i64) -> Result<()>;

  /// Approximate bytes used by cached payloads and queued mutations.
  fn cache_size(&self) -> Result<u64>;

  /// Remove cached payloads, queued mutations and the sync time.
  fn clear_cache(&self) -> Result<()>;
}

/// SQLite-based offline storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for offline tables.
const OFFLINE_SCHEMA: &str = r#"
-- Cached reads (stores serialized JSON)
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    timestamp INTEGER NOT NULL
);

-- Pending mutations, FIFO by id
CREATE TABLE IF NOT EXISTS queued_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_type TEXT NOT NULL,
    entity TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data BLOB,
    timestamp INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sync_meta (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

const LAST_SYNC: &str = "last_sync";

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create offline store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open offline store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(OFFLINE_SCHEMA)
      .map_err(|e| eyre!("Failed to run offline store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("farmsync").join("offline.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl OfflineStore for SqliteStore {
  fn store_data<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
    let data = serde_json::to_vec(data).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (key, data, timestamp) VALUES (?, ?, ?)",
        params![key, data, Utc::now().timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    Ok(())
  }

  fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, i64)> = conn
      .query_row(
        "SELECT data, timestamp FROM cache_entries WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))?;

    match row {
      Some((data, timestamp)) => {
        let data: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize {}: {}", key, e))?;
        Ok(Some(CacheEntry { data, timestamp }))
      }
      None => Ok(None),
    }
  }

  fn clear_data(&self, key: Option<&str>) -> Result<()> {
    let conn = self.conn()?;

    match key {
      Some(key) => {
        // substr rather than LIKE: LIKE is case-insensitive and treats _ as a wildcard
        let namespace = format!("{}:", key);
        conn
          .execute(
            "DELETE FROM cache_entries WHERE key = ?1 OR substr(key, 1, ?2) = ?3",
            params![key, namespace.chars().count() as i64, namespace],
          )
          .map_err(|e| eyre!("Failed to clear {}: {}", key, e))?;
      }
      None => {
        conn
          .execute("DELETE FROM cache_entries", [])
          .map_err(|e| eyre!("Failed to clear cached data: {}", e))?;
      }
    }

    Ok(())
  }

  fn queue_action(&self, action: NewAction) -> Result<QueuedAction> {
    action.validate()?;

    let data = action
      .data
      .as_ref()
      .map(serde_json::to_vec)
      .transpose()
      .map_err(|e| eyre!("Failed to serialize action data: {}", e))?;
    let timestamp = Utc::now().timestamp_millis();

    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO queued_actions (action_type, entity, entity_id, data, timestamp, retry_count)
         VALUES (?, ?, ?, ?, ?, 0)",
        params![
          action.action.as_str(),
          action.entity.as_str(),
          action.entity_id,
          data,
          timestamp
        ],
      )
      .map_err(|e| eyre!("Failed to queue action: {}", e))?;

    Ok(QueuedAction {
      id: conn.last_insert_rowid(),
      action: action.action,
      entity: action.entity,
      entity_id: action.entity_id,
      data: action.data,
      timestamp,
      retry_count: 0,
    })
  }

  fn queued_actions(&self) -> Result<Vec<QueuedAction>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, action_type, entity, entity_id, data, timestamp, retry_count
         FROM queued_actions ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok(QueuedRow {
          id: row.get(0)?,
          action_type: row.get(1)?,
          entity: row.get(2)?,
          entity_id: row.get(3)?,
          data: row.get(4)?,
          timestamp: row.get(5)?,
          retry_count: row.get(6)?,
        })
      })
      .map_err(|e| eyre!("Failed to query queued actions: {}", e))?;

    let mut actions = Vec::new();
    for row in rows {
      let row = row.map_err(|e| eyre!("Failed to read queued action: {}", e))?;
      actions.push(row.into_action()?);
    }

    Ok(actions)
  }

  fn remove_action(&self, id: i64) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM queued_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove action {}: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64) -> Result<Option<u32>> {
    let conn = self.conn()?;

    conn
      .execute(
        "UPDATE queued_actions SET retry_count = retry_count + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to update action {}: {}", id, e))?;

    conn
      .query_row(
        "SELECT retry_count FROM queued_actions WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read retry count for action {}: {}", id, e))
  }

  fn last_sync_time(&self) -> Result<Option<i64>> {
    self
      .conn()?
      .query_row(
        "SELECT value FROM sync_meta WHERE name = ?",
        params![LAST_SYNC],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read last sync time: {}", e))
  }

  fn set_last_sync_time(&self, millis: i64) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO sync_meta (name, value) VALUES (?, ?)",
        params![LAST_SYNC, millis],
      )
      .map_err(|e| eyre!("Failed to record sync time: {}", e))?;
    Ok(())
  }

  fn cache_size(&self) -> Result<u64> {
    let conn = self.conn()?;

    let cached: i64 = conn
      .query_row(
        "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(data)), 0) FROM cache_entries",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to measure cache: {}", e))?;

    let queued: i64 = conn
      .query_row(
        "SELECT COALESCE(SUM(LENGTH(entity_id) + COALESCE(LENGTH(data), 0)), 0) FROM queued_actions",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to measure queue: {}", e))?;

    Ok((cached + queued).max(0) as u64)
  }

  fn clear_cache(&self) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to start reset: {}", e))?;

    for table in ["cache_entries", "queued_actions", "sync_meta"] {
      tx.execute(&format!("DELETE FROM {}", table), [])
        .map_err(|e| eyre!("Failed to clear {}: {}", table, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to clear offline store: {}", e))
  }
}

/// Raw queue row before decoding.
struct QueuedRow {
  id: i64,
  action_type: String,
  entity: String,
  entity_id: String,
  data: Option<Vec<u8>>,
  timestamp: i64,
  retry_count: u32,
}

impl QueuedRow {
  fn into_action(self) -> Result<QueuedAction> {
    let action: ActionType = self.action_type.parse().map_err(|e| eyre!("{}", e))?;
    let entity: EntityKind = self.entity.parse().map_err(|e| eyre!("{}", e))?;
    let data = self
      .data
      .map(|bytes| serde_json::from_slice::<Record>(&bytes))
      .transpose()
      .map_err(|e| eyre!("Failed to deserialize action {}: {}", self.id, e))?;

    Ok(QueuedAction {
      id: self.id,
      action,
      entity,
      entity_id: self.entity_id,
      data,
      timestamp: self.timestamp,
      retry_count: self.retry_count,
    })
  }
}
