//! Command-line handlers.

use chrono::{Local, TimeZone};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::farm::{EntityKind, FarmQueryKey, Record, RestRemote};
use crate::offline::{
  ActionType, NetworkMonitor, NewAction, OfflineService, OfflineStatus, QueuedAction, Remote,
  SqliteStore, SyncSettings, SyncStatus,
};
use crate::query::QueryOptions;

/// Probe period for `watch` when the config sets none
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Show connectivity, queue and cache status
  Status,
  /// Deliver queued actions now
  Sync,
  /// List queued actions
  Queue,
  /// Queue a mutation for later delivery
  Enqueue {
    /// create, update or delete
    action: ActionType,
    /// plot, clan_post, pest_report or progress
    entity: EntityKind,
    /// Entity id
    id: String,
    /// Entity body as JSON (create and update)
    #[arg(long)]
    data: Option<String>,
  },
  /// Print a cached payload
  Get { key: String },
  /// Cache a JSON payload
  Put { key: String, json: String },
  /// Remove a cached key and its namespace, or all cached data
  Clear { key: Option<String> },
  /// Remove cached data, queued actions and sync history
  Reset,
  /// List plots on a farm, offline-first
  Plots {
    farm_id: String,
    /// Bypass fresh cache
    #[arg(long)]
    refresh: bool,
  },
  /// Keep syncing in the background until Ctrl-C
  Watch,
}

impl Command {
  /// Whether the command talks to the backend. The rest only touch local data.
  fn needs_connectivity(&self) -> bool {
    matches!(
      self,
      Command::Status | Command::Sync | Command::Plots { .. } | Command::Watch
    )
  }
}

/// Stand-in backend for commands that only touch local data.
struct LocalOnly;

impl Remote for LocalOnly {
  fn deliver<'a>(&'a self, action: &'a QueuedAction) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move { Err(eyre!("No backend available to deliver {}", action)) })
  }

  fn ping(&self) -> BoxFuture<'_, bool> {
    Box::pin(async { false })
  }
}

/// The REST backend, built only when the command needs one so local
/// commands work without an API key.
fn remote_for(command: &Command, config: &Config) -> Result<Option<Arc<RestRemote>>> {
  if command.needs_connectivity() {
    Ok(Some(Arc::new(RestRemote::new(config)?)))
  } else {
    Ok(None)
  }
}

pub async fn run(command: Command, config: &Config) -> Result<()> {
  let store = match &config.database {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  };
  let rest = remote_for(&command, config)?;
  let remote: Arc<dyn Remote> = match &rest {
    Some(rest) => rest.clone(),
    None => Arc::new(LocalOnly),
  };

  let mut settings = SyncSettings::from(&config.sync);
  if command == Command::Watch {
    settings.probe_interval.get_or_insert(DEFAULT_PROBE_INTERVAL);
  }

  let service = Arc::new(OfflineService::new(
    store,
    remote.clone(),
    NetworkMonitor::new(false),
    settings,
  ));

  if rest.is_some() {
    service.monitor().probe(remote.as_ref()).await;
  }

  match command {
    Command::Status => print_status(&service.status()?),
    Command::Sync => sync(&service).await?,
    Command::Queue => list_queue(&service)?,
    Command::Enqueue {
      action,
      entity,
      id,
      data,
    } => {
      let data = data
        .map(|json| -> Result<Record> {
          let body = serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON: {}", e))?;
          Record::from_body(entity, body).map_err(|e| eyre!("Invalid {} body: {}", entity, e))
        })
        .transpose()?;
      let queued = service.queue_action(NewAction {
        action,
        entity,
        entity_id: id,
        data,
      })?;
      println!("Queued #{}: {}", queued.id, queued);
    }
    Command::Get { key } => match service.get_data::<serde_json::Value>(&key)? {
      Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
      None => return Err(eyre!("Nothing cached under {}", key)),
    },
    Command::Put { key, json } => {
      let value: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON: {}", e))?;
      service.store_data(&key, &value)?;
      println!("Stored {}", key);
    }
    Command::Clear { key } => {
      service.clear_data(key.as_deref())?;
      match key {
        Some(key) => println!("Cleared {}", key),
        None => println!("Cleared all cached data"),
      }
    }
    Command::Reset => {
      service.clear_cache()?;
      println!("Offline store reset");
    }
    Command::Plots { farm_id, refresh } => {
      let rest = rest.ok_or_else(|| eyre!("No backend configured"))?;
      plots(&service, &rest, farm_id, refresh).await?
    }
    Command::Watch => watch(&service).await?,
  }

  Ok(())
}

async fn sync(service: &OfflineService<SqliteStore>) -> Result<()> {
  let report = service.sync_data().await?;
  match report.status {
    SyncStatus::SkippedOffline => println!("Offline, nothing synced"),
    SyncStatus::SkippedInFlight => println!("A sync is already running"),
    SyncStatus::Completed => {
      println!("Delivered {} action(s)", report.delivered);
      for error in &report.errors {
        println!("  ! {}", error);
      }
    }
  }
  Ok(())
}

fn list_queue(service: &OfflineService<SqliteStore>) -> Result<()> {
  let actions = service.queued_actions()?;
  if actions.is_empty() {
    println!("Queue is empty");
  }
  for action in actions {
    let retries = if action.retry_count > 0 {
      format!(" (retried {}x)", action.retry_count)
    } else {
      String::new()
    };
    println!(
      "#{} {} {}{}",
      action.id,
      format_time(action.timestamp),
      action,
      retries
    );
  }
  Ok(())
}

async fn plots(
  service: &OfflineService<SqliteStore>,
  remote: &RestRemote,
  farm_id: String,
  refresh: bool,
) -> Result<()> {
  let key = FarmQueryKey::Plots {
    farm_id: farm_id.clone(),
  };
  let loaded = service
    .load(
      &key,
      || remote.list_plots(&farm_id),
      &QueryOptions::default(),
      refresh,
    )
    .await?;

  println!("{} plot(s) on farm {} [{:?}]", loaded.data.len(), farm_id, loaded.source);
  for plot in loaded.data {
    println!(
      "  {:<12} {:<24} {:>8.2} ha  {}",
      plot.id,
      plot.name,
      plot.area_hectares,
      plot.crop.as_deref().unwrap_or("-")
    );
  }
  Ok(())
}

async fn watch(service: &Arc<OfflineService<SqliteStore>>) -> Result<()> {
  let _subscription = service.on_network_status_change(|online| {
    println!("{}", if online { "Back online" } else { "Offline" });
  });
  let worker = service.spawn_worker();

  print_status(&service.status()?);
  println!("Watching, press Ctrl-C to stop");

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
  worker.stop();

  print_status(&service.status()?);
  Ok(())
}

fn print_status(status: &OfflineStatus) {
  println!(
    "Network:   {}",
    if status.is_online { "online" } else { "offline" }
  );
  println!(
    "Last sync: {}",
    status
      .last_sync_time
      .map(format_time)
      .unwrap_or_else(|| "never".to_string())
  );
  println!("Queued:    {}", status.queued_actions);
  println!("Cache:     {}", format_bytes(status.cache_size));
  for error in &status.sync_errors {
    println!("  ! {}", error);
  }
}

fn format_time(millis: i64) -> String {
  Local
    .timestamp_millis_opt(millis)
    .single()
    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    .unwrap_or_else(|| millis.to_string())
}

fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{} B", bytes)
  } else {
    format!("{:.1} {}", value, UNITS[unit])
  }
}
