use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  /// Override for the offline database location
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the backend (e.g., "https://project.supabase.co")
  pub url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Sync automatically when connectivity comes back
  #[serde(default = "default_true")]
  pub auto_sync: bool,
  /// Polling interval for periodic sync while online
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// Age after which cached data is considered stale
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  /// Actively probe the remote for connectivity (disabled when unset)
  pub probe_interval_secs: Option<u64>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      auto_sync: true,
      interval_secs: default_interval_secs(),
      stale_time_secs: default_stale_time_secs(),
      probe_interval_secs: None,
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }

  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }

  pub fn probe_interval(&self) -> Option<Duration> {
    self.probe_interval_secs.map(Duration::from_secs)
  }
}

fn default_true() -> bool {
  true
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_interval_secs() -> u64 {
  30
}

fn default_stale_time_secs() -> u64 {
  5 * 60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./farmsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/farmsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/farmsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("farmsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("farmsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks FARMSYNC_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("FARMSYNC_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("API key not found. Set FARMSYNC_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }
}
