//! Typed cache keys for farm data.

use sha2::{Digest, Sha256};

use crate::offline::QueryKey;

/// Query key types for farm backend reads.
#[derive(Clone, Debug)]
pub enum FarmQueryKey {
  /// All plots mapped on a farm
  Plots { farm_id: String },
  /// A single plot
  Plot { id: String },
  /// Recent posts in a clan
  ClanFeed { clan_id: String },
  /// XP leaderboard for a clan
  Leaderboard { clan_id: String },
  /// Weather advisory for a location
  Weather { lat: f64, lon: f64 },
  /// Pest reports for a plot
  PestReports { plot_id: String },
  /// XP progress for a player
  Progress { user_id: String },
}

impl FarmQueryKey {
  fn namespace(&self) -> &'static str {
    match self {
      Self::Plots { .. } | Self::Plot { .. } => "plots",
      Self::ClanFeed { .. } | Self::Leaderboard { .. } => "clan",
      Self::Weather { .. } => "weather",
      Self::PestReports { .. } => "pests",
      Self::Progress { .. } => "progress",
    }
  }

  fn hash_input(&self) -> String {
    match self {
      Self::Plots { farm_id } => format!("plots:{}", normalize_id(farm_id)),
      Self::Plot { id } => format!("plot:{}", normalize_id(id)),
      Self::ClanFeed { clan_id } => format!("clan_feed:{}", normalize_id(clan_id)),
      Self::Leaderboard { clan_id } => format!("leaderboard:{}", normalize_id(clan_id)),
      // Two decimals is roughly 1km, close enough for an advisory
      Self::Weather { lat, lon } => format!("weather:{:.2}:{:.2}", lat, lon),
      Self::PestReports { plot_id } => format!("pest_reports:{}", normalize_id(plot_id)),
      Self::Progress { user_id } => format!("progress:{}", normalize_id(user_id)),
    }
  }
}

impl QueryKey for FarmQueryKey {
  fn cache_key(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.hash_input().as_bytes());
    let result = hasher.finalize();
    format!("{}:{}", self.namespace(), hex::encode(result))
  }

  fn description(&self) -> String {
    match self {
      Self::Plots { farm_id } => format!("plots on farm {}", farm_id),
      Self::Plot { id } => format!("plot {}", id),
      Self::ClanFeed { clan_id } => format!("clan {} feed", clan_id),
      Self::Leaderboard { clan_id } => format!("clan {} leaderboard", clan_id),
      Self::Weather { lat, lon } => format!("weather at {:.2},{:.2}", lat, lon),
      Self::PestReports { plot_id } => format!("pest reports for plot {}", plot_id),
      Self::Progress { user_id } => format!("progress for {}", user_id),
    }
  }
}

/// Ids are compared case-insensitively and without surrounding whitespace.
fn normalize_id(id: &str) -> String {
  id.trim().to_lowercase()
}
