use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point on a plot boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
  pub lat: f64,
  pub lng: f64,
}

/// A mapped field plot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
  pub id: String,
  pub farm_id: String,
  pub name: String,
  pub crop: Option<String>,
  pub area_hectares: f64,
  #[serde(default)]
  pub boundary: Vec<LatLng>,
}

/// A message in a clan feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClanPost {
  pub id: String,
  pub clan_id: String,
  pub author_id: String,
  pub body: String,
  pub created_at: String,
}

/// A pest sighting on a plot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PestReport {
  pub id: String,
  pub plot_id: String,
  pub pest: String,
  pub severity: u8, // 1 (minor) to 5 (outbreak)
  pub reported_at: String,
}

/// XP earned by a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
  pub id: String,
  pub user_id: String,
  pub xp: u32,
  pub reason: String,
}

/// Kinds of entities that can be mutated offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Plot,
  ClanPost,
  PestReport,
  Progress,
}

impl EntityKind {
  pub const ALL: [EntityKind; 4] = [
    EntityKind::Plot,
    EntityKind::ClanPost,
    EntityKind::PestReport,
    EntityKind::Progress,
  ];

  /// Stable storage name
  pub fn as_str(self) -> &'static str {
    match self {
      EntityKind::Plot => "plot",
      EntityKind::ClanPost => "clan_post",
      EntityKind::PestReport => "pest_report",
      EntityKind::Progress => "progress",
    }
  }

  /// Backend table that stores this entity
  pub fn table(self) -> &'static str {
    match self {
      EntityKind::Plot => "plots",
      EntityKind::ClanPost => "clan_posts",
      EntityKind::PestReport => "pest_reports",
      EntityKind::Progress => "progress_events",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    EntityKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| format!("unknown entity kind: {}", s))
  }
}

/// Payload of a queued mutation, one variant per entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "data", rename_all = "snake_case")]
pub enum Record {
  Plot(Plot),
  ClanPost(ClanPost),
  PestReport(PestReport),
  Progress(ProgressEvent),
}

impl Record {
  pub fn kind(&self) -> EntityKind {
    match self {
      Record::Plot(_) => EntityKind::Plot,
      Record::ClanPost(_) => EntityKind::ClanPost,
      Record::PestReport(_) => EntityKind::PestReport,
      Record::Progress(_) => EntityKind::Progress,
    }
  }

  pub fn id(&self) -> &str {
    match self {
      Record::Plot(p) => &p.id,
      Record::ClanPost(p) => &p.id,
      Record::PestReport(r) => &r.id,
      Record::Progress(e) => &e.id,
    }
  }

  /// The bare entity body as the backend expects it.
  pub fn body(&self) -> serde_json::Result<serde_json::Value> {
    match self {
      Record::Plot(p) => serde_json::to_value(p),
      Record::ClanPost(p) => serde_json::to_value(p),
      Record::PestReport(r) => serde_json::to_value(r),
      Record::Progress(e) => serde_json::to_value(e),
    }
  }

  /// Parse a bare entity body for the given kind.
  pub fn from_body(kind: EntityKind, body: serde_json::Value) -> serde_json::Result<Self> {
    Ok(match kind {
      EntityKind::Plot => Record::Plot(serde_json::from_value(body)?),
      EntityKind::ClanPost => Record::ClanPost(serde_json::from_value(body)?),
      EntityKind::PestReport => Record::PestReport(serde_json::from_value(body)?),
      EntityKind::Progress => Record::Progress(serde_json::from_value(body)?),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn plot() -> Plot {
    Plot {
      id: "p1".to_string(),
      farm_id: "f1".to_string(),
      name: "North field".to_string(),
      crop: Some("maize".to_string()),
      area_hectares: 2.5,
      boundary: vec![LatLng { lat: 1.0, lng: 2.0 }],
    }
  }

  #[test]
  fn test_record_is_tagged_by_entity() {
    let value = serde_json::to_value(Record::Plot(plot())).unwrap();
    assert_eq!(value["entity"], "plot");
    assert_eq!(value["data"]["name"], "North field");
  }

  #[test]
  fn test_from_body_uses_kind() {
    let body = json!({
      "id": "e1",
      "user_id": "u1",
      "xp": 50,
      "reason": "harvest"
    });
    let record = Record::from_body(EntityKind::Progress, body).unwrap();
    assert_eq!(record.kind(), EntityKind::Progress);
    assert_eq!(record.id(), "e1");
  }

  #[test]
  fn test_from_body_rejects_wrong_shape() {
    let body = json!({ "id": "e1" });
    assert!(Record::from_body(EntityKind::Plot, body).is_err());
  }

  #[test]
  fn test_entity_kind_parse() {
    for kind in EntityKind::ALL {
      assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
    }
    assert!("tractor".parse::<EntityKind>().is_err());
  }
}
