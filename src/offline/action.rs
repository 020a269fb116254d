//! Queued mutations.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::farm::{EntityKind, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
  Create,
  Update,
  Delete,
}

impl ActionType {
  pub fn as_str(self) -> &'static str {
    match self {
      ActionType::Create => "CREATE",
      ActionType::Update => "UPDATE",
      ActionType::Delete => "DELETE",
    }
  }
}

impl fmt::Display for ActionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ActionType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "CREATE" => Ok(ActionType::Create),
      "UPDATE" => Ok(ActionType::Update),
      "DELETE" => Ok(ActionType::Delete),
      _ => Err(format!("unknown action type: {}", s)),
    }
  }
}

/// A mutation to be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
  pub action: ActionType,
  pub entity: EntityKind,
  pub entity_id: String,
  pub data: Option<Record>,
}

impl NewAction {
  pub fn create(record: Record) -> Self {
    Self {
      action: ActionType::Create,
      entity: record.kind(),
      entity_id: record.id().to_string(),
      data: Some(record),
    }
  }

  pub fn update(record: Record) -> Self {
    Self {
      action: ActionType::Update,
      entity: record.kind(),
      entity_id: record.id().to_string(),
      data: Some(record),
    }
  }

  pub fn delete(entity: EntityKind, entity_id: impl Into<String>) -> Self {
    Self {
      action: ActionType::Delete,
      entity,
      entity_id: entity_id.into(),
      data: None,
    }
  }

  /// Creates and updates carry a record of the same kind; deletes carry none.
  pub fn validate(&self) -> Result<()> {
    if self.entity_id.trim().is_empty() {
      return Err(eyre!("{} {} has an empty id", self.action, self.entity));
    }
    match (self.action, &self.data) {
      (ActionType::Delete, None) => Ok(()),
      (ActionType::Delete, Some(_)) => Err(eyre!("DELETE {} must not carry data", self.entity)),
      (_, None) => Err(eyre!("{} {} requires data", self.action, self.entity)),
      (_, Some(record)) if record.kind() != self.entity => Err(eyre!(
        "{} {} carries a {} record",
        self.action,
        self.entity,
        record.kind()
      )),
      (_, Some(_)) => Ok(()),
    }
  }
}

/// A mutation waiting to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAction {
  pub id: i64,
  pub action: ActionType,
  pub entity: EntityKind,
  pub entity_id: String,
  pub data: Option<Record>,
  /// Epoch millis when the action was queued
  pub timestamp: i64,
  pub retry_count: u32,
}

impl fmt::Display for QueuedAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {} {}", self.action, self.entity, self.entity_id)
  }
}
