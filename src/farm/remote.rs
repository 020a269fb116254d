use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::types::{ClanPost, EntityKind, PestReport, Plot};
use crate::config::Config;
use crate::offline::{ActionType, QueuedAction, Remote};

/// Posts per clan feed page
const FEED_LIMIT: u32 = 50;

/// REST client for the farm backend (PostgREST-style API).
#[derive(Clone)]
pub struct RestRemote {
  client: reqwest::Client,
  base: Url,
  api_key: String,
}

impl RestRemote {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_key(&config.remote.url, api_key, Duration::from_secs(config.remote.timeout_secs))
  }

  pub fn with_key(url: &str, api_key: String, timeout: Duration) -> Result<Self> {
    let mut base = Url::parse(url).map_err(|e| eyre!("Invalid remote URL {}: {}", url, e))?;
    // Url::join drops the last segment unless the path ends with '/'
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      api_key,
    })
  }

  /// URL for a table, with `column=eq.value` filters.
  fn table_url(&self, table: &str, filters: &[(&str, &str)]) -> Result<Url> {
    let mut url = self
      .base
      .join(&format!("rest/v1/{}", table))
      .map_err(|e| eyre!("Failed to build URL for {}: {}", table, e))?;
    if !filters.is_empty() {
      let mut query = url.query_pairs_mut();
      for (column, value) in filters {
        query.append_pair(column, &format!("eq.{}", value));
      }
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, url)
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
  }

  async fn get_rows<T: DeserializeOwned>(&self, mut url: Url) -> Result<Vec<T>> {
    url.query_pairs_mut().append_pair("select", "*");
    let response = self
      .request(Method::GET, url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url.path(), e))?;

    let response = check_status(response).await?;
    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {}: {}", url.path(), e))
  }

  /// All plots mapped on a farm
  pub async fn list_plots(&self, farm_id: &str) -> Result<Vec<Plot>> {
    let url = self.table_url(EntityKind::Plot.table(), &[("farm_id", farm_id)])?;
    self.get_rows(url).await
  }

  /// Most recent posts in a clan, newest first
  pub async fn clan_feed(&self, clan_id: &str) -> Result<Vec<ClanPost>> {
    let mut url = self.table_url(EntityKind::ClanPost.table(), &[("clan_id", clan_id)])?;
    url
      .query_pairs_mut()
      .append_pair("order", "created_at.desc")
      .append_pair("limit", &FEED_LIMIT.to_string());
    self.get_rows(url).await
  }

  /// Pest reports for a plot
  pub async fn pest_reports(&self, plot_id: &str) -> Result<Vec<PestReport>> {
    let url = self.table_url(EntityKind::PestReport.table(), &[("plot_id", plot_id)])?;
    self.get_rows(url).await
  }

  /// HTTP request that applies a queued action to its table.
  fn action_request(&self, action: &QueuedAction) -> Result<reqwest::Request> {
    let table = action.entity.table();
    let builder = match action.action {
      ActionType::Create => {
        let url = self.table_url(table, &[])?;
        self.request(Method::POST, url).json(&self.body(action)?)
      }
      ActionType::Update => {
        let url = self.table_url(table, &[("id", action.entity_id.as_str())])?;
        self.request(Method::PATCH, url).json(&self.body(action)?)
      }
      ActionType::Delete => {
        let url = self.table_url(table, &[("id", action.entity_id.as_str())])?;
        self.request(Method::DELETE, url)
      }
    };

    builder
      .header("Prefer", "return=minimal")
      .build()
      .map_err(|e| eyre!("Failed to build request for {}: {}", action, e))
  }

  async fn send_action(&self, action: &QueuedAction) -> Result<()> {
    let request = self.action_request(action)?;
    let response = self
      .client
      .execute(request)
      .await
      .map_err(|e| eyre!("Request failed: {}", e))?;
    check_status(response).await?;

    Ok(())
  }

  fn body(&self, action: &QueuedAction) -> Result<serde_json::Value> {
    let record = action
      .data
      .as_ref()
      .ok_or_else(|| eyre!("{} has no data", action))?;
    record
      .body()
      .map_err(|e| eyre!("Failed to serialize {}: {}", action, e))
  }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
      Err(eyre!("Backend rejected credentials ({})", status))
    }
    _ if body.is_empty() => Err(eyre!("Backend returned {}", status)),
    _ => Err(eyre!("Backend returned {}: {}", status, body)),
  }
}

impl Remote for RestRemote {
  fn deliver<'a>(&'a self, action: &'a QueuedAction) -> BoxFuture<'a, Result<()>> {
    Box::pin(self.send_action(action))
  }

  fn ping(&self) -> BoxFuture<'_, bool> {
    Box::pin(async move {
      let url = match self.base.join("rest/v1/") {
        Ok(url) => url,
        Err(_) => return false,
      };
      // Any HTTP answer means the backend is reachable
      self.request(Method::GET, url).send().await.is_ok()
    })
  }
}
