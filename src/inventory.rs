//! The Ollama runtime's view of installed models.
//!
//! A download only counts once the runtime lists the model with a
//! modification time close to the moment the manifest was written.

use crate::config::Settings;
use crate::error::{DownloaderError, Result};
use crate::models::ModelIdentifier;
use crate::registry::{http_client, parse_base_url};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Largest distance between the runtime's mtime and the manifest commit
pub const MATCH_WINDOW_SECS: i64 = 60;

/// One model as reported by `GET /api/tags`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InventoryEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

impl InventoryEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            model: name.clone(),
            name,
            modified_at,
            size: 0,
            digest: String::new(),
        }
    }

    /// The model reference, falling back to the display name
    #[must_use]
    pub fn reference(&self) -> &str {
        if self.model.is_empty() {
            &self.name
        } else {
            &self.model
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<InventoryEntry>,
}

/// Lists installed models
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn list(&self) -> Result<Vec<InventoryEntry>>;
}

/// Inventory backed by a running Ollama server
#[derive(Debug, Clone)]
pub struct HttpInventory {
    client: reqwest::Client,
    tags_url: Url,
    headers: HeaderMap,
}

impl HttpInventory {
    pub fn new(settings: &Settings) -> Result<Self> {
        let tags_url = parse_base_url(&settings.server.url)?
            .join("api/tags")
            .map_err(|e| DownloaderError::Config(format!("Invalid server.url: {e}")))?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &settings.server.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| DownloaderError::Config(format!("Invalid server.api_key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            client: http_client(settings)?,
            tags_url,
            headers,
        })
    }
}

#[async_trait]
impl Inventory for HttpInventory {
    async fn list(&self) -> Result<Vec<InventoryEntry>> {
        tracing::debug!("Listing models from {}", self.tags_url);
        let response = self
            .client
            .get(self.tags_url.clone())
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| DownloaderError::InventoryUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| DownloaderError::InventoryUnavailable(e.to_string()))?;

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| DownloaderError::InventoryUnavailable(format!("bad response: {e}")))?;
        Ok(tags.models)
    }
}

/// First entry named `name` whose mtime lies within the match window of `not_before`
#[must_use]
pub fn find_match<'a>(
    entries: &'a [InventoryEntry],
    name: &str,
    not_before: DateTime<Utc>,
) -> Option<&'a InventoryEntry> {
    let window = TimeDelta::seconds(MATCH_WINDOW_SECS);
    entries
        .iter()
        .filter(|entry| entry.reference() == name || entry.name == name)
        .find(|entry| (entry.modified_at - not_before).abs() < window)
}

/// Polls an [`Inventory`] until a fresh download shows up
pub struct InventoryReconciler<I> {
    inventory: I,
    hub_host: String,
    attempts: u32,
    interval: Duration,
}

impl<I: Inventory> InventoryReconciler<I> {
    pub fn new(inventory: I, hub_host: impl Into<String>, attempts: u32, interval: Duration) -> Self {
        Self {
            inventory,
            hub_host: hub_host.into(),
            attempts: attempts.max(1),
            interval,
        }
    }

    /// Confirm the runtime lists `id` with an mtime near `not_before`.
    ///
    /// Listing errors are retried like a miss; the last one is returned when
    /// every attempt failed to list.
    pub async fn confirm_visible(
        &self,
        id: &ModelIdentifier,
        not_before: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<InventoryEntry> {
        let name = id.inventory_name(&self.hub_host);
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                return Err(DownloaderError::Cancelled);
            }

            match self.inventory.list().await {
                Ok(entries) => {
                    if let Some(entry) = find_match(&entries, &name, not_before) {
                        tracing::info!(
                            "Model {} is visible to Ollama (modified {})",
                            name,
                            entry.modified_at
                        );
                        return Ok(entry.clone());
                    }
                    last_error = None;
                    tracing::debug!("{name} not listed yet (attempt {attempt}/{})", self.attempts);
                }
                Err(e) => {
                    tracing::warn!("Inventory check failed (attempt {attempt}/{}): {e}", self.attempts);
                    last_error = Some(e);
                }
            }

            if attempt < self.attempts {
                tokio::select! {
                    () = cancel.cancelled() => return Err(DownloaderError::Cancelled),
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        Err(last_error.unwrap_or(DownloaderError::NotFound(name)))
    }
}
