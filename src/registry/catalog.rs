//! Browsable Ollama library: model names and their tags, scraped from the
//! library's HTML pages and cached on disk as JSON.

use super::{http_client, parse_base_url};
use crate::config::Settings;
use crate::download::Progress;
use crate::error::{DownloaderError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// `{model: [model:tag, ...]}`
pub type TagsCache = BTreeMap<String, Vec<String>>;

pub struct LibraryCatalog {
    client: reqwest::Client,
    base: Url,
    cache_path: PathBuf,
    progress: Progress,
    links: LinkExtractor,
    models: Option<Vec<String>>,
    tags: TagsCache,
}

impl LibraryCatalog {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut catalog = Self {
            client: http_client(settings)?,
            base: parse_base_url(&settings.library.library_base_url)?,
            cache_path: resolve_cache_path(&settings.library.models_tags_cache),
            progress: Progress::new(settings.download.show_progress),
            links: LinkExtractor::new()?,
            models: None,
            tags: TagsCache::new(),
        };
        catalog.tags = load_cache(&catalog.cache_path);
        Ok(catalog)
    }

    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Every model linked from the library index
    pub async fn list_models(&mut self) -> Result<Vec<String>> {
        if let Some(models) = &self.models {
            return Ok(models.clone());
        }

        tracing::debug!("Updating models list from Ollama library {}", self.base);
        let html = self.get_page(self.base.clone()).await?;
        let models = self.links.models(&html);
        tracing::debug!("Found {} models in the Ollama library", models.len());

        self.models = Some(models.clone());
        Ok(models)
    }

    /// Tags of one model, from the cache unless `update` is set
    pub async fn list_tags(&mut self, model: &str, update: bool) -> Result<Vec<String>> {
        if !update {
            if let Some(tags) = self.tags.get(model) {
                tracing::debug!("Using cached tags for {model}");
                return Ok(tags.clone());
            }
        }

        if !self.list_models().await?.iter().any(|m| m == model) {
            return Err(DownloaderError::Catalog(format!(
                "Model {model} not found in the Ollama library"
            )));
        }

        let tags = self.fetch_tags(model).await?;
        self.tags.insert(model.to_string(), tags.clone());
        self.save_cache()?;
        Ok(tags)
    }

    /// Tags of every library model.
    ///
    /// A model whose tags page fails is skipped with a warning.
    pub async fn list_all_tags(&mut self, update: bool) -> Result<TagsCache> {
        if !update && !self.tags.is_empty() {
            return Ok(self.tags.clone());
        }

        let models = self.list_models().await?;
        let bar = self.progress.count_bar("Updating models", models.len() as u64);
        for model in &models {
            match self.fetch_tags(model).await {
                Ok(tags) => {
                    self.tags.insert(model.clone(), tags);
                }
                Err(e) => tracing::warn!("Skipping tags for {model}: {e}"),
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        tracing::info!(
            "Updated {} models with tags from the Ollama library",
            self.tags.len()
        );
        self.save_cache()?;
        Ok(self.tags.clone())
    }

    async fn fetch_tags(&self, model: &str) -> Result<Vec<String>> {
        let url = self
            .base
            .join(&format!("{model}/tags"))
            .map_err(|e| DownloaderError::Catalog(format!("Bad tags URL for {model}: {e}")))?;
        tracing::debug!("Fetching tags for model {model} from {url}");
        let html = self.get_page(url).await?;
        Ok(self.links.tags(&html, model))
    }

    async fn get_page(&self, url: Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloaderError::RegistryUnreachable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloaderError::Catalog(format!("{url} returned HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| DownloaderError::Catalog(format!("Failed to read {url}: {e}")))
    }

    fn save_cache(&self) -> Result<()> {
        save_cache(&self.cache_path, &self.tags)
    }
}

/// Pulls `href="/library/..."` targets out of library pages
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    pattern: Regex,
}

impl LinkExtractor {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r#"href\s*=\s*["']/library/([^"'?#\s]+)["']"#)
            .map_err(|e| DownloaderError::Catalog(format!("Invalid link pattern: {e}")))?;
        Ok(Self { pattern })
    }

    fn links<'h>(&self, html: &'h str) -> Vec<&'h str> {
        self.pattern
            .captures_iter(html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Model names linked from the library index, in page order
    #[must_use]
    pub fn models(&self, html: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.links(html)
            .into_iter()
            .filter(|link| !link.contains(':') && !link.contains('/'))
            .filter(|link| seen.insert(*link))
            .map(str::to_string)
            .collect()
    }

    /// `model:tag` strings linked from a model's tags page, sorted
    #[must_use]
    pub fn tags(&self, html: &str, model: &str) -> Vec<String> {
        let prefix = format!("{model}:");
        self.links(html)
            .into_iter()
            .filter(|link| link.starts_with(&prefix) && link.len() > prefix.len())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Relative cache paths live in the user cache directory
fn resolve_cache_path(configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        return path;
    }
    dirs::cache_dir()
        .map(|dir| dir.join("ollama-downloader").join(&path))
        .unwrap_or(path)
}

fn load_cache(path: &Path) -> TagsCache {
    let Ok(contents) = fs::read_to_string(path) else {
        return TagsCache::new();
    };
    match serde_json::from_str(&contents) {
        Ok(cache) => {
            tracing::debug!("Loaded models tags cache from {}", path.display());
            cache
        }
        Err(e) => {
            tracing::warn!("Ignoring unreadable tags cache {}: {e}", path.display());
            TagsCache::new()
        }
    }
}

fn save_cache(path: &Path, cache: &TagsCache) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cache)
        .map_err(|e| DownloaderError::Other(format!("Failed to serialize tags cache: {e}")))?;

    // Write to temp file then rename for atomicity
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, json)?;
    fs::rename(&temp_path, path)?;
    tracing::debug!("Saved models tags cache to {}", path.display());
    Ok(())
}
