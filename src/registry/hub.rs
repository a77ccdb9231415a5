//! Hugging Face models that Ollama can pull: GGUF repositories and their
//! quantisations.

use super::{http_client, parse_base_url};
use crate::config::Settings;
use crate::error::{DownloaderError, Result};
use hf_hub::api::tokio::ApiBuilder;
use serde::Deserialize;
use std::collections::BTreeSet;
use url::Url;

/// Entry of `GET /api/models`; older responses carry only `modelId`
#[derive(Debug, Deserialize)]
struct HubModel {
    id: Option<String>,
    #[serde(rename = "modelId")]
    model_id: Option<String>,
}

/// Subset of `GET /api/models/{repo}`
#[derive(Debug, Default, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<RepoFile>,
}

#[derive(Debug, Deserialize)]
struct RepoFile {
    rfilename: String,
}

impl HubModel {
    fn into_id(self) -> Option<String> {
        self.id.or(self.model_id)
    }
}

pub struct HubCatalog {
    client: reqwest::Client,
    api_base: Url,
    limit: usize,
    verify_ssl: bool,
}

impl HubCatalog {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            api_base: parse_base_url(&settings.hub.api_base_url)?,
            limit: settings.hub.list_limit,
            verify_ssl: settings.library.verify_ssl,
        })
    }

    /// Ungated models tagged as runnable by Ollama, capped at `hub.list_limit`
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let mut url = self
            .api_base
            .join("models")
            .map_err(|e| DownloaderError::Config(format!("Invalid hub.api_base_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("apps", "ollama")
            .append_pair("gated", "false")
            .append_pair("limit", &self.limit.to_string());

        tracing::debug!("Listing Hugging Face models from {url}");
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

        let models: Vec<HubModel> = response
            .json()
            .await
            .map_err(|e| DownloaderError::Catalog(format!("Unexpected model list: {e}")))?;

        tracing::warn!(
            "Listing models from Hugging Face is limited to the top {} models. Browse the full list at https://huggingface.co/models?apps=ollama",
            self.limit
        );
        Ok(models.into_iter().filter_map(HubModel::into_id).collect())
    }

    /// `owner/repo:quant` for every GGUF file in the repository
    pub async fn list_tags(&self, repo_id: &str) -> Result<Vec<String>> {
        tracing::debug!("Fetching file listing for {repo_id}");
        let files = if self.verify_ssl {
            self.repo_files(repo_id).await?
        } else {
            // hf-hub cannot skip certificate checks, so use the shared client
            self.repo_files_insecure(repo_id).await?
        };
        quant_tags(repo_id, files.iter().map(String::as_str))
    }

    async fn repo_files(&self, repo_id: &str) -> Result<Vec<String>> {
        let api = ApiBuilder::new()
            .with_endpoint(hub_endpoint(&self.api_base))
            .with_progress(false)
            .build()
            .map_err(|e| DownloaderError::Catalog(format!("Failed to initialize HuggingFace API: {e}")))?;

        let info = api
            .model(repo_id.to_string())
            .info()
            .await
            .map_err(|e| DownloaderError::Catalog(format!("Failed to fetch {repo_id}: {e}")))?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn repo_files_insecure(&self, repo_id: &str) -> Result<Vec<String>> {
        let url = self
            .api_base
            .join(&format!("models/{repo_id}"))
            .map_err(|e| DownloaderError::Config(format!("Invalid hub.api_base_url: {e}")))?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloaderError::RegistryUnreachable(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloaderError::Catalog(format!(
                "Failed to fetch {repo_id}: {url} returned HTTP {status}"
            )));
        }

        let info: RepoInfo = response
            .json()
            .await
            .map_err(|e| DownloaderError::Catalog(format!("Unexpected repository info: {e}")))?;
        Ok(info.siblings.into_iter().map(|f| f.rfilename).collect())
    }
}

/// hf-hub endpoint for an API base such as `https://huggingface.co/api/`.
///
/// hf-hub appends `/api/...` itself, so a trailing `api` segment is dropped.
fn hub_endpoint(api_base: &Url) -> String {
    let base = api_base.as_str().trim_end_matches('/');
    base.strip_suffix("/api").unwrap_or(base).to_string()
}

/// Derive quantisation tags from repository file names.
///
/// The tag is the last `-`-separated segment of each `.gguf` file's stem.
pub fn quant_tags<'a>(
    repo_id: &str,
    filenames: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<String>> {
    let tags: BTreeSet<String> = filenames
        .into_iter()
        .filter_map(|name| name.strip_suffix(".gguf"))
        .filter_map(|stem| stem.rsplit('-').next())
        .filter(|quant| !quant.is_empty())
        .map(|quant| format!("{repo_id}:{quant}"))
        .collect();

    if tags.is_empty() {
        return Err(DownloaderError::Catalog(format!(
            "The model {repo_id} has no support for Ollama"
        )));
    }
    Ok(tags.into_iter().collect())
}
