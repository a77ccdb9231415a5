//! Remote registries: manifest and blob endpoints plus the browsable catalogs.

pub mod catalog;
pub mod http;
pub mod hub;

pub use catalog::LibraryCatalog;
pub use http::HttpRegistry;
pub use hub::HubCatalog;

use crate::config::Settings;
use crate::error::{DownloaderError, Result};
use crate::models::{Digest, ModelIdentifier};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use url::Url;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("ollama-downloader/", env!("CARGO_PKG_VERSION"));

/// Streaming body of a blob request
pub struct BlobResponse {
    pub url: String,
    /// Server-declared length; advisory only
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for BlobResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobResponse")
            .field("url", &self.url)
            .field("content_length", &self.content_length)
            .field("body", &"Stream { ... }")
            .finish()
    }
}

/// Source of manifests and blobs
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the raw manifest bytes for a model
    ///
    /// # Errors
    /// `RegistryUnreachable` on network failure, `ManifestNotFound` on any
    /// non-2xx status.
    async fn fetch_manifest(&self, id: &ModelIdentifier) -> Result<Vec<u8>>;

    /// Start streaming one blob
    async fn open_blob(&self, id: &ModelIdentifier, digest: &Digest) -> Result<BlobResponse>;
}

/// Base URLs of the library and hub registries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoints {
    library: Url,
    hub: Url,
}

impl RegistryEndpoints {
    pub fn new(library: &str, hub: &str) -> Result<Self> {
        Ok(Self {
            library: parse_base_url(library)?,
            hub: parse_base_url(hub)?,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.library.registry_base_url,
            &settings.hub.registry_base_url,
        )
    }

    #[must_use]
    pub fn base(&self, id: &ModelIdentifier) -> &Url {
        if id.is_hub() {
            &self.hub
        } else {
            &self.library
        }
    }

    /// Host label used as the first directory under `manifests/`
    #[must_use]
    pub fn registry_host(&self, id: &ModelIdentifier) -> String {
        self.base(id).host_str().unwrap_or_default().to_string()
    }

    /// Host label the runtime prefixes hub models with
    #[must_use]
    pub fn hub_host(&self) -> String {
        self.hub.host_str().unwrap_or_default().to_string()
    }

    pub fn manifest_url(&self, id: &ModelIdentifier) -> Result<Url> {
        self.join(
            id,
            &format!("{}/manifests/{}", id.repository(), id.reference()),
        )
    }

    /// The library registry names blobs `algo-hex`, the hub keeps `algo:hex`
    pub fn blob_url(&self, id: &ModelIdentifier, digest: &Digest) -> Result<Url> {
        let name = if id.is_hub() {
            digest.to_string()
        } else {
            digest.file_name()
        };
        self.join(id, &format!("{}/blobs/{name}", id.repository()))
    }

    fn join(&self, id: &ModelIdentifier, path: &str) -> Result<Url> {
        self.base(id)
            .join(path)
            .map_err(|e| DownloaderError::Config(format!("Cannot build URL for {path}: {e}")))
    }
}

/// Parse a base URL, making sure relative joins append rather than replace
pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized)
        .map_err(|e| DownloaderError::Config(format!("Invalid base URL '{raw}': {e}")))
}

/// HTTP client honoring the TLS and timeout settings.
///
/// `library.timeout` bounds each whole request, body included.
pub fn http_client(settings: &Settings) -> Result<reqwest::Client> {
    if !settings.library.verify_ssl {
        tracing::warn!(
            "SSL verification is disabled. This is not recommended for production use."
        );
    }

    client_builder(settings)
        .timeout(settings.request_timeout())
        .build()
        .map_err(|e| DownloaderError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Client for blob bodies: connect timeout only, no total timeout.
///
/// A multi-gigabyte layer takes far longer than `library.timeout`; the fetcher
/// instead bounds the wait for each chunk.
pub fn blob_client(settings: &Settings) -> Result<reqwest::Client> {
    client_builder(settings)
        .connect_timeout(settings.request_timeout())
        .build()
        .map_err(|e| DownloaderError::Config(format!("Failed to build download client: {e}")))
}

fn client_builder(settings: &Settings) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(!settings.library.verify_ssl)
}
