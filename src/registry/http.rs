use super::{blob_client, http_client, BlobResponse, Registry, RegistryEndpoints};
use crate::config::Settings;
use crate::error::{DownloaderError, Result};
use crate::models::{Digest, ModelIdentifier};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use std::time::Duration;

/// Media types a registry may answer a manifest request with
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
                               application/vnd.oci.image.manifest.v1+json";

/// OCI-style registry spoken to over HTTPS
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    blob_client: reqwest::Client,
    /// Bound on waiting for a blob's response headers
    header_timeout: Duration,
    endpoints: RegistryEndpoints,
}

impl HttpRegistry {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            blob_client: blob_client(settings)?,
            header_timeout: settings.request_timeout(),
            endpoints: RegistryEndpoints::from_settings(settings)?,
        })
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn fetch_manifest(&self, id: &ModelIdentifier) -> Result<Vec<u8>> {
        let url = self.endpoints.manifest_url(id)?;
        tracing::debug!("Fetching manifest from {url}");

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| DownloaderError::RegistryUnreachable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloaderError::ManifestNotFound {
                model: id.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DownloaderError::RegistryUnreachable(format!("{url}: {e}")))?;
        tracing::debug!("Manifest for {id}: {} bytes", body.len());
        Ok(body.to_vec())
    }

    async fn open_blob(&self, id: &ModelIdentifier, digest: &Digest) -> Result<BlobResponse> {
        let url = self.endpoints.blob_url(id, digest)?;
        tracing::debug!("Requesting blob {url}");

        let request = self.blob_client.get(url.clone()).send();
        let response = tokio::time::timeout(self.header_timeout, request)
            .await
            .map_err(|_| {
                DownloaderError::RegistryUnreachable(format!(
                    "{url}: no response within {:?}",
                    self.header_timeout
                ))
            })?
            .map_err(|e| DownloaderError::RegistryUnreachable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloaderError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let content_length = response.content_length();
        let stream_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| DownloaderError::DownloadFailed {
                    url: stream_url.clone(),
                    reason: e.to_string(),
                })
            })
            .boxed();

        Ok(BlobResponse {
            url: url.to_string(),
            content_length,
            body,
        })
    }
}
