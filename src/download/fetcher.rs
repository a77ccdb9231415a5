//! Streams blobs to temp files, hashing as the bytes arrive.

use super::progress::Progress;
use crate::config::Settings;
use crate::error::{DownloaderError, Result};
use crate::models::digest::hash_file;
use crate::models::{BlobDescriptor, DigestAlgorithm};
use crate::registry::BlobResponse;
use crate::store::PendingWork;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// A blob sitting in a temp file, not yet verified or committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlob {
    pub path: PathBuf,
    /// Lowercase hex of the bytes actually written
    pub computed_hex: String,
    pub bytes_written: u64,
}

impl FetchedBlob {
    /// Describe a file already on disk by hashing it
    pub fn from_file(path: &Path, algorithm: DigestAlgorithm) -> Result<Self> {
        let computed_hex = hash_file(path, algorithm)?;
        let bytes_written = std::fs::metadata(path)?.len();
        Ok(Self {
            path: path.to_path_buf(),
            computed_hex,
            bytes_written,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BlobFetcher {
    temp_dir: PathBuf,
    progress: Progress,
    /// Longest wait for the next chunk before the download is abandoned
    idle_timeout: Duration,
}

impl BlobFetcher {
    #[must_use]
    pub fn new(temp_dir: PathBuf, progress: Progress, idle_timeout: Duration) -> Self {
        Self {
            temp_dir,
            progress,
            idle_timeout,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let temp_dir = settings
            .download
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Self::new(
            temp_dir,
            Progress::new(settings.download.show_progress),
            settings.request_timeout(),
        )
    }

    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Write a blob body to a fresh temp file.
    ///
    /// The temp file is tracked in `pending` before the first byte lands, so
    /// any failure past this point leaves it for rollback.
    pub async fn fetch(
        &self,
        response: BlobResponse,
        descriptor: &BlobDescriptor,
        pending: &PendingWork,
        cancel: &CancellationToken,
    ) -> Result<FetchedBlob> {
        let (file, path) = tempfile::Builder::new()
            .prefix("ollama-downloader-")
            .suffix(".partial")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| DownloaderError::persistence(&self.temp_dir, e))?
            .keep()
            .map_err(|e| DownloaderError::persistence(&self.temp_dir, e.error))?;
        pending.track(&path);

        tracing::debug!(
            "Downloading {} from {} to {}",
            descriptor.digest,
            response.url,
            path.display()
        );

        if let Some(length) = response.content_length {
            if descriptor.size > 0 && length != descriptor.size {
                tracing::debug!(
                    "Server reports {length} bytes for {}, manifest says {}",
                    descriptor.digest.short(),
                    descriptor.size
                );
            }
        }
        let total = Some(descriptor.size)
            .filter(|size| *size > 0)
            .or(response.content_length);
        let bar = self.progress.blob_bar(&descriptor.digest.short(), total);

        let mut file = tokio::fs::File::from_std(file);
        let mut hasher = descriptor.digest.algorithm().hasher();
        let mut body = response.body;
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    bar.abandon();
                    return Err(DownloaderError::Cancelled);
                }
                next = tokio::time::timeout(self.idle_timeout, body.next()) => {
                    next.map_err(|_| DownloaderError::DownloadFailed {
                        url: response.url.clone(),
                        reason: format!("no data received for {:?}", self.idle_timeout),
                    })?
                }
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;

            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloaderError::persistence(&path, e))?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }

        file.flush()
            .await
            .map_err(|e| DownloaderError::persistence(&path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloaderError::persistence(&path, e))?;
        bar.finish_and_clear();

        tracing::debug!("Fetched {written} bytes into {}", path.display());
        Ok(FetchedBlob {
            path,
            computed_hex: hasher.finalize_hex(),
            bytes_written: written,
        })
    }
}
