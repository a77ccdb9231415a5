//! End-to-end model download: manifest, blobs, commit, inventory check.
//!
//! Stages run strictly in order. Every blob is fetched and verified before
//! any of them is committed, and the manifest is only written once every blob
//! sits in the store, so the runtime never sees a manifest whose blobs are
//! missing. A [`RollbackGuard`] removes whatever the run created if it fails.

use super::fetcher::{BlobFetcher, FetchedBlob};
use super::progress::format_bytes;
use crate::config::Settings;
use crate::error::{DownloaderError, Result};
use crate::inventory::{HttpInventory, Inventory, InventoryEntry, InventoryReconciler};
use crate::models::digest::verify;
use crate::models::{BlobDescriptor, Manifest, ModelIdentifier};
use crate::registry::{HttpRegistry, Registry, RegistryEndpoints};
use crate::store::{ensure_space, CommittedBlob, PendingWork, RollbackGuard, StoreCommitter};
use chrono::Utc;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// What a successful download left behind
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub id: ModelIdentifier,
    pub manifest_path: PathBuf,
    pub blob_paths: Vec<PathBuf>,
    pub bytes_downloaded: u64,
    /// The runtime's record of the model
    pub entry: InventoryEntry,
}

pub struct ModelDownloader<R, I> {
    registry: R,
    endpoints: RegistryEndpoints,
    fetcher: BlobFetcher,
    committer: StoreCommitter,
    reconciler: InventoryReconciler<I>,
    remove_downloaded_on_error: bool,
}

impl ModelDownloader<HttpRegistry, HttpInventory> {
    /// Downloader talking to the configured registries and Ollama server
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings,
            HttpRegistry::new(settings)?,
            HttpInventory::new(settings)?,
        )
    }
}

impl<R: Registry, I: Inventory> ModelDownloader<R, I> {
    pub fn new(settings: &Settings, registry: R, inventory: I) -> Result<Self> {
        let endpoints = RegistryEndpoints::from_settings(settings)?;
        let reconciler = InventoryReconciler::new(
            inventory,
            endpoints.hub_host(),
            settings.server.poll_attempts,
            settings.poll_interval(),
        );

        Ok(Self {
            registry,
            endpoints,
            fetcher: BlobFetcher::from_settings(settings),
            committer: StoreCommitter::from_settings(settings)?,
            reconciler,
            remove_downloaded_on_error: settings.server.remove_downloaded_on_error,
        })
    }

    /// Download `id` with a fresh pending-work set
    pub async fn download(
        &self,
        id: &ModelIdentifier,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let pending = PendingWork::new();
        self.download_with(id, &pending, cancel).await
    }

    /// Download `id`, recording created paths in `pending`.
    ///
    /// On any error the paths still tracked are rolled back before this
    /// returns; on success the set is left empty.
    pub async fn download_with(
        &self,
        id: &ModelIdentifier,
        pending: &PendingWork,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let guard = RollbackGuard::new(pending);
        let outcome = self.run(id, pending, cancel).await;
        match outcome {
            Ok(outcome) => {
                guard.disarm();
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!("Download of {id} failed, removing what it created");
                drop(guard);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        id: &ModelIdentifier,
        pending: &PendingWork,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        check_cancelled(cancel)?;
        tracing::info!("Downloading model {id}");

        let raw = self.registry.fetch_manifest(id).await?;
        let manifest = Manifest::parse(&raw, &id.to_string())?;
        let total = manifest.total_size();
        tracing::info!(
            "Manifest for {id} lists {} blob(s), {}",
            manifest.layers.len() + 1,
            format_bytes(total)
        );
        self.check_space(total)?;

        let mut fetched: Vec<FetchedBlob> = Vec::with_capacity(manifest.layers.len() + 1);
        for descriptor in manifest.blobs() {
            check_cancelled(cancel)?;
            let response = self.registry.open_blob(id, &descriptor.digest).await?;
            let blob = self
                .fetcher
                .fetch(response, descriptor, pending, cancel)
                .await?;
            verify(&blob.computed_hex, &descriptor.digest)?;
            tracing::info!(
                "Verified {} ({})",
                descriptor.digest.short(),
                format_bytes(blob.bytes_written)
            );
            fetched.push(blob);
        }

        let mut blob_paths = Vec::with_capacity(fetched.len());
        let mut bytes_downloaded = 0;
        for (blob, descriptor) in fetched.iter().zip(manifest.blobs()) {
            check_cancelled(cancel)?;
            let committed = self
                .commit_blob(blob.clone(), descriptor.clone(), pending.clone())
                .await?;
            if self.remove_downloaded_on_error && !committed.preexisting {
                pending.track(&committed.path);
            }
            bytes_downloaded += blob.bytes_written;
            blob_paths.push(committed.path);
        }

        check_cancelled(cancel)?;
        let host = self.endpoints.registry_host(id);
        let committed = self.committer.commit_manifest(&raw, &host, id, pending)?;
        let not_before = Utc::now();

        if !self.remove_downloaded_on_error {
            // The install stays even if the runtime never lists it
            pending.clear();
        } else if !committed.preexisting {
            pending.track(&committed.path);
        }

        let entry = self
            .reconciler
            .confirm_visible(id, not_before, cancel)
            .await?;

        Ok(DownloadOutcome {
            id: id.clone(),
            manifest_path: committed.path,
            blob_paths,
            bytes_downloaded,
            entry,
        })
    }

    /// Commit on the blocking pool; a cross-filesystem move copies the whole blob
    async fn commit_blob(
        &self,
        blob: FetchedBlob,
        descriptor: BlobDescriptor,
        pending: PendingWork,
    ) -> Result<CommittedBlob> {
        let committer = self.committer.clone();
        tokio::task::spawn_blocking(move || committer.commit_blob(&blob, &descriptor, &pending))
            .await
            .map_err(|e| DownloaderError::Other(format!("Blob commit task failed: {e}")))?
    }

    fn check_space(&self, required: u64) -> Result<()> {
        if required == 0 {
            return Ok(());
        }
        let blobs_dir = self.committer.layout().blobs_dir();
        for dir in [self.fetcher.temp_dir(), blobs_dir.as_path()] {
            if dir.is_dir() {
                ensure_space(dir, required)?;
            }
        }
        Ok(())
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DownloaderError::Cancelled);
    }
    Ok(())
}
