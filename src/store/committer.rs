//! Moves verified blobs and manifests into the store.

use super::ownership::{set_blob_mode, Ownership};
use super::{PendingWork, StoreLayout};
use crate::config::Settings;
use crate::download::FetchedBlob;
use crate::error::{DownloaderError, Result};
use crate::models::digest::verify;
use crate::models::{BlobDescriptor, ModelIdentifier};
use nix::errno::Errno;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Result of committing one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBlob {
    pub path: PathBuf,
    /// The store already held this blob before the run
    pub preexisting: bool,
}

/// Result of committing a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedManifest {
    pub path: PathBuf,
    pub preexisting: bool,
}

#[derive(Debug, Clone)]
pub struct StoreCommitter {
    layout: StoreLayout,
    ownership: Option<Ownership>,
}

impl StoreCommitter {
    #[must_use]
    pub fn new(layout: StoreLayout, ownership: Option<Ownership>) -> Self {
        Self { layout, ownership }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let ownership = match &settings.library.user_group {
            Some((user, group)) => Some(Ownership::resolve(user, group)?),
            None => None,
        };
        Ok(Self::new(StoreLayout::new(settings.store_root()), ownership))
    }

    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Move a fetched blob to `blobs/<algorithm>-<hex>`.
    ///
    /// The digest is checked before anything moves; on mismatch the temp file
    /// stays where it is for the caller's rollback to remove.
    pub fn commit_blob(
        &self,
        blob: &FetchedBlob,
        descriptor: &BlobDescriptor,
        pending: &PendingWork,
    ) -> Result<CommittedBlob> {
        verify(&blob.computed_hex, &descriptor.digest)?;

        let blobs_dir = self.layout.blobs_dir();
        if !blobs_dir.is_dir() {
            return Err(DownloaderError::StoreNotInitialized(blobs_dir));
        }

        let target = self.layout.blob_path(&descriptor.digest);
        let preexisting = target.exists();
        if preexisting {
            tracing::debug!(
                "Blob {} already present, replacing with verified copy",
                descriptor.digest.short()
            );
        }

        move_into_place(&blob.path, &target, pending)?;
        pending.untrack(&blob.path);

        set_blob_mode(&target)?;
        if let Some(owner) = &self.ownership {
            owner.apply(&target)?;
        }

        tracing::info!(
            "Moved {} to {}",
            blob.path.display(),
            target.display()
        );
        Ok(CommittedBlob {
            path: target,
            preexisting,
        })
    }

    /// Write the raw manifest bytes to
    /// `manifests/<registry-host>/<namespace>/<reference>`.
    ///
    /// Missing directories are created one level at a time and tracked; the
    /// file itself lands through a temp name and a rename.
    pub fn commit_manifest(
        &self,
        raw: &[u8],
        registry_host: &str,
        id: &ModelIdentifier,
        pending: &PendingWork,
    ) -> Result<CommittedManifest> {
        let manifests_dir = self.layout.manifests_dir();
        let target_dir = self.layout.manifest_dir(registry_host, id);
        self.create_tracked_dirs(&manifests_dir, &target_dir, pending)?;

        let target = self.layout.manifest_path(registry_host, id);
        let preexisting = target.exists();
        let temp = target_dir.join(format!(".{}.tmp", id.reference()));

        pending.track(&temp);
        fs::write(&temp, raw).map_err(|e| DownloaderError::persistence(&temp, e))?;
        fs::rename(&temp, &target).map_err(|e| DownloaderError::persistence(&target, e))?;
        pending.untrack(&temp);

        if let Some(owner) = &self.ownership {
            owner.apply(&target)?;
        }

        tracing::info!("Saved manifest {} to {}", id, target.display());
        Ok(CommittedManifest {
            path: target,
            preexisting,
        })
    }

    /// Create every missing directory from `base` down to `leaf`
    fn create_tracked_dirs(&self, base: &Path, leaf: &Path, pending: &PendingWork) -> Result<()> {
        let relative = leaf
            .strip_prefix(base)
            .map_err(|e| DownloaderError::persistence(leaf, e))?;

        let mut current = base.to_path_buf();
        self.create_tracked_dir(&current, pending)?;
        for component in relative.components() {
            current.push(component);
            self.create_tracked_dir(&current, pending)?;
        }
        Ok(())
    }

    fn create_tracked_dir(&self, dir: &Path, pending: &PendingWork) -> Result<()> {
        match fs::create_dir(dir) {
            Ok(()) => {
                pending.track(dir);
                tracing::debug!("Created directory {}", dir.display());
                if let Some(owner) = &self.ownership {
                    owner.apply(dir)?;
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(e) => Err(DownloaderError::persistence(dir, e)),
        }
    }
}

/// Rename, falling back to copy-then-rename across filesystems
fn move_into_place(source: &Path, target: &Path, pending: &PendingWork) -> Result<()> {
    match fs::rename(source, target) {
        Ok(()) => return Ok(()),
        Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
            tracing::debug!(
                "{} is on another filesystem, copying instead",
                source.display()
            );
        }
        Err(e) => return Err(DownloaderError::persistence(target, e)),
    }
    copy_into_place(source, target, pending)
}

/// Copy to a tracked staging file beside `target`, rename it over `target`,
/// then drop the source
fn copy_into_place(source: &Path, target: &Path, pending: &PendingWork) -> Result<()> {
    let staging = staging_path(target);
    pending.track(&staging);
    fs::copy(source, &staging).map_err(|e| DownloaderError::persistence(&staging, e))?;
    fs::rename(&staging, target).map_err(|e| DownloaderError::persistence(target, e))?;
    pending.untrack(&staging);

    if let Err(e) = fs::remove_file(source) {
        tracing::warn!("Failed to remove {}: {e}", source.display());
    }
    Ok(())
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}
