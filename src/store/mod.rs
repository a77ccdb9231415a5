//! Local Ollama model store.
//!
//! ```text
//! <root>/blobs/<algorithm>-<hex>
//! <root>/manifests/<registry-host>/<namespace>/<tag-or-quant>
//! ```

pub mod committer;
pub mod ownership;
pub mod pending;

pub use committer::{CommittedBlob, CommittedManifest, StoreCommitter};
pub use ownership::Ownership;
pub use pending::{PendingWork, RollbackGuard, RollbackReport};

use crate::error::{DownloaderError, Result};
use crate::models::{Digest, ModelIdentifier};
use std::path::{Path, PathBuf};

/// Paths inside a store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir().join(digest.file_name())
    }

    #[must_use]
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    #[must_use]
    pub fn manifest_dir(&self, registry_host: &str, id: &ModelIdentifier) -> PathBuf {
        self.manifests_dir()
            .join(registry_host)
            .join(id.namespace_path())
    }

    #[must_use]
    pub fn manifest_path(&self, registry_host: &str, id: &ModelIdentifier) -> PathBuf {
        self.manifest_dir(registry_host, id).join(id.reference())
    }
}

/// Bytes available to unprivileged writers on the filesystem holding `path`
pub fn available_space(path: &Path) -> Result<u64> {
    let stats = nix::sys::statvfs::statvfs(path)
        .map_err(|e| DownloaderError::Other(format!("Failed to check disk space: {e}")))?;
    Ok(stats.blocks_available() * stats.block_size())
}

/// Fail when `path`'s filesystem cannot hold `required` more bytes
pub fn ensure_space(path: &Path, required: u64) -> Result<()> {
    let available = available_space(path)?;
    if available < required {
        return Err(DownloaderError::Other(format!(
            "Not enough disk space in {}: {} required, {} available",
            path.display(),
            crate::download::format_bytes(required),
            crate::download::format_bytes(available)
        )));
    }
    Ok(())
}
