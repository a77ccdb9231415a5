use crate::error::{DownloaderError, Result};
use nix::unistd::{chown, Gid, Group, Uid, User};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Mode for committed blobs: `rw-r-----`
pub const BLOB_MODE: u32 = 0o640;

/// Resolved owner applied to everything written into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    uid: Uid,
    gid: Gid,
}

impl Ownership {
    /// Look up a user and group by name
    pub fn resolve(user: &str, group: &str) -> Result<Self> {
        let uid = User::from_name(user)
            .map_err(|e| DownloaderError::Config(format!("Failed to look up user '{user}': {e}")))?
            .ok_or_else(|| DownloaderError::Config(format!("Unknown user '{user}'")))?
            .uid;
        let gid = Group::from_name(group)
            .map_err(|e| {
                DownloaderError::Config(format!("Failed to look up group '{group}': {e}"))
            })?
            .ok_or_else(|| DownloaderError::Config(format!("Unknown group '{group}'")))?
            .gid;

        Ok(Self { uid, gid })
    }

    /// The user and group running this process
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: nix::unistd::getuid(),
            gid: nix::unistd::getgid(),
        }
    }

    pub fn apply(&self, path: &Path) -> Result<()> {
        chown(path, Some(self.uid), Some(self.gid))
            .map_err(|e| DownloaderError::persistence(path, format!("chown failed: {e}")))?;
        tracing::debug!(
            "Changed ownership of {} to {}:{}",
            path.display(),
            self.uid,
            self.gid
        );
        Ok(())
    }
}

/// Set a blob's permission bits to [`BLOB_MODE`]
pub fn set_blob_mode(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(BLOB_MODE))
        .map_err(|e| DownloaderError::persistence(path, format!("chmod failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[test]
    fn test_set_blob_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blob");
        fs::write(&path, "data").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o777)).unwrap();

        set_blob_mode(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_apply_current_owner() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file");
        fs::write(&path, "data").unwrap();

        let owner = Ownership::current();
        owner.apply(&path).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.uid(), owner.uid.as_raw());
        assert_eq!(meta.gid(), owner.gid.as_raw());
    }

    #[test]
    fn test_resolve_unknown_user() {
        let err = Ownership::resolve("no-such-user-ollama-downloader", "root").unwrap_err();
        assert!(matches!(err, DownloaderError::Config(_)));
    }
}
