//! Bookkeeping for files and directories an in-flight download created.
//!
//! Each download owns its own [`PendingWork`]. Clones share one set behind a
//! mutex so the orchestrator, blocking commit tasks and a cancellation path
//! can all reach it. Rollback carries a re-entrance guard so it never runs
//! twice at once.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Paths created by the current download attempt
#[derive(Debug, Default, Clone)]
pub struct PendingWork {
    paths: Arc<Mutex<BTreeSet<PathBuf>>>,
    rolling_back: Arc<AtomicBool>,
}

/// Outcome of a rollback pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    /// Another rollback was already running
    pub skipped: bool,
}

impl RollbackReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl PendingWork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a path this run created
    pub fn track(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::trace!("Tracking {}", path.display());
        self.lock().insert(path);
    }

    /// Forget a path once it has been committed elsewhere
    pub fn untrack(&self, path: &Path) -> bool {
        self.lock().remove(path)
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Tracked paths in sorted order
    #[must_use]
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }

    /// Forget everything without touching the filesystem
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Best-effort delete of every tracked path.
    ///
    /// Files go first, then directories deepest-first and only when empty.
    /// Paths already gone count as removed. Failures are reported, not retried.
    pub fn rollback(&self) -> RollbackReport {
        if self.rolling_back.swap(true, Ordering::SeqCst) {
            return RollbackReport {
                skipped: true,
                ..RollbackReport::default()
            };
        }

        let paths = std::mem::take(&mut *self.lock());
        let mut report = RollbackReport::default();
        let mut directories = Vec::new();

        for path in paths {
            match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => directories.push(path),
                Ok(_) => match fs::remove_file(&path) {
                    Ok(()) => {
                        tracing::info!("Removed unnecessary file: {}", path.display());
                        report.removed.push(path);
                    }
                    Err(e) => {
                        tracing::error!("Failed to remove file {}: {e}", path.display());
                        report.failed.push((path, e.to_string()));
                    }
                },
                Err(e) if e.kind() == ErrorKind::NotFound => report.removed.push(path),
                Err(e) => {
                    tracing::error!("Failed to inspect {}: {e}", path.display());
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        directories.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        for dir in directories {
            match fs::remove_dir(&dir) {
                Ok(()) => {
                    tracing::info!("Removed unnecessary directory: {}", dir.display());
                    report.removed.push(dir);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove directory {}: {e}", dir.display());
                    report.failed.push((dir, e.to_string()));
                }
            }
        }

        self.rolling_back.store(false, Ordering::SeqCst);
        report
    }
}

/// Rolls back a [`PendingWork`] on drop unless disarmed.
///
/// Covers early returns, cancellation and panics alike; a successful run
/// calls [`RollbackGuard::disarm`], which clears the set instead.
pub struct RollbackGuard<'a> {
    pending: &'a PendingWork,
    armed: bool,
}

impl<'a> RollbackGuard<'a> {
    #[must_use]
    pub fn new(pending: &'a PendingWork) -> Self {
        Self {
            pending,
            armed: true,
        }
    }

    /// Mark the run successful and clear the set
    pub fn disarm(mut self) {
        self.armed = false;
        self.pending.clear();
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let report = self.pending.rollback();
        if !report.is_clean() {
            tracing::warn!(
                "Rollback left {} path(s) behind; remove them manually",
                report.failed.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_track_untrack_clear() {
        let pending = PendingWork::new();
        pending.track("/tmp/a");
        pending.track("/tmp/b");
        assert_eq!(pending.len(), 2);

        assert!(pending.untrack(Path::new("/tmp/a")));
        assert!(!pending.untrack(Path::new("/tmp/a")));
        assert!(pending.contains(Path::new("/tmp/b")));

        pending.clear();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_clones_share_one_set() {
        let pending = PendingWork::new();
        let handle = pending.clone();
        handle.track("/tmp/from-task");
        assert!(pending.contains(Path::new("/tmp/from-task")));

        pending.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn test_rollback_removes_tracked_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let created_dir = root.join("new");
        let nested_dir = created_dir.join("nested");
        fs::create_dir_all(&nested_dir).unwrap();
        let tracked_file = nested_dir.join("tracked");
        let untracked_file = root.join("untracked");
        fs::write(&tracked_file, "x").unwrap();
        fs::write(&untracked_file, "y").unwrap();

        let pending = PendingWork::new();
        pending.track(&created_dir);
        pending.track(&nested_dir);
        pending.track(&tracked_file);

        let report = pending.rollback();
        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 3);
        assert!(!created_dir.exists());
        assert!(untracked_file.exists());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_rollback_keeps_non_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("dir");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("foreign"), "keep me").unwrap();

        let pending = PendingWork::new();
        pending.track(&dir);

        let report = pending.rollback();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, dir);
        assert!(dir.join("foreign").exists());
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, "x").unwrap();

        let pending = PendingWork::new();
        pending.track(&file);

        let first = pending.rollback();
        assert_eq!(first.removed, vec![file.clone()]);
        let second = pending.rollback();
        assert_eq!(second, RollbackReport::default());
    }

    #[test]
    fn test_rollback_missing_path_counts_as_removed() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("gone");

        let pending = PendingWork::new();
        pending.track(&missing);

        let report = pending.rollback();
        assert!(report.is_clean());
        assert_eq!(report.removed, vec![missing]);
    }

    #[test]
    fn test_rollback_guard_reentrance() {
        let pending = PendingWork::new();
        pending.rolling_back.store(true, Ordering::SeqCst);
        pending.track("/nonexistent/path");

        let report = pending.rollback();
        assert!(report.skipped);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_guard_rolls_back_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("partial");
        fs::write(&file, "x").unwrap();

        let pending = PendingWork::new();
        pending.track(&file);
        {
            let _guard = RollbackGuard::new(&pending);
        }
        assert!(!file.exists());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_guard_disarm_clears_without_deleting() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("kept");
        fs::write(&file, "x").unwrap();

        let pending = PendingWork::new();
        pending.track(&file);
        RollbackGuard::new(&pending).disarm();

        assert!(file.exists());
        assert!(pending.is_empty());
    }
}
