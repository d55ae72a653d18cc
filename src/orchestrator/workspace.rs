//! Scoped local working directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Deletes its directory when dropped.
///
/// Release also happens when the owning future is dropped by an outer
/// timeout or unwinds from a panic.
#[derive(Debug)]
pub struct WorkingDirGuard {
    path: PathBuf,
}

impl WorkingDirGuard {
    /// Removes whatever is left at `path` from an earlier run and guards it.
    pub async fn prepare(path: PathBuf) -> Result<Self> {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Removing stale working directory");
            tokio::fs::remove_dir_all(&path)
                .await
                .with_context(|| format!("Failed to remove stale directory {}", path.display()))?;
        }
        Ok(Self { path })
    }

    /// Guarded directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed working directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to remove working directory: {e}"),
        }
    }
}
