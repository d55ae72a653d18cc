//! Local working-copy operations.

pub mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use git2::{ConfigLevel, Repository};

use crate::scm::GitIdentity;

pub use cli::GitCli;

/// A cloned repository on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    path: PathBuf,
    branch: String,
}

impl WorkingCopy {
    /// Creates a handle for a working copy at `path` with `branch` checked out.
    pub fn new(path: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            branch: branch.into(),
        }
    }

    /// Working-copy root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Currently checked-out branch.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Records a branch switch.
    pub fn set_branch(&mut self, branch: impl Into<String>) {
        self.branch = branch.into();
    }
}

/// Clone, branch, commit and push primitives.
pub trait VersionControl: Send + Sync {
    /// Clones `url` into `path`, checking out `branch` (the remote HEAD when
    /// empty).
    fn clone_repository<'a>(
        &'a self,
        url: &'a str,
        path: &'a Path,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<WorkingCopy>>;

    /// Creates `name` from the current HEAD and switches to it.
    fn create_branch<'a>(
        &'a self,
        copy: &'a mut WorkingCopy,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Stages every change, including deletions and untracked files.
    fn stage_all<'a>(&'a self, copy: &'a WorkingCopy) -> BoxFuture<'a, Result<()>>;

    /// Commits the staged changes. Fails when nothing is staged.
    fn commit<'a>(&'a self, copy: &'a WorkingCopy, message: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Pushes `branch` to `origin`.
    fn push<'a>(
        &'a self,
        copy: &'a WorkingCopy,
        branch: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<()>>;

    /// Releases any handles held for the working copy. Does not delete it.
    fn close(&self, copy: WorkingCopy) -> Result<()>;
}

/// Writes `user.name` and, when configured, `user.email` into the working
/// copy's local git config.
pub fn set_commit_identity(repo_path: &Path, identity: &GitIdentity) -> Result<()> {
    let repo = Repository::open(repo_path)
        .with_context(|| format!("Failed to open git repository at {}", repo_path.display()))?;
    let mut config = repo
        .config()
        .and_then(|c| c.open_level(ConfigLevel::Local))
        .context("Failed to open repository config")?;

    config
        .set_str("user.name", &identity.name)
        .context("Failed to set user.name")?;
    if let Some(ref email) = identity.email {
        config
            .set_str("user.email", email)
            .context("Failed to set user.email")?;
    }
    Ok(())
}
