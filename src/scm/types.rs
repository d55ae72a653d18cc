//! Backend-agnostic SCM entities.
//!
//! GitLab calls repositories "projects" and pull requests "merge requests";
//! Bitbucket Server uses "projects" for what GitLab calls groups. The types
//! here use one vocabulary and leave the translation to the adapters.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend-owned association attached to a [`Repository`].
///
/// Only the adapter that produced the repository interprets the handle.
/// Everything else treats it as opaque, and adapters fall back to the
/// repository id when the handle is absent or belongs to another backend.
#[derive(Clone)]
pub struct RepositoryHandle(Arc<dyn Any + Send + Sync>);

impl RepositoryHandle {
    /// Wraps a backend-specific value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Returns the wrapped value if it has the requested type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RepositoryHandle(..)")
    }
}

/// A repository as seen by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    /// Stable backend identifier (GitLab: project id, Bitbucket: `KEY/slug`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Full hierarchical path including the namespace.
    pub full_path: String,
    /// HTTP clone URL without credentials.
    pub clone_url: String,
    /// Name of the default branch; empty for repositories without commits.
    pub default_branch: String,
    /// Whether the repository is archived.
    pub archived: bool,
    /// `/`-delimited namespace path (GitLab group path, Bitbucket project key).
    pub namespace: String,
    /// Opaque adapter handle.
    #[serde(skip)]
    pub handle: Option<RepositoryHandle>,
}

/// Head of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    /// Branch name.
    pub name: String,
    /// Latest commit hash; empty when the lookup was degraded.
    pub commit_sha: String,
    /// Latest commit message; empty when the lookup was degraded.
    pub commit_message: String,
    /// Commit timestamp, when the backend reported one.
    pub committed_at: Option<DateTime<Utc>>,
}

impl Branch {
    /// Returns a branch with no commit metadata.
    pub fn degraded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit_sha: String::new(),
            commit_message: String::new(),
            committed_at: None,
        }
    }
}

/// Pull request lifecycle state. Owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    /// Open for review.
    Open,
    /// Closed without merging.
    Closed,
    /// Merged into the target branch.
    Merged,
}

impl PullRequestState {
    /// Normalises a backend state string (`opened`, `OPEN`, `merged`, `DECLINED`, ...).
    pub fn from_backend(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "open" | "opened" => Self::Open,
            "merged" => Self::Merged,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// A pull request (GitLab: merge request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    /// Backend identifier, unique within the repository.
    pub id: String,
    /// Title.
    pub title: String,
    /// Source branch name.
    pub source_branch: String,
    /// Target branch name.
    pub target_branch: String,
    /// Browser URL.
    pub web_url: String,
    /// Current state.
    pub state: PullRequestState,
    /// Author username, when the backend reports it.
    pub author: Option<String>,
}

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    /// Branch carrying the changes.
    pub source_branch: String,
    /// Branch to merge into.
    pub target_branch: String,
    /// Title.
    pub title: String,
    /// Markdown description.
    pub description: String,
}

/// Filters for listing open pull requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestFilter {
    /// Only pull requests authored by this username (case-insensitive).
    pub author: Option<String>,
    /// Only pull requests whose title contains this text (case-insensitive).
    pub title_contains: Option<String>,
}

impl PullRequestFilter {
    /// Returns true if the pull request satisfies every configured filter.
    pub fn matches(&self, pull_request: &PullRequest) -> bool {
        if let Some(ref author) = self.author {
            match pull_request.author {
                Some(ref pr_author) if pr_author.eq_ignore_ascii_case(author) => {}
                _ => return false,
            }
        }

        if let Some(ref needle) = self.title_contains {
            if !pull_request
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }

        true
    }
}

/// Identity written into working copies for commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    /// `user.name`.
    pub name: String,
    /// `user.email`, if configured.
    pub email: Option<String>,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "AI Analyzer".to_string(),
            email: None,
        }
    }
}
