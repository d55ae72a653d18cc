//! Applicability checks run before a repository's pipeline.

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::orchestrator::naming::{idempotency_branch, SIGNATURE_TITLE};
use crate::orchestrator::OrchestratorConfig;
use crate::scm::{Branch, PullRequest, PullRequestFilter, Repository, ScmProvider};

/// Why a repository was not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The repository is archived.
    Archived,
    /// A namespace segment is in the ignore list.
    NamespaceIgnored,
    /// The repository id is in the ignore list.
    RepositoryIgnored,
    /// The repository has no default branch (no commits yet).
    EmptyRepository,
    /// The default branch head is this tool's own commit.
    AlreadyAnalyzed,
    /// The default branch was last committed to `days` days ago.
    Stale {
        /// Age of the last commit.
        days: i64,
    },
    /// Today's branch already exists.
    BranchExists(String),
    /// An open pull request from this tool already exists.
    OpenPullRequest(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archived => write!(f, "repository is archived"),
            Self::NamespaceIgnored => write!(f, "namespace is ignored"),
            Self::RepositoryIgnored => write!(f, "repository is ignored"),
            Self::EmptyRepository => write!(f, "repository has no default branch"),
            Self::AlreadyAnalyzed => write!(f, "latest commit is already an analysis commit"),
            Self::Stale { days } => write!(f, "last commit was {days} days ago"),
            Self::BranchExists(branch) => write!(f, "branch '{branch}' already exists"),
            Self::OpenPullRequest(url) => write!(f, "open pull request already exists: {url}"),
        }
    }
}

/// Result of the applicability checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    /// Run the pipeline; carries the default branch head that was inspected.
    Applicable(Branch),
    /// Do not run the pipeline.
    Skip(SkipReason),
}

/// Decides whether `repo` should be processed at `now`.
///
/// Checks run cheapest first and stop at the first failing one. Errors from
/// backend lookups are returned to the caller.
pub async fn check_applicability(
    scm: &dyn ScmProvider,
    repo: &Repository,
    config: &OrchestratorConfig,
    now: DateTime<Utc>,
) -> Result<Applicability> {
    if repo.archived {
        return Ok(Applicability::Skip(SkipReason::Archived));
    }
    if scm.is_namespace_ignored(repo, &config.ignored_namespaces) {
        return Ok(Applicability::Skip(SkipReason::NamespaceIgnored));
    }
    if config.ignored_repository_ids.iter().any(|id| *id == repo.id) {
        return Ok(Applicability::Skip(SkipReason::RepositoryIgnored));
    }
    if repo.default_branch.is_empty() {
        return Ok(Applicability::Skip(SkipReason::EmptyRepository));
    }

    let branch = scm
        .get_default_branch(repo)
        .await
        .context("Failed to get default branch")?;
    debug!(
        branch = %branch.name,
        commit = %branch.commit_sha,
        committed_at = ?branch.committed_at,
        "Inspected default branch"
    );

    if branch.commit_message.contains(SIGNATURE_TITLE) {
        return Ok(Applicability::Skip(SkipReason::AlreadyAnalyzed));
    }

    if let (Some(max_days), Some(committed_at)) =
        (config.max_days_since_last_commit, branch.committed_at)
    {
        let days = (now - committed_at).num_days();
        if days > max_days {
            return Ok(Applicability::Skip(SkipReason::Stale { days }));
        }
    }

    let todays_branch = idempotency_branch(now.date_naive());
    if scm.branch_exists(repo, &todays_branch).await {
        return Ok(Applicability::Skip(SkipReason::BranchExists(todays_branch)));
    }

    let filter = PullRequestFilter {
        author: config.pull_request_author.clone(),
        title_contains: Some(SIGNATURE_TITLE.to_string()),
    };
    let open = scm
        .list_open_pull_requests(repo, &filter)
        .await
        .context("Failed to list open pull requests")?;
    if let Some(PullRequest { web_url, .. }) = open.into_iter().next() {
        return Ok(Applicability::Skip(SkipReason::OpenPullRequest(web_url)));
    }

    Ok(Applicability::Applicable(branch))
}
