//! Backend-agnostic source-control facade.
//!
//! The orchestrator talks to [`ScmProvider`] only. Each backend adapter
//! implements the required methods; namespace matching, pull-request
//! filtering and working-copy identity are implemented once here and shared
//! by every adapter.

pub mod bitbucket;
pub mod error;
pub mod gitlab;
pub(crate) mod http;
pub mod types;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

pub use bitbucket::BitbucketServerProvider;
pub use error::ScmError;
pub use gitlab::GitLabProvider;
pub use types::{
    Branch, GitIdentity, NewPullRequest, PullRequest, PullRequestFilter, PullRequestState,
    Repository, RepositoryHandle,
};

/// Capability set every SCM backend provides.
pub trait ScmProvider: Send + Sync {
    /// Backend name used in logs (`gitlab`, `bitbucket_server`).
    fn provider_name(&self) -> &'static str;

    /// Identity written into working copies.
    fn git_identity(&self) -> &GitIdentity;

    /// Lists repositories, optionally restricted to a namespace.
    ///
    /// The stream is lazy and finite; calling again starts a fresh listing.
    /// Backends without nested namespaces ignore `include_subgroups`.
    fn list_repositories<'a>(
        &'a self,
        namespace_id: Option<&'a str>,
        include_subgroups: bool,
    ) -> BoxStream<'a, Result<Repository>>;

    /// Fetches one repository; fails with [`ScmError::NotFound`] for unknown
    /// or malformed ids.
    fn get_repository<'a>(&'a self, repo_id: &'a str) -> BoxFuture<'a, Result<Repository>>;

    /// Returns the head of the default branch.
    ///
    /// When only the commit-detail lookup fails, a degraded [`Branch`] is
    /// returned instead of an error.
    fn get_default_branch<'a>(&'a self, repo: &'a Repository) -> BoxFuture<'a, Result<Branch>>;

    /// Checks whether a branch exists. Backend errors resolve to `false`.
    fn branch_exists<'a>(&'a self, repo: &'a Repository, branch_name: &'a str)
        -> BoxFuture<'a, bool>;

    /// Fetches open pull requests, using whatever server-side filtering the
    /// backend supports. Callers use [`ScmProvider::list_open_pull_requests`].
    fn fetch_open_pull_requests<'a>(
        &'a self,
        repo: &'a Repository,
        filter: &'a PullRequestFilter,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>>;

    /// Opens a pull request. Not idempotent and never retried here.
    fn create_pull_request<'a>(
        &'a self,
        repo: &'a Repository,
        request: &'a NewPullRequest,
    ) -> BoxFuture<'a, Result<PullRequest>>;

    /// Returns the clone URL with credentials in the user-info component.
    fn get_authenticated_clone_url(&self, repo: &Repository) -> Result<String>;

    /// Lists open pull requests matching `filter`.
    ///
    /// The filter is always re-applied client-side so results are identical
    /// whether or not the backend filtered on the server.
    fn list_open_pull_requests<'a>(
        &'a self,
        repo: &'a Repository,
        filter: &'a PullRequestFilter,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
        Box::pin(async move {
            let pull_requests = self.fetch_open_pull_requests(repo, filter).await?;
            Ok(pull_requests
                .into_iter()
                .filter(|pr| pr.state == PullRequestState::Open && filter.matches(pr))
                .collect())
        })
    }

    /// Writes the commit identity into the working copy at `repo_path`.
    fn configure_git_credentials(&self, repo_path: &Path) -> Result<()> {
        crate::git::set_commit_identity(repo_path, self.git_identity())
    }

    /// Checks whether the repository's namespace is in `ignored_namespaces`.
    fn is_namespace_ignored(&self, repo: &Repository, ignored_namespaces: &[String]) -> bool {
        is_namespace_ignored(&repo.namespace, ignored_namespaces)
    }
}

/// True if any entry case-insensitively equals a `/`-segment of `namespace`.
pub fn is_namespace_ignored(namespace: &str, ignored_namespaces: &[String]) -> bool {
    namespace.split('/').any(|segment| {
        let segment = segment.to_lowercase();
        ignored_namespaces
            .iter()
            .any(|ignored| ignored.to_lowercase() == segment)
    })
}

/// Supported SCM backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScmProviderKind {
    /// GitLab (self-hosted or gitlab.com).
    #[default]
    GitLab,
    /// Bitbucket Server / Data Center.
    BitbucketServer,
}

impl FromStr for ScmProviderKind {
    type Err = ScmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gitlab" => Ok(Self::GitLab),
            "bitbucket_server" | "bitbucket-server" => Ok(Self::BitbucketServer),
            other => Err(ScmError::Configuration(format!(
                "unsupported SCM provider '{other}'. Supported providers: gitlab, bitbucket_server"
            ))),
        }
    }
}

impl fmt::Display for ScmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitLab => write!(f, "gitlab"),
            Self::BitbucketServer => write!(f, "bitbucket_server"),
        }
    }
}

/// Connection settings for an SCM backend.
#[derive(Clone, Default)]
pub struct ScmSettings {
    /// Backend to talk to.
    pub provider: ScmProviderKind,
    /// API base URL.
    pub url: String,
    /// Identity for commits in working copies.
    pub git_identity: GitIdentity,
    /// GitLab OAuth token.
    pub gitlab_oauth_token: Option<String>,
    /// GitLab private/personal access token.
    pub gitlab_private_token: Option<String>,
    /// Bitbucket username for basic auth.
    pub bitbucket_username: Option<String>,
    /// Bitbucket password for basic auth.
    pub bitbucket_password: Option<String>,
    /// Bitbucket personal access token.
    pub bitbucket_token: Option<String>,
}

impl fmt::Debug for ScmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScmSettings")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("git_identity", &self.git_identity)
            .field("gitlab_oauth_token", &self.gitlab_oauth_token.as_ref().map(|_| "***"))
            .field("gitlab_private_token", &self.gitlab_private_token.as_ref().map(|_| "***"))
            .field("bitbucket_username", &self.bitbucket_username)
            .field("bitbucket_password", &self.bitbucket_password.as_ref().map(|_| "***"))
            .field("bitbucket_token", &self.bitbucket_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Creates the adapter selected by `settings.provider`.
///
/// Fails with [`ScmError::Configuration`] when the backend's credentials are
/// missing.
pub fn create_scm_provider(settings: &ScmSettings) -> Result<Box<dyn ScmProvider>> {
    match settings.provider {
        ScmProviderKind::GitLab => Ok(Box::new(GitLabProvider::new(settings)?)),
        ScmProviderKind::BitbucketServer => Ok(Box::new(BitbucketServerProvider::new(settings)?)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ignored(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn namespace_matches_any_segment_case_insensitively() {
        assert!(is_namespace_ignored("Platform/Archive/legacy", &ignored(&["archive"])));
        assert!(is_namespace_ignored("platform", &ignored(&["PLATFORM"])));
        assert!(!is_namespace_ignored("platform/archive-2020", &ignored(&["archive"])));
        assert!(!is_namespace_ignored("platform/team", &ignored(&[])));
    }

    #[test]
    fn namespace_match_is_exact_per_segment() {
        assert!(!is_namespace_ignored("platform/team", &ignored(&["platform/team"])));
        assert!(!is_namespace_ignored("platform/team", &ignored(&["tea"])));
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("gitlab".parse::<ScmProviderKind>().unwrap(), ScmProviderKind::GitLab);
        assert_eq!(
            "Bitbucket_Server".parse::<ScmProviderKind>().unwrap(),
            ScmProviderKind::BitbucketServer
        );
        let err = "github".parse::<ScmProviderKind>().unwrap_err();
        assert!(matches!(err, ScmError::Configuration(_)));
    }

    #[test]
    fn factory_rejects_missing_credentials() {
        let mut settings = ScmSettings {
            url: "https://gitlab.example.com".to_string(),
            ..Default::default()
        };
        let err = create_scm_provider(&settings)
            .err()
            .expect("missing token must fail");
        assert!(matches!(
            err.downcast_ref::<ScmError>(),
            Some(ScmError::Configuration(_))
        ));

        settings.provider = ScmProviderKind::BitbucketServer;
        let err = create_scm_provider(&settings)
            .err()
            .expect("missing credentials must fail");
        assert!(matches!(
            err.downcast_ref::<ScmError>(),
            Some(ScmError::Configuration(_))
        ));
    }

    #[test]
    fn settings_debug_redacts_secrets() {
        let settings = ScmSettings {
            url: "https://gitlab.example.com".to_string(),
            gitlab_oauth_token: Some("super-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("***"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ignored_iff_some_segment_matches(
                segments in proptest::collection::vec("[A-Za-z0-9_-]{1,8}", 1..5),
                ignore_list in proptest::collection::vec("[A-Za-z0-9_-]{1,8}", 0..4),
            ) {
                let namespace = segments.join("/");
                let expected = ignore_list.iter().any(|entry| {
                    segments.iter().any(|segment| segment.to_lowercase() == entry.to_lowercase())
                });
                prop_assert_eq!(is_namespace_ignored(&namespace, &ignore_list), expected);
            }

            #[test]
            fn case_changes_never_affect_the_result(
                segments in proptest::collection::vec("[a-z0-9_-]{1,8}", 1..5),
                pick in any::<proptest::sample::Index>(),
            ) {
                let namespace = segments.join("/");
                let chosen = segments[pick.index(segments.len())].to_uppercase();
                prop_assert!(is_namespace_ignored(&namespace, &[chosen]));
            }
        }
    }
}
