//! GitLab REST v4 adapter.
//!
//! GitLab "projects" are repositories, "groups" are namespaces and "merge
//! requests" are pull requests.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::scm::error::ScmError;
use crate::scm::http::{self, Page};
use crate::scm::types::{
    Branch, GitIdentity, NewPullRequest, PullRequest, PullRequestFilter, PullRequestState,
    Repository, RepositoryHandle,
};
use crate::scm::{ScmProvider, ScmSettings};

const BACKEND: &str = "gitlab";
const PER_PAGE: &str = "100";

/// How requests authenticate.
enum GitLabAuth {
    /// `Authorization: Bearer <token>`.
    OAuth(String),
    /// `PRIVATE-TOKEN: <token>`.
    Private(String),
}

/// Handle stored on repositories produced by this adapter.
#[derive(Debug, Clone, Copy)]
struct GitLabProjectHandle {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct NamespaceResponse {
    #[serde(default)]
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    id: u64,
    name: String,
    path_with_namespace: String,
    http_url_to_repo: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    archived: bool,
    namespace: NamespaceResponse,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    committed_date: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
    commit: CommitResponse,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    username: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestResponse {
    iid: u64,
    title: String,
    source_branch: String,
    target_branch: String,
    web_url: String,
    state: String,
    #[serde(default)]
    author: Option<UserRef>,
}

impl From<ProjectResponse> for Repository {
    fn from(project: ProjectResponse) -> Self {
        Self {
            id: project.id.to_string(),
            name: project.name,
            full_path: project.path_with_namespace,
            clone_url: project.http_url_to_repo,
            default_branch: project.default_branch.unwrap_or_default(),
            archived: project.archived,
            namespace: project.namespace.full_path,
            handle: Some(RepositoryHandle::new(GitLabProjectHandle { id: project.id })),
        }
    }
}

impl From<MergeRequestResponse> for PullRequest {
    fn from(mr: MergeRequestResponse) -> Self {
        Self {
            id: mr.iid.to_string(),
            title: mr.title,
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            web_url: mr.web_url,
            state: PullRequestState::from_backend(&mr.state),
            author: mr.author.map(|a| a.username),
        }
    }
}

/// GitLab implementation of [`ScmProvider`].
pub struct GitLabProvider {
    client: Client,
    api_base: Url,
    auth: GitLabAuth,
    identity: GitIdentity,
}

impl GitLabProvider {
    /// Creates the adapter. Prefers the OAuth token over the private token.
    pub fn new(settings: &ScmSettings) -> Result<Self> {
        let auth = http::non_empty(settings.gitlab_oauth_token.as_deref())
            .map(|t| GitLabAuth::OAuth(t.to_string()))
            .or_else(|| {
                http::non_empty(settings.gitlab_private_token.as_deref())
                    .map(|t| GitLabAuth::Private(t.to_string()))
            })
            .ok_or_else(|| {
                ScmError::Configuration(
                    "GitLab requires GITLAB_OAUTH_TOKEN or GITLAB_PRIVATE_TOKEN".to_string(),
                )
            })?;

        let base = http::parse_base_url(&settings.url)?;
        Ok(Self {
            client: http::build_http_client()?,
            api_base: http::endpoint(&base, &["api", "v4"], &[]),
            auth,
            identity: settings.git_identity.clone(),
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        http::endpoint(&self.api_base, segments, query)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.auth {
            GitLabAuth::OAuth(ref token) => builder.bearer_auth(token),
            GitLabAuth::Private(ref token) => builder.header("PRIVATE-TOKEN", token),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, url: Url) -> Result<T> {
        http::send_json(BACKEND, what, self.request(Method::GET, url)).await
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        what: String,
        mut url: Url,
        page: u64,
    ) -> Result<Page<T>> {
        url.query_pairs_mut()
            .append_pair("per_page", PER_PAGE)
            .append_pair("page", &page.to_string());
        debug!(url = %url, "Fetching GitLab page");
        let response = http::send(BACKEND, &what, self.request(Method::GET, url)).await?;
        let next = next_page(response.headers());
        let items = http::decode_json(response).await?;
        Ok(Page { items, next })
    }

    async fn fetch_project(&self, project_id: u64) -> Result<Repository> {
        let id = project_id.to_string();
        let project: ProjectResponse = self
            .get_json(&format!("project {id}"), self.url(&["projects", &id], &[]))
            .await?;
        Ok(project.into())
    }

    async fn fetch_branch(&self, project_id: u64, branch_name: &str) -> Result<BranchResponse> {
        let id = project_id.to_string();
        self.get_json(
            &format!("branch '{branch_name}' of project {id}"),
            self.url(&["projects", &id, "repository", "branches", branch_name], &[]),
        )
        .await
    }
}

fn parse_project_id(repo_id: &str) -> Result<u64> {
    repo_id
        .trim()
        .parse::<u64>()
        .map_err(|_| ScmError::NotFound(format!("GitLab project '{repo_id}'")).into())
}

fn project_id(repo: &Repository) -> Result<u64> {
    match repo
        .handle
        .as_ref()
        .and_then(|h| h.downcast_ref::<GitLabProjectHandle>())
    {
        Some(handle) => Ok(handle.id),
        None => parse_project_id(&repo.id),
    }
}

fn next_page(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("x-next-page")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl ScmProvider for GitLabProvider {
    fn provider_name(&self) -> &'static str {
        BACKEND
    }

    fn git_identity(&self) -> &GitIdentity {
        &self.identity
    }

    fn list_repositories<'a>(
        &'a self,
        namespace_id: Option<&'a str>,
        include_subgroups: bool,
    ) -> BoxStream<'a, Result<Repository>> {
        let Some(namespace_id) = namespace_id else {
            let url = self.url(&["projects"], &[]);
            return http::paginate(1, move |page| {
                self.get_page::<ProjectResponse>("projects".to_string(), url.clone(), page)
            })
            .map_ok(Repository::from)
            .boxed();
        };

        // Numeric id or full group path; the path is sent as one encoded segment.
        let group_id = namespace_id.trim().to_string();
        if group_id.is_empty() {
            let err = anyhow::Error::from(ScmError::NotFound(format!(
                "GitLab group '{namespace_id}'"
            )));
            return futures::stream::once(async move { Err::<Repository, _>(err) }).boxed();
        }

        let subgroups = if include_subgroups { "true" } else { "false" };
        let url = self.url(
            &["groups", &group_id, "projects"],
            &[("include_subgroups", subgroups)],
        );
        let what = format!("group {group_id}");

        // Group listings return partial projects; fetch each one in full.
        http::paginate(1, move |page| {
            self.get_page::<ProjectRef>(what.clone(), url.clone(), page)
        })
        .and_then(move |entry| self.fetch_project(entry.id))
        .boxed()
    }

    fn get_repository<'a>(&'a self, repo_id: &'a str) -> BoxFuture<'a, Result<Repository>> {
        Box::pin(async move {
            let id = parse_project_id(repo_id)?;
            self.fetch_project(id).await
        })
    }

    fn get_default_branch<'a>(&'a self, repo: &'a Repository) -> BoxFuture<'a, Result<Branch>> {
        Box::pin(async move {
            if repo.default_branch.is_empty() {
                return Err(ScmError::NotFound(format!(
                    "default branch of '{}' (empty repository)",
                    repo.full_path
                ))
                .into());
            }
            let branch = self
                .fetch_branch(project_id(repo)?, &repo.default_branch)
                .await?;
            Ok(Branch {
                name: branch.name,
                commit_sha: branch.commit.id,
                commit_message: branch.commit.message,
                committed_at: branch.commit.committed_date.map(|d| d.with_timezone(&Utc)),
            })
        })
    }

    fn branch_exists<'a>(
        &'a self,
        repo: &'a Repository,
        branch_name: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let result = match project_id(repo) {
                Ok(id) => self.fetch_branch(id, branch_name).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => true,
                Err(e) => {
                    debug!(
                        repository_id = %repo.id,
                        branch = branch_name,
                        "Branch lookup failed, treating as absent: {e:#}"
                    );
                    false
                }
            }
        })
    }

    fn fetch_open_pull_requests<'a>(
        &'a self,
        repo: &'a Repository,
        filter: &'a PullRequestFilter,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
        Box::pin(async move {
            let id = project_id(repo)?.to_string();
            let mut query = vec![("state", "opened")];
            if let Some(ref author) = filter.author {
                query.push(("author_username", author.as_str()));
            }
            if let Some(ref search) = filter.title_contains {
                query.push(("search", search.as_str()));
                query.push(("in", "title"));
            }
            let url = self.url(&["projects", &id, "merge_requests"], &query);
            let what = format!("merge requests of project {id}");

            http::paginate(1, move |page| {
                self.get_page::<MergeRequestResponse>(what.clone(), url.clone(), page)
            })
            .map_ok(PullRequest::from)
            .try_collect()
            .await
        })
    }

    fn create_pull_request<'a>(
        &'a self,
        repo: &'a Repository,
        request: &'a NewPullRequest,
    ) -> BoxFuture<'a, Result<PullRequest>> {
        Box::pin(async move {
            let id = project_id(repo)?.to_string();
            let body = serde_json::json!({
                "source_branch": request.source_branch,
                "target_branch": request.target_branch,
                "title": request.title,
                "description": request.description,
            });
            let builder = self
                .request(Method::POST, self.url(&["projects", &id, "merge_requests"], &[]))
                .json(&body);
            let mr: MergeRequestResponse =
                http::send_json(BACKEND, &format!("project {id}"), builder).await?;
            Ok(mr.into())
        })
    }

    fn get_authenticated_clone_url(&self, repo: &Repository) -> Result<String> {
        match self.auth {
            GitLabAuth::OAuth(ref token) => {
                http::authenticated_url(&repo.clone_url, "oauth2", token)
            }
            GitLabAuth::Private(ref token) => {
                http::authenticated_url(&repo.clone_url, "gitlab-ci-token", token)
            }
        }
    }
}
