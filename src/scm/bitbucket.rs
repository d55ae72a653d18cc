//! Bitbucket Server (Data Center) REST 1.0 adapter.
//!
//! Bitbucket "projects" play the role of namespaces and have no nesting, so
//! `include_subgroups` is ignored. Repositories are addressed as
//! `<project_key>/<repo_slug>`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::scm::error::ScmError;
use crate::scm::http::{self, Page};
use crate::scm::types::{
    Branch, GitIdentity, NewPullRequest, PullRequest, PullRequestFilter, PullRequestState,
    Repository, RepositoryHandle,
};
use crate::scm::{ScmProvider, ScmSettings};

const BACKEND: &str = "bitbucket_server";
const PAGE_LIMIT: &str = "100";
const FALLBACK_DEFAULT_BRANCH: &str = "main";

enum BitbucketAuth {
    Token(String),
    Basic { username: String, password: String },
}

/// Handle stored on repositories produced by this adapter.
#[derive(Debug, Clone)]
struct BitbucketRepoHandle {
    project_key: String,
    slug: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagedResponse<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default)]
    is_last_page: bool,
    #[serde(default)]
    next_page_start: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoLinks {
    #[serde(default)]
    clone: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    slug: String,
    name: String,
    project: ProjectResponse,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    links: RepoLinks,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchResponse {
    display_id: String,
    #[serde(default)]
    latest_commit: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    committer_timestamp: Option<i64>,
    #[serde(default)]
    author_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ParticipantResponse {
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefResponse {
    display_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequestLinks {
    #[serde(rename = "self", default)]
    self_links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestResponse {
    id: u64,
    title: String,
    state: String,
    from_ref: RefResponse,
    to_ref: RefResponse,
    #[serde(default)]
    author: Option<ParticipantResponse>,
    #[serde(default)]
    links: PullRequestLinks,
}

/// Bitbucket Server implementation of [`ScmProvider`].
pub struct BitbucketServerProvider {
    client: Client,
    base_url: Url,
    api_base: Url,
    auth: BitbucketAuth,
    identity: GitIdentity,
}

impl BitbucketServerProvider {
    /// Creates the adapter. Prefers the access token over basic auth.
    pub fn new(settings: &ScmSettings) -> Result<Self> {
        let auth = if let Some(token) = http::non_empty(settings.bitbucket_token.as_deref()) {
            BitbucketAuth::Token(token.to_string())
        } else {
            match (
                http::non_empty(settings.bitbucket_username.as_deref()),
                http::non_empty(settings.bitbucket_password.as_deref()),
            ) {
                (Some(username), Some(password)) => BitbucketAuth::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                },
                _ => {
                    return Err(ScmError::Configuration(
                        "Bitbucket Server requires BITBUCKET_TOKEN or both BITBUCKET_USERNAME and BITBUCKET_PASSWORD"
                            .to_string(),
                    )
                    .into())
                }
            }
        };

        let base_url = http::parse_base_url(&settings.url)?;
        let api_base = http::endpoint(&base_url, &["rest", "api", "1.0"], &[]);
        Ok(Self {
            client: http::build_http_client()?,
            base_url,
            api_base,
            auth,
            identity: settings.git_identity.clone(),
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        http::endpoint(&self.api_base, segments, query)
    }

    fn repo_url(&self, handle: &BitbucketRepoHandle, tail: &[&str], query: &[(&str, &str)]) -> Url {
        let mut segments = vec![
            "projects",
            handle.project_key.as_str(),
            "repos",
            handle.slug.as_str(),
        ];
        segments.extend_from_slice(tail);
        self.url(&segments, query)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.auth {
            BitbucketAuth::Token(ref token) => builder.bearer_auth(token),
            BitbucketAuth::Basic {
                ref username,
                ref password,
            } => builder.basic_auth(username, Some(password)),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, url: Url) -> Result<T> {
        http::send_json(BACKEND, what, self.request(Method::GET, url)).await
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        what: String,
        mut url: Url,
        start: u64,
    ) -> Result<Page<T>> {
        url.query_pairs_mut()
            .append_pair("limit", PAGE_LIMIT)
            .append_pair("start", &start.to_string());
        debug!(url = %url, "Fetching Bitbucket page");
        let page: PagedResponse<T> = self.get_json(&what, url).await?;
        let next = if page.is_last_page {
            None
        } else {
            page.next_page_start
        };
        Ok(Page {
            items: page.values,
            next,
        })
    }

    /// Lazily lists the repositories of one project.
    fn project_repositories<'a>(
        &'a self,
        project_key: String,
    ) -> BoxStream<'a, Result<Repository>> {
        let url = self.url(&["projects", &project_key, "repos"], &[]);
        let what = format!("project {project_key}");
        http::paginate(0, move |start| {
            self.get_page::<RepoResponse>(what.clone(), url.clone(), start)
        })
        .and_then(move |repo| self.build_repository(repo))
        .boxed()
    }

    /// Converts a listing entry, resolving its default branch.
    async fn build_repository(&self, repo: RepoResponse) -> Result<Repository> {
        let handle = BitbucketRepoHandle {
            project_key: repo.project.key,
            slug: repo.slug,
        };
        let default_branch = self.resolve_default_branch_name(&handle).await;
        let clone_url = repo
            .links
            .clone
            .iter()
            .find(|link| link.name.as_deref() == Some("http"))
            .map(|link| link.href.clone())
            .unwrap_or_default();

        Ok(Repository {
            id: format!("{}/{}", handle.project_key, handle.slug),
            name: repo.name,
            full_path: format!("{}/{}", handle.project_key, handle.slug),
            clone_url,
            default_branch,
            archived: repo.archived,
            namespace: handle.project_key.clone(),
            handle: Some(RepositoryHandle::new(handle)),
        })
    }

    /// Fetches the default branch head. `Ok(None)` means the repository has
    /// no commits.
    async fn fetch_default_branch(
        &self,
        handle: &BitbucketRepoHandle,
    ) -> Result<Option<BranchResponse>> {
        let url = self.repo_url(handle, &["branches", "default"], &[]);
        let what = format!("default branch of {}/{}", handle.project_key, handle.slug);
        let response = http::send(BACKEND, &what, self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(http::decode_json(response).await?))
    }

    async fn resolve_default_branch_name(&self, handle: &BitbucketRepoHandle) -> String {
        match self.fetch_default_branch(handle).await {
            Ok(Some(branch)) => branch.display_id,
            Ok(None) => String::new(),
            Err(e) => {
                debug!(
                    repository_id = %format!("{}/{}", handle.project_key, handle.slug),
                    "Default branch lookup failed, assuming '{FALLBACK_DEFAULT_BRANCH}': {e:#}"
                );
                FALLBACK_DEFAULT_BRANCH.to_string()
            }
        }
    }

    async fn fetch_commit(
        &self,
        handle: &BitbucketRepoHandle,
        sha: &str,
    ) -> Result<CommitResponse> {
        self.get_json(
            &format!("commit {sha}"),
            self.repo_url(handle, &["commits", sha], &[]),
        )
        .await
    }

    fn pull_request_url(&self, handle: &BitbucketRepoHandle, id: u64) -> String {
        http::endpoint(
            &self.base_url,
            &[
                "projects",
                &handle.project_key,
                "repos",
                &handle.slug,
                "pull-requests",
                &id.to_string(),
            ],
            &[],
        )
        .to_string()
    }

    fn to_pull_request(
        &self,
        handle: &BitbucketRepoHandle,
        pr: PullRequestResponse,
    ) -> PullRequest {
        let web_url = pr
            .links
            .self_links
            .into_iter()
            .next()
            .map_or_else(|| self.pull_request_url(handle, pr.id), |link| link.href);
        PullRequest {
            id: pr.id.to_string(),
            title: pr.title,
            source_branch: pr.from_ref.display_id,
            target_branch: pr.to_ref.display_id,
            web_url,
            state: PullRequestState::from_backend(&pr.state),
            author: pr.author.map(|a| a.user.name),
        }
    }
}

/// Splits `KEY/slug` into its parts; anything else is not found.
fn parse_repo_id(repo_id: &str) -> Result<BitbucketRepoHandle> {
    match repo_id.split_once('/') {
        Some((key, slug)) if !key.is_empty() && !slug.is_empty() && !slug.contains('/') => {
            Ok(BitbucketRepoHandle {
                project_key: key.to_string(),
                slug: slug.to_string(),
            })
        }
        _ => Err(ScmError::NotFound(format!("Bitbucket repository '{repo_id}'")).into()),
    }
}

fn repo_handle(repo: &Repository) -> Result<BitbucketRepoHandle> {
    match repo
        .handle
        .as_ref()
        .and_then(|h| h.downcast_ref::<BitbucketRepoHandle>())
    {
        Some(handle) => Ok(handle.clone()),
        None => parse_repo_id(&repo.id),
    }
}

fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

fn ref_body(branch: &str, handle: &BitbucketRepoHandle) -> serde_json::Value {
    serde_json::json!({
        "id": format!("refs/heads/{branch}"),
        "repository": {
            "slug": handle.slug,
            "project": { "key": handle.project_key },
        },
    })
}

impl ScmProvider for BitbucketServerProvider {
    fn provider_name(&self) -> &'static str {
        BACKEND
    }

    fn git_identity(&self) -> &GitIdentity {
        &self.identity
    }

    fn list_repositories<'a>(
        &'a self,
        namespace_id: Option<&'a str>,
        _include_subgroups: bool,
    ) -> BoxStream<'a, Result<Repository>> {
        if let Some(project_key) = namespace_id {
            return self.project_repositories(project_key.to_string());
        }

        let url = self.url(&["projects"], &[]);
        http::paginate(0, move |start| {
            self.get_page::<ProjectResponse>("projects".to_string(), url.clone(), start)
        })
        .map_ok(move |project| self.project_repositories(project.key))
        .try_flatten()
        .boxed()
    }

    fn get_repository<'a>(&'a self, repo_id: &'a str) -> BoxFuture<'a, Result<Repository>> {
        Box::pin(async move {
            let handle = parse_repo_id(repo_id)?;
            let repo: RepoResponse = self
                .get_json(
                    &format!("repository {repo_id}"),
                    self.repo_url(&handle, &[], &[]),
                )
                .await?;
            self.build_repository(repo).await
        })
    }

    fn get_default_branch<'a>(&'a self, repo: &'a Repository) -> BoxFuture<'a, Result<Branch>> {
        Box::pin(async move {
            let handle = repo_handle(repo)?;
            let Some(head) = self.fetch_default_branch(&handle).await? else {
                return Err(ScmError::NotFound(format!(
                    "default branch of '{}' (empty repository)",
                    repo.full_path
                ))
                .into());
            };

            if head.latest_commit.is_empty() {
                return Ok(Branch::degraded(head.display_id));
            }

            match self.fetch_commit(&handle, &head.latest_commit).await {
                Ok(commit) => Ok(Branch {
                    name: head.display_id,
                    commit_sha: head.latest_commit,
                    commit_message: commit.message,
                    committed_at: commit
                        .committer_timestamp
                        .or(commit.author_timestamp)
                        .and_then(millis_to_utc),
                }),
                Err(e) => {
                    warn!(
                        repository_id = %repo.id,
                        repository_name = %repo.name,
                        "Commit lookup failed, continuing without commit details: {e:#}"
                    );
                    Ok(Branch::degraded(head.display_id))
                }
            }
        })
    }

    fn branch_exists<'a>(
        &'a self,
        repo: &'a Repository,
        branch_name: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let lookup = async {
                let handle = repo_handle(repo)?;
                let url = self.repo_url(
                    &handle,
                    &["branches"],
                    &[("filterText", branch_name), ("limit", "25")],
                );
                let page: PagedResponse<BranchResponse> =
                    self.get_json(&format!("branches of {}", repo.id), url).await?;
                Ok::<_, anyhow::Error>(page.values.iter().any(|b| b.display_id == branch_name))
            };
            match lookup.await {
                Ok(found) => found,
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
        _filter: &'a PullRequestFilter,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
        // No server-side author/title filters; the facade filters client-side.
        Box::pin(async move {
            let handle = repo_handle(repo)?;
            let url = self.repo_url(&handle, &["pull-requests"], &[("state", "OPEN")]);
            let what = format!("pull requests of {}", repo.id);
            let responses: Vec<PullRequestResponse> = http::paginate(0, move |start| {
                self.get_page::<PullRequestResponse>(what.clone(), url.clone(), start)
            })
            .try_collect()
            .await?;
            Ok(responses
                .into_iter()
                .map(|pr| self.to_pull_request(&handle, pr))
                .collect())
        })
    }

    fn create_pull_request<'a>(
        &'a self,
        repo: &'a Repository,
        request: &'a NewPullRequest,
    ) -> BoxFuture<'a, Result<PullRequest>> {
        Box::pin(async move {
            let handle = repo_handle(repo)?;
            let body = serde_json::json!({
                "title": request.title,
                "description": request.description,
                "fromRef": ref_body(&request.source_branch, &handle),
                "toRef": ref_body(&request.target_branch, &handle),
            });
            let builder = self
                .request(Method::POST, self.repo_url(&handle, &["pull-requests"], &[]))
                .json(&body);
            let created: PullRequestResponse =
                http::send_json(BACKEND, &format!("repository {}", repo.id), builder).await?;
            Ok(self.to_pull_request(&handle, created))
        })
    }

    fn get_authenticated_clone_url(&self, repo: &Repository) -> Result<String> {
        match self.auth {
            BitbucketAuth::Token(ref token) => {
                http::authenticated_url(&repo.clone_url, "x-token-auth", token)
            }
            BitbucketAuth::Basic {
                ref username,
                ref password,
            } => http::authenticated_url(&repo.clone_url, username, password),
        }
    }
}
