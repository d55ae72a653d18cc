//! Per-repository analysis pipeline.
//!
//! For each repository yielded by the SCM facade the orchestrator runs the
//! applicability checks and, when they pass, clones the repository, runs the
//! analyzer, commits and pushes the result on today's branch and opens a
//! pull request. Failures are contained per repository.

pub mod filter;
pub mod naming;
pub mod workspace;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, error, info, warn, Instrument};

use crate::analyzer::{load_repository_config, Analyzer, AnalyzerConfig};
use crate::git::{VersionControl, WorkingCopy};
use crate::scm::{NewPullRequest, PullRequest, Repository, ScmProvider};
use crate::worker_pool::WorkerPool;

pub use filter::{check_applicability, Applicability, SkipReason};
pub use workspace::WorkingDirGuard;

/// Default root for working copies.
pub const DEFAULT_WORKING_PATH: &str = "/tmp/cronjob/repositories";

/// Default staleness threshold in days.
pub const DEFAULT_MAX_DAYS_SINCE_LAST_COMMIT: i64 = 30;

/// Run-scoped settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Restrict discovery to this namespace (GitLab group id, Bitbucket
    /// project key). `None` scans every accessible repository.
    pub namespace_id: Option<String>,
    /// Descend into nested namespaces where the backend has them.
    pub include_subgroups: bool,
    /// Root directory for working copies.
    pub working_path: PathBuf,
    /// Skip repositories whose default branch is older than this. `None`
    /// disables the check.
    pub max_days_since_last_commit: Option<i64>,
    /// Namespace segments to skip (case-insensitive).
    pub ignored_namespaces: Vec<String>,
    /// Repository ids to skip.
    pub ignored_repository_ids: Vec<String>,
    /// Username owning this tool's pull requests, for duplicate detection.
    pub pull_request_author: Option<String>,
    /// Parallel pipelines. `None` runs sequentially; `Some(0)` uses one
    /// worker per CPU.
    pub concurrency: Option<usize>,
    /// Tool-level analyzer defaults, overridden per repository.
    pub analyzer_defaults: AnalyzerConfig,
    /// Version recorded in commits and pull requests.
    pub version: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace_id: None,
            include_subgroups: true,
            working_path: PathBuf::from(DEFAULT_WORKING_PATH),
            max_days_since_last_commit: Some(DEFAULT_MAX_DAYS_SINCE_LAST_COMMIT),
            ignored_namespaces: Vec::new(),
            ignored_repository_ids: Vec::new(),
            pull_request_author: None,
            concurrency: None,
            analyzer_defaults: AnalyzerConfig::new(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Pipeline stage, recorded on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Applicability checks.
    Filter,
    /// Clone and branch creation.
    Clone,
    /// Analyzer invocation.
    Analyze,
    /// Stage, commit and push.
    CommitAndPush,
    /// Pull request creation.
    PullRequest,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter => write!(f, "filter"),
            Self::Clone => write!(f, "clone"),
            Self::Analyze => write!(f, "analyze"),
            Self::CommitAndPush => write!(f, "commit_and_push"),
            Self::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// Terminal state of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryOutcome {
    /// Not processed.
    Skipped(SkipReason),
    /// Pull request opened.
    Done(PullRequest),
    /// A stage failed. `stage` is `None` when the task panicked.
    Failed {
        /// Failing stage.
        stage: Option<PipelineStage>,
        /// Error with its cause chain.
        error: String,
    },
}

/// Outcome of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReport {
    /// Repository id.
    pub repository_id: String,
    /// Repository name.
    pub repository_name: String,
    /// What happened.
    pub outcome: RepositoryOutcome,
}

/// Outcomes of a whole run, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// One entry per discovered repository.
    pub reports: Vec<RepositoryReport>,
}

impl RunSummary {
    /// Repositories discovered.
    pub fn discovered(&self) -> usize {
        self.reports.len()
    }

    /// Repositories with an opened pull request.
    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, RepositoryOutcome::Done(_)))
    }

    /// Repositories skipped by the applicability checks.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RepositoryOutcome::Skipped(_)))
    }

    /// Repositories whose pipeline failed.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RepositoryOutcome::Failed { .. }))
    }

    /// Report for repository `id`.
    pub fn report(&self, id: &str) -> Option<&RepositoryReport> {
        self.reports.iter().find(|r| r.repository_id == id)
    }

    fn count(&self, predicate: impl Fn(&RepositoryOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// A stage failure inside the pipeline.
struct StageError {
    stage: PipelineStage,
    error: anyhow::Error,
}

trait AtStage<T> {
    fn at(self, stage: PipelineStage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: PipelineStage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

/// Drives discovery, filtering and the per-repository pipeline.
pub struct Orchestrator {
    scm: Arc<dyn ScmProvider>,
    vcs: Arc<dyn VersionControl>,
    analyzer: Arc<dyn Analyzer>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator.
    pub fn new(
        scm: Arc<dyn ScmProvider>,
        vcs: Arc<dyn VersionControl>,
        analyzer: Arc<dyn Analyzer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            scm,
            vcs,
            analyzer,
            config,
        }
    }

    /// Run-scoped settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Processes every discovered repository.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_at(Utc::now()).await
    }

    /// Processes every discovered repository as of `now`.
    ///
    /// Fails only when the working root cannot be created or discovery
    /// itself fails. Per-repository failures are recorded in the summary.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        tokio::fs::create_dir_all(&self.config.working_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create working directory {}",
                    self.config.working_path.display()
                )
            })?;

        info!(
            provider = self.scm.provider_name(),
            namespace_id = ?self.config.namespace_id,
            analyzer = self.analyzer.name(),
            "Starting analysis run"
        );

        let summary = match self.config.concurrency {
            None => self.run_sequential(now).await?,
            Some(workers) => self.run_parallel(now, workers).await?,
        };

        info!(
            discovered = summary.discovered(),
            done = summary.done(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Analysis run finished"
        );
        Ok(summary)
    }

    async fn run_sequential(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let mut repositories = self.discover();
        let mut summary = RunSummary::default();
        while let Some(repo) = repositories
            .try_next()
            .await
            .context("Failed to list repositories")?
        {
            summary.reports.push(self.process_repository(&repo, now).await);
        }
        Ok(summary)
    }

    async fn run_parallel(&self, now: DateTime<Utc>, workers: usize) -> Result<RunSummary> {
        let repositories: Vec<Repository> = self
            .discover()
            .try_collect()
            .await
            .context("Failed to list repositories")?;
        debug!(count = repositories.len(), "Discovered repositories");

        let pool = WorkerPool::new(workers);
        let tasks: Vec<_> = repositories
            .iter()
            .map(|repo| move || async move { Ok(self.process_repository(repo, now).await) })
            .collect();
        let results = pool.run(tasks).await;

        let reports = repositories
            .iter()
            .zip(results)
            .map(|(repo, result)| {
                result.unwrap_or_else(|e| {
                    error!(
                        repository_id = %repo.id,
                        repository_name = %repo.name,
                        "Repository task aborted: {e:#}"
                    );
                    RepositoryReport {
                        repository_id: repo.id.clone(),
                        repository_name: repo.name.clone(),
                        outcome: RepositoryOutcome::Failed {
                            stage: None,
                            error: format!("{e:#}"),
                        },
                    }
                })
            })
            .collect();
        Ok(RunSummary { reports })
    }

    fn discover(&self) -> futures::stream::BoxStream<'_, Result<Repository>> {
        self.scm
            .list_repositories(
                self.config.namespace_id.as_deref(),
                self.config.include_subgroups,
            )
            .inspect_ok(|repo| {
                debug!(
                    repository_id = %repo.id,
                    full_path = %repo.full_path,
                    "Discovered repository"
                );
            })
            .boxed()
    }

    /// Runs the checks and, if they pass, the pipeline for one repository.
    /// Never fails; the outcome is recorded in the report.
    pub async fn process_repository(
        &self,
        repo: &Repository,
        now: DateTime<Utc>,
    ) -> RepositoryReport {
        let span = tracing::info_span!(
            "repository",
            repository_id = %repo.id,
            repository_name = %repo.name
        );
        let outcome = self.evaluate_and_run(repo, now).instrument(span).await;
        RepositoryReport {
            repository_id: repo.id.clone(),
            repository_name: repo.name.clone(),
            outcome,
        }
    }

    async fn evaluate_and_run(&self, repo: &Repository, now: DateTime<Utc>) -> RepositoryOutcome {
        let branch = match check_applicability(self.scm.as_ref(), repo, &self.config, now).await {
            Ok(Applicability::Applicable(branch)) => branch,
            Ok(Applicability::Skip(reason)) => {
                info!(
                    repository_id = %repo.id,
                    repository_name = %repo.name,
                    reason = %reason,
                    "Skipping repository"
                );
                return RepositoryOutcome::Skipped(reason);
            }
            Err(error) => {
                return Self::failed(repo, StageError {
                    stage: PipelineStage::Filter,
                    error,
                })
            }
        };

        info!(
            repository_id = %repo.id,
            repository_name = %repo.name,
            default_branch = %branch.name,
            "Processing repository"
        );
        match self.execute_pipeline(repo, now.date_naive()).await {
            Ok(pull_request) => {
                info!(
                    repository_id = %repo.id,
                    repository_name = %repo.name,
                    pull_request = %pull_request.web_url,
                    "Pull request created"
                );
                RepositoryOutcome::Done(pull_request)
            }
            Err(failure) => Self::failed(repo, failure),
        }
    }

    fn failed(repo: &Repository, failure: StageError) -> RepositoryOutcome {
        error!(
            repository_id = %repo.id,
            repository_name = %repo.name,
            stage = %failure.stage,
            "Repository failed: {:#}",
            failure.error
        );
        RepositoryOutcome::Failed {
            stage: Some(failure.stage),
            error: format!("{:#}", failure.error),
        }
    }

    /// Clone, analyze, commit and push, then open the pull request. The
    /// working directory is removed on every exit path.
    async fn execute_pipeline(
        &self,
        repo: &Repository,
        today: NaiveDate,
    ) -> Result<PullRequest, StageError> {
        let branch = naming::idempotency_branch(today);
        let path = naming::working_directory(&self.config.working_path, repo);
        let guard = WorkingDirGuard::prepare(path).await.at(PipelineStage::Clone)?;

        let url = self
            .scm
            .get_authenticated_clone_url(repo)
            .at(PipelineStage::Clone)?;
        let mut copy = self
            .vcs
            .clone_repository(&url, guard.path(), &repo.default_branch)
            .await
            .context("Failed to clone repository")
            .at(PipelineStage::Clone)?;
        debug!(path = %guard.path().display(), "Cloned repository");

        let result = self.process_working_copy(repo, &mut copy, &branch, today).await;

        if let Err(e) = self.vcs.close(copy) {
            warn!(
                repository_id = %repo.id,
                "Failed to release working copy: {e:#}"
            );
        }
        drop(guard);
        result
    }

    async fn process_working_copy(
        &self,
        repo: &Repository,
        copy: &mut WorkingCopy,
        branch: &str,
        today: NaiveDate,
    ) -> Result<PullRequest, StageError> {
        self.scm
            .configure_git_credentials(copy.path())
            .context("Failed to configure git identity")
            .at(PipelineStage::Clone)?;
        self.vcs
            .create_branch(copy, branch)
            .await
            .with_context(|| format!("Failed to create branch {branch}"))
            .at(PipelineStage::Clone)?;

        let repository_config = load_repository_config(copy.path()).at(PipelineStage::Analyze)?;
        if !repository_config.is_empty() {
            debug!(keys = repository_config.len(), "Using repository analyzer config");
        }
        let config = self.config.analyzer_defaults.merged_with(&repository_config);
        self.analyzer
            .analyze(copy.path(), &config)
            .await
            .with_context(|| format!("Analyzer '{}' failed", self.analyzer.name()))
            .at(PipelineStage::Analyze)?;

        self.vcs
            .stage_all(copy)
            .await
            .context("Failed to stage changes")
            .at(PipelineStage::CommitAndPush)?;
        self.vcs
            .commit(copy, &naming::commit_message(&self.config.version))
            .await
            .context("Failed to commit analysis")
            .at(PipelineStage::CommitAndPush)?;
        self.vcs
            .push(copy, branch, true)
            .await
            .with_context(|| format!("Failed to push {branch}"))
            .at(PipelineStage::CommitAndPush)?;

        let request = NewPullRequest {
            source_branch: branch.to_string(),
            target_branch: repo.default_branch.clone(),
            title: naming::pull_request_title(&repo.name, today),
            description: naming::pull_request_description(&self.config.version),
        };
        self.scm
            .create_pull_request(repo, &request)
            .await
            .context("Failed to create pull request")
            .at(PipelineStage::PullRequest)
    }
}
