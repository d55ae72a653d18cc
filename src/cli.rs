//! CLI interface for analyzer-agent.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::orchestrator::{OrchestratorConfig, DEFAULT_MAX_DAYS_SINCE_LAST_COMMIT};

pub mod list;
pub mod run;

/// analyzer-agent: scheduled AI analysis of source repositories.
#[derive(Parser)]
#[command(name = "analyzer-agent")]
#[command(
    about = "Analyzes repositories and opens pull requests with the results",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Analyzes every applicable repository and opens pull requests.
    Run(run::RunCommand),
    /// Lists discovered repositories without changing anything.
    List(list::ListCommand),
}

impl Cli {
    /// Executes the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(run_cmd) => run_cmd.execute().await,
            Commands::List(list_cmd) => list_cmd.execute().await,
        }
    }
}

/// Discovery and filtering options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Namespace to scan (GitLab group id or path, Bitbucket project key).
    /// Scans every accessible repository when omitted.
    #[arg(long)]
    pub namespace_id: Option<String>,

    /// Deprecated: use --namespace-id instead.
    #[arg(long, hide = true)]
    pub group_project_id: Option<String>,

    /// Does not descend into subgroups of the namespace.
    #[arg(long)]
    pub no_subgroups: bool,

    /// Skips repositories with this namespace segment (case-insensitive, repeatable).
    #[arg(long = "ignore-namespace", value_name = "NAME")]
    pub ignore_namespaces: Vec<String>,

    /// Skips the repository with this id (repeatable).
    #[arg(long = "ignore-repository", value_name = "ID")]
    pub ignore_repositories: Vec<String>,

    /// Skips repositories whose default branch has no commit for this many days.
    #[arg(long, default_value_t = DEFAULT_MAX_DAYS_SINCE_LAST_COMMIT, value_name = "DAYS")]
    pub max_days_since_last_commit: i64,

    /// Disables the staleness check.
    #[arg(long, conflicts_with = "max_days_since_last_commit")]
    pub no_staleness_check: bool,
}

impl ScopeArgs {
    /// Folds the deprecated `--group-project-id` into `--namespace-id`.
    ///
    /// An explicit `--namespace-id` wins over the deprecated value.
    pub fn resolve_deprecated(&mut self) {
        if let Some(group_project_id) = self.group_project_id.take() {
            eprintln!(
                "warning: --group-project-id is deprecated and will be removed in v2.0; \
                 use --namespace-id instead"
            );
            if self.namespace_id.is_none() {
                self.namespace_id = Some(group_project_id);
            }
        }
    }

    /// Run-scoped orchestrator settings for these options.
    pub fn to_config(&self, pull_request_author: Option<String>) -> OrchestratorConfig {
        OrchestratorConfig {
            namespace_id: self.namespace_id.clone(),
            include_subgroups: !self.no_subgroups,
            max_days_since_last_commit: (!self.no_staleness_check)
                .then_some(self.max_days_since_last_commit),
            ignored_namespaces: self.ignore_namespaces.clone(),
            ignored_repository_ids: self.ignore_repositories.clone(),
            pull_request_author,
            ..OrchestratorConfig::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::orchestrator::DEFAULT_WORKING_PATH;
    use clap::CommandFactory;
    use std::path::PathBuf;

    fn scope(args: &[&str]) -> ScopeArgs {
        let mut argv = vec!["analyzer-agent", "list"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::List(list) => list.scope,
            Commands::Run(_) => unreachable!(),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let scope = scope(&[]);
        let config = scope.to_config(None);
        assert_eq!(config.namespace_id, None);
        assert!(config.include_subgroups);
        assert_eq!(config.working_path, PathBuf::from(DEFAULT_WORKING_PATH));
        assert_eq!(config.max_days_since_last_commit, Some(30));
    }

    #[test]
    fn deprecated_group_project_id_is_migrated() {
        let mut scope = scope(&["--group-project-id", "42"]);
        scope.resolve_deprecated();
        assert_eq!(scope.namespace_id.as_deref(), Some("42"));
        assert_eq!(scope.group_project_id, None);

        let mut scope = self::scope(&["--group-project-id", "42", "--namespace-id", "7"]);
        scope.resolve_deprecated();
        assert_eq!(scope.namespace_id.as_deref(), Some("7"));
    }

    #[test]
    fn repeatable_filters_and_staleness_switch() {
        let scope = scope(&[
            "--ignore-namespace",
            "archive",
            "--ignore-namespace",
            "Sandbox",
            "--ignore-repository",
            "PLAT/legacy",
            "--no-staleness-check",
            "--no-subgroups",
        ]);
        let config = scope.to_config(Some("analyzer-bot".to_string()));
        assert_eq!(config.ignored_namespaces, vec!["archive", "Sandbox"]);
        assert_eq!(config.ignored_repository_ids, vec!["PLAT/legacy"]);
        assert_eq!(config.max_days_since_last_commit, None);
        assert!(!config.include_subgroups);
        assert_eq!(config.pull_request_author.as_deref(), Some("analyzer-bot"));
    }

    #[test]
    fn staleness_flags_conflict() {
        let result = Cli::try_parse_from([
            "analyzer-agent",
            "list",
            "--no-staleness-check",
            "--max-days-since-last-commit",
            "5",
        ]);
        assert!(result.is_err());
    }
}
