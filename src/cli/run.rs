//! Run command: the scheduled analysis job.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::analyzer::{AnalyzerConfig, LlmAnalyzer};
use crate::cli::ScopeArgs;
use crate::git::GitCli;
use crate::llm::{CompletionProvider, OpenAiCompatibleProvider};
use crate::orchestrator::{Orchestrator, DEFAULT_WORKING_PATH};
use crate::scm::create_scm_provider;
use crate::utils::{check_run_prerequisites, get_optional_env_var};

/// Run command options.
#[derive(Parser)]
pub struct RunCommand {
    /// Discovery and filtering options.
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Root directory for working copies.
    #[arg(long, default_value = DEFAULT_WORKING_PATH)]
    pub working_path: PathBuf,

    /// Processes up to N repositories in parallel (0 = one per CPU).
    /// Repositories are processed one at a time when omitted.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// YAML file with tool-level analyzer defaults.
    #[arg(long, value_name = "FILE")]
    pub analyzer_config: Option<PathBuf>,

    /// Exits with an error when any repository failed.
    #[arg(long)]
    pub fail_on_error: bool,
}

impl RunCommand {
    /// Executes the run command.
    pub async fn execute(mut self) -> Result<()> {
        self.scope.resolve_deprecated();

        // Preflight: nothing is touched until configuration is complete.
        let (scm_settings, llm_settings) = check_run_prerequisites()?;

        let analyzer_defaults = match self.analyzer_config {
            Some(ref path) => AnalyzerConfig::load(path)?,
            None => AnalyzerConfig::new(),
        };

        let scm = create_scm_provider(&scm_settings).context("Failed to create SCM provider")?;
        let provider =
            OpenAiCompatibleProvider::new(llm_settings).context("Failed to create LLM provider")?;
        info!(
            provider = scm.provider_name(),
            model = provider.model(),
            "Configuration verified"
        );

        let mut config = self
            .scope
            .to_config(get_optional_env_var("SCM_GIT_USER_USERNAME"));
        config.working_path = self.working_path;
        config.concurrency = self.concurrency;
        config.analyzer_defaults = analyzer_defaults;

        let orchestrator = Orchestrator::new(
            Arc::from(scm),
            Arc::new(GitCli::new()),
            Arc::new(LlmAnalyzer::new(Box::new(provider))),
            config,
        );
        let summary = orchestrator.run().await?;

        println!(
            "Processed {} repositories: {} pull requests created, {} skipped, {} failed",
            summary.discovered(),
            summary.done(),
            summary.skipped(),
            summary.failed()
        );

        if self.fail_on_error && summary.failed() > 0 {
            anyhow::bail!(
                "{} of {} repositories failed",
                summary.failed(),
                summary.discovered()
            );
        }
        Ok(())
    }
}
