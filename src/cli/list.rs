//! List command: shows discovered repositories and, optionally, whether the
//! run command would process them.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use futures::TryStreamExt;
use serde::Serialize;

use crate::cli::ScopeArgs;
use crate::orchestrator::{check_applicability, Applicability};
use crate::scm::{create_scm_provider, Repository};
use crate::utils::{check_scm_credentials, get_optional_env_var};

/// List command options.
#[derive(Parser)]
pub struct ListCommand {
    /// Discovery and filtering options.
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Evaluates the applicability checks for each repository (dry run).
    #[arg(long)]
    pub check: bool,
}

/// One line of output.
#[derive(Debug, Serialize)]
struct ListEntry<'a> {
    #[serde(flatten)]
    repository: &'a Repository,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<String>,
}

fn describe(decision: &Result<Applicability>) -> String {
    match decision {
        Ok(Applicability::Applicable(_)) => "analyze".to_string(),
        Ok(Applicability::Skip(reason)) => format!("skip: {reason}"),
        Err(e) => format!("error: {e:#}"),
    }
}

impl ListCommand {
    /// Executes the list command.
    pub async fn execute(mut self) -> Result<()> {
        self.scope.resolve_deprecated();

        let settings = check_scm_credentials()?;
        let scm = create_scm_provider(&settings).context("Failed to create SCM provider")?;
        let config = self
            .scope
            .to_config(get_optional_env_var("SCM_GIT_USER_USERNAME"));

        let repositories: Vec<Repository> = scm
            .list_repositories(config.namespace_id.as_deref(), config.include_subgroups)
            .try_collect()
            .await
            .context("Failed to list repositories")?;

        let mut decisions = Vec::with_capacity(repositories.len());
        if self.check {
            let now = Utc::now();
            for repo in &repositories {
                let decision = check_applicability(scm.as_ref(), repo, &config, now).await;
                decisions.push(Some(describe(&decision)));
            }
        } else {
            decisions.resize(repositories.len(), None);
        }

        let entries: Vec<ListEntry<'_>> = repositories
            .iter()
            .zip(decisions)
            .map(|(repository, decision)| ListEntry {
                repository,
                decision,
            })
            .collect();
        let yaml = serde_yaml::to_string(&entries).context("Failed to serialize repositories")?;
        print!("{yaml}");
        Ok(())
    }
}
