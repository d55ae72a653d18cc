//! Preflight validation run before any repository is touched.
//!
//! Missing or malformed credentials are configuration errors and abort the
//! run with a message naming the variables to set.

use std::time::Duration;

use anyhow::{bail, Result};

use crate::llm::openai::DEFAULT_API_BASE;
use crate::llm::{LlmError, OpenAiSettings};
use crate::scm::{GitIdentity, ScmError, ScmProviderKind, ScmSettings};
use crate::utils::settings::get_optional_env_var;

/// Model used when `LLM_MODEL` is unset.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {key} ('{raw}'): {e}")),
    }
}

/// Builds and validates SCM settings from `lookup`.
pub fn scm_settings_with(lookup: impl Fn(&str) -> Option<String>) -> Result<ScmSettings> {
    let provider: ScmProviderKind = lookup("SCM_PROVIDER")
        .as_deref()
        .unwrap_or("gitlab")
        .parse()?;

    let Some(url) = lookup("SCM_API_URL") else {
        return Err(ScmError::Configuration(
            "SCM API URL not configured.\nSet the SCM_API_URL environment variable.".to_string(),
        )
        .into());
    };

    let mut git_identity = GitIdentity {
        email: lookup("SCM_GIT_USER_EMAIL"),
        ..GitIdentity::default()
    };
    if let Some(name) = lookup("SCM_GIT_USER_NAME") {
        git_identity.name = name;
    }

    let settings = ScmSettings {
        provider,
        url,
        git_identity,
        gitlab_oauth_token: lookup("GITLAB_OAUTH_TOKEN"),
        gitlab_private_token: lookup("GITLAB_PRIVATE_TOKEN"),
        bitbucket_username: lookup("BITBUCKET_USERNAME"),
        bitbucket_password: lookup("BITBUCKET_PASSWORD"),
        bitbucket_token: lookup("BITBUCKET_TOKEN"),
    };

    match provider {
        ScmProviderKind::GitLab => {
            if settings.gitlab_oauth_token.is_none() && settings.gitlab_private_token.is_none() {
                return Err(ScmError::Configuration(
                    "GitLab credentials not found.\n\
                     Set one of these environment variables:\n\
                     - GITLAB_OAUTH_TOKEN\n\
                     - GITLAB_PRIVATE_TOKEN"
                        .to_string(),
                )
                .into());
            }
        }
        ScmProviderKind::BitbucketServer => {
            let basic =
                settings.bitbucket_username.is_some() && settings.bitbucket_password.is_some();
            if settings.bitbucket_token.is_none() && !basic {
                return Err(ScmError::Configuration(
                    "Bitbucket Server credentials not found.\n\
                     Set BITBUCKET_TOKEN, or both BITBUCKET_USERNAME and BITBUCKET_PASSWORD."
                        .to_string(),
                )
                .into());
            }
        }
    }

    Ok(settings)
}

/// Builds and validates completion-provider settings from `lookup`.
pub fn llm_settings_with(lookup: impl Fn(&str) -> Option<String>) -> Result<OpenAiSettings> {
    let mut settings =
        OpenAiSettings::new(lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()));
    settings.api_base = lookup("LLM_API_BASE");
    settings.api_key = lookup("LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
    settings.api_version = lookup("LLM_API_VERSION");
    if let Some(temperature) = parse(&lookup, "LLM_TEMPERATURE")? {
        settings.temperature = temperature;
    }
    if let Some(max_tokens) = parse(&lookup, "LLM_MAX_TOKENS")? {
        settings.max_tokens = max_tokens;
    }
    if let Some(seconds) = parse::<u64>(&lookup, "LLM_TIMEOUT_SECS")? {
        settings.timeout = Duration::from_secs(seconds);
    }

    let hosted = settings.model.starts_with("azure/")
        || settings
            .api_base
            .as_deref()
            .map_or(true, |base| base.starts_with(DEFAULT_API_BASE));
    if hosted && settings.api_key.is_none() {
        return Err(anyhow::Error::from(LlmError::ApiKeyNotFound).context(format!(
            "Model '{}' needs an API key.\n\
             Set one of these environment variables:\n\
             - LLM_API_KEY\n\
             - OPENAI_API_KEY",
            settings.model
        )));
    }

    Ok(settings)
}

/// Validates the SCM backend configuration from the environment.
pub fn check_scm_credentials() -> Result<ScmSettings> {
    scm_settings_with(get_optional_env_var)
}

/// Validates the completion-provider configuration from the environment.
pub fn check_llm_settings() -> Result<OpenAiSettings> {
    llm_settings_with(get_optional_env_var)
}

/// Validates that the `git` executable is available.
pub fn check_git_cli() -> Result<()> {
    match std::process::Command::new("git").arg("--version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => bail!(
            "git is installed but not usable: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(_) => bail!(
            "git is not installed or not in PATH.\n\
             Please install git before running the analyzer."
        ),
    }
}

/// Combined preflight for the `run` command.
pub fn check_run_prerequisites() -> Result<(ScmSettings, OpenAiSettings)> {
    check_git_cli()?;
    let scm = check_scm_credentials()?;
    let llm = check_llm_settings()?;
    Ok((scm, llm))
}
