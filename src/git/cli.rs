//! [`VersionControl`] backed by the `git` executable.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::git::{VersionControl, WorkingCopy};

#[allow(clippy::expect_used)]
static URL_CREDENTIALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://)[^/@\s]+@").expect("credential pattern is valid")
});

/// Replaces the user-info component of any URL in `text` with `***`.
pub fn redact_credentials(text: &str) -> String {
    URL_CREDENTIALS.replace_all(text, "${1}***@").into_owned()
}

/// Runs git as a non-interactive child process.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: OsString,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Uses `git` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("git")
    }

    /// Uses a specific git executable.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.program);
        if let Some(dir) = cwd {
            command.arg("-C").arg(dir);
        }
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let shown = redact_credentials(&args.join(" "));
        debug!(command = %shown, "Running git");

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute git {shown}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            anyhow::bail!(
                "git {shown} failed ({}): {}",
                output.status,
                redact_credentials(detail)
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionControl for GitCli {
    fn clone_repository<'a>(
        &'a self,
        url: &'a str,
        path: &'a Path,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<WorkingCopy>> {
        Box::pin(async move {
            let target = path.to_string_lossy();
            let mut args = vec!["clone"];
            if !branch.is_empty() {
                args.extend(["--branch", branch]);
            }
            args.extend(["--", url, target.as_ref()]);
            self.run(None, &args).await?;

            let checked_out = if branch.is_empty() {
                self.run(Some(path), &["rev-parse", "--abbrev-ref", "HEAD"])
                    .await?
                    .trim()
                    .to_string()
            } else {
                branch.to_string()
            };
            Ok(WorkingCopy::new(path, checked_out))
        })
    }

    fn create_branch<'a>(
        &'a self,
        copy: &'a mut WorkingCopy,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.run(Some(copy.path()), &["checkout", "-b", name]).await?;
            copy.set_branch(name);
            Ok(())
        })
    }

    fn stage_all<'a>(&'a self, copy: &'a WorkingCopy) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.run(Some(copy.path()), &["add", "--all"]).await?;
            Ok(())
        })
    }

    fn commit<'a>(&'a self, copy: &'a WorkingCopy, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.run(Some(copy.path()), &["commit", "-m", message]).await?;
            Ok(())
        })
    }

    fn push<'a>(
        &'a self,
        copy: &'a WorkingCopy,
        branch: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut args = vec!["push", "origin", branch];
            if force {
                args.push("-f");
            }
            self.run(Some(copy.path()), &args).await?;
            Ok(())
        })
    }

    fn close(&self, copy: WorkingCopy) -> Result<()> {
        // Each command is a short-lived process; nothing stays open.
        debug!(path = %copy.path().display(), "Closed working copy");
        Ok(())
    }
}
