//! Names shared across runs. Changing any of these breaks duplicate detection
//! for branches and pull requests created by earlier versions.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::scm::Repository;

/// Fixed title identifying commits and pull requests made by this tool.
pub const SIGNATURE_TITLE: &str = "[AI] Analyzer-Agent: Create/Update AI Analysis";

/// Prefix of the per-day branch.
pub const BRANCH_PREFIX: &str = "ai-analyzer";

const SKIP_CI: &str = "[skip ci]";

/// Branch carrying the changes of `date`: `ai-analyzer-YYYY-MM-DD`.
pub fn idempotency_branch(date: NaiveDate) -> String {
    format!("{BRANCH_PREFIX}-{}", date.format("%Y-%m-%d"))
}

/// Commit message: signature title with `[skip ci]`, then the version marker.
pub fn commit_message(version: &str) -> String {
    format!("{SIGNATURE_TITLE} {SKIP_CI}\n\nAnalyzer Version: {version}")
}

/// Pull request title: signature, repository name, date and `[skip ci]`.
pub fn pull_request_title(repository_name: &str, date: NaiveDate) -> String {
    format!(
        "{SIGNATURE_TITLE} for {repository_name} - {} {SKIP_CI}",
        date.format("%Y-%m-%d")
    )
}

/// Pull request description with version and attribution.
pub fn pull_request_description(version: &str) -> String {
    format!(
        "This pull request contains updated AI analysis results.\n\n\
         Analyzer Version: `{version}`\n\n\
         **Note:** This pull request was automatically created by the AI Analyzer Agent."
    )
}

/// Local working directory: `<root>/<name>-<id with '/' replaced by '-'>`.
pub fn working_directory(root: &Path, repo: &Repository) -> PathBuf {
    root.join(format!("{}-{}", repo.name, repo.id.replace('/', "-")))
}
