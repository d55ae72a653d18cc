//! # analyzer-agent
//!
//! Scheduled AI analysis of source repositories.
//!
//! The agent discovers repositories on an SCM backend (GitLab or Bitbucket
//! Server), decides which ones need a fresh analysis, clones them, runs an
//! [`analyzer::Analyzer`] and opens a pull request with the results. Running
//! it twice on the same day never produces a second branch or pull request.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use analyzer_agent::analyzer::LlmAnalyzer;
//! use analyzer_agent::git::GitCli;
//! use analyzer_agent::llm::{OpenAiCompatibleProvider, OpenAiSettings};
//! use analyzer_agent::orchestrator::{Orchestrator, OrchestratorConfig};
//! use analyzer_agent::scm::{create_scm_provider, ScmSettings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let scm = create_scm_provider(&ScmSettings {
//!     url: "https://gitlab.example.com".to_string(),
//!     gitlab_private_token: Some("glpat-...".to_string()),
//!     ..Default::default()
//! })?;
//! let llm = OpenAiCompatibleProvider::new(OpenAiSettings {
//!     api_key: Some("sk-...".to_string()),
//!     ..OpenAiSettings::new("gpt-4o")
//! })?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::from(scm),
//!     Arc::new(GitCli::new()),
//!     Arc::new(LlmAnalyzer::new(Box::new(llm))),
//!     OrchestratorConfig::default(),
//! );
//! let summary = orchestrator.run().await?;
//! println!("{} pull requests created", summary.done());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod analyzer;
pub mod cli;
pub mod git;
pub mod llm;
pub mod orchestrator;
pub mod scm;
pub mod utils;
pub mod worker_pool;

pub use crate::cli::Cli;

/// The current version of analyzer-agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
