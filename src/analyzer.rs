//! Analysis capability invoked on each cloned repository.

pub mod llm;

use std::path::Path;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde_yaml::{Mapping, Value};
use tracing::debug;

pub use llm::LlmAnalyzer;

/// Repository-level configuration file names, in lookup order.
pub const REPOSITORY_CONFIG_FILES: [&str; 2] = [".ai-analyzer.yaml", ".ai-analyzer.yml"];

/// Section of the repository configuration file read by the analyzer.
const REPOSITORY_CONFIG_SECTION: &str = "analyzer";

/// Produces analysis artifacts inside a working copy.
pub trait Analyzer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Analyzes the working copy at `path`, writing its results into it.
    fn analyze<'a>(&'a self, path: &'a Path, config: &'a AnalyzerConfig)
        -> BoxFuture<'a, Result<()>>;
}

/// Analyzer settings as a flat YAML mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzerConfig(Mapping);

impl AnalyzerConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML mapping. An empty document yields an empty configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml).context("Invalid analyzer configuration")?;
        Self::from_value(value)
    }

    /// Loads a YAML mapping from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read analyzer config: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse analyzer config: {}", path.display()))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Mapping(mapping) => Ok(Self(mapping)),
            other => anyhow::bail!(
                "Analyzer configuration must be a mapping, found {}",
                value_kind(&other)
            ),
        }
    }

    /// Returns a copy with every top-level key of `overrides` replacing ours.
    ///
    /// Nested mappings are replaced whole, never merged.
    pub fn merged_with(&self, overrides: &Self) -> Self {
        let mut merged = self.0.clone();
        for (key, value) in &overrides.0 {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }

    /// Sets `key`.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(Value::from(key), value.into());
    }

    /// Raw value of `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Unsigned integer value of `key`.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no key is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Reads the `analyzer` section of the repository's own configuration file.
///
/// Returns an empty configuration when the repository has no such file or
/// the file has no `analyzer` section.
pub fn load_repository_config(working_copy: &Path) -> Result<AnalyzerConfig> {
    let Some(path) = REPOSITORY_CONFIG_FILES
        .iter()
        .map(|name| working_copy.join(name))
        .find(|candidate| candidate.is_file())
    else {
        return Ok(AnalyzerConfig::new());
    };

    debug!(path = %path.display(), "Loading repository analyzer config");
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    match document.get(REPOSITORY_CONFIG_SECTION) {
        None | Some(Value::Null) => Ok(AnalyzerConfig::new()),
        Some(section) => AnalyzerConfig::from_value(section.clone()).with_context(|| {
            format!(
                "Invalid '{REPOSITORY_CONFIG_SECTION}' section in {}",
                path.display()
            )
        }),
    }
}
