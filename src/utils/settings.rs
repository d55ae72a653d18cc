//! Settings file used as a fallback for environment variables.
//!
//! Values are read from the environment first and then from
//! `$HOME/.ai-analyzer/settings.json`:
//!
//! ```json
//! { "env": { "GITLAB_OAUTH_TOKEN": "...", "LLM_MODEL": "gpt-4o" } }
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Settings loaded from `$HOME/.ai-analyzer/settings.json`.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Environment variable fallbacks.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Settings {
    /// Loads settings from the default location.
    pub fn load() -> Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Self::load_from_path(&settings_path)
    }

    /// Loads settings from `path`. A missing file yields empty settings.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        serde_json::from_str::<Self>(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// Returns the default settings path.
    pub fn get_settings_path() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to determine home directory")?;

        Ok(home_dir.join(".ai-analyzer").join("settings.json"))
    }

    /// Returns an environment variable, falling back to these settings.
    /// Empty values count as unset.
    pub fn get_env_var(&self, key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) if !value.trim().is_empty() => Some(value),
            _ => self
                .env
                .get(key)
                .filter(|value| !value.trim().is_empty())
                .cloned(),
        }
    }
}

/// Returns an environment variable with fallback to the settings file.
pub fn get_env_var(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => match Settings::load() {
            Ok(settings) => settings
                .get_env_var(key)
                .ok_or_else(|| anyhow::anyhow!("Environment variable not found: {key}")),
            Err(err) => Err(anyhow::anyhow!("Environment variable not found: {key}").context(err)),
        },
    }
}

/// Optional variable: `None` when unset.
pub fn get_optional_env_var(key: &str) -> Option<String> {
    get_env_var(key).ok()
}
