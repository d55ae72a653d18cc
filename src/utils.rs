//! Configuration helpers.

pub mod preflight;
pub mod settings;

pub use preflight::{
    check_git_cli, check_llm_settings, check_run_prerequisites, check_scm_credentials,
};
pub use settings::{get_env_var, get_optional_env_var, Settings};
