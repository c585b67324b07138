use std::path::PathBuf;

use crate::cli::Cli;
use crate::model::Strictness;

/// Resolved configuration for a single invocation: defaults -> environment
/// (via `clap`'s `env`) -> CLI flags, following the same single-struct
/// pattern the teacher's `RuntimeConfig` uses.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub working_dir: PathBuf,
    pub skills_path: PathBuf,
    pub profiles_path: PathBuf,
    pub vector_store_path: PathBuf,
    pub session_path: PathBuf,
    pub observability_log_path: PathBuf,
    pub strictness_override: Option<Strictness>,
    pub immediate_threshold: f32,
    pub suggestion_threshold: f32,
    pub command_timeout_ms: u64,
    pub disable: bool,
    pub show_sensitive_config: bool,
}

impl RuntimeConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let working_dir = PathBuf::from(&cli.cwd);
        let skills_path = crate::session::skills_catalog_path(&working_dir);
        let profiles_path = crate::session::profiles_catalog_path(&working_dir);
        let vector_store_path = crate::session::vector_store_path(&working_dir);
        let store = crate::session::SessionStore::new(&working_dir);

        Self {
            session_path: store.session_path(),
            observability_log_path: store.observability_log_path(),
            working_dir,
            skills_path,
            profiles_path,
            vector_store_path,
            strictness_override: cli.strictness_override.map(Into::into),
            immediate_threshold: cli.immediate_threshold,
            suggestion_threshold: cli.suggestion_threshold,
            command_timeout_ms: cli.command_timeout_ms,
            disable: cli.disable,
            show_sensitive_config: cli.show_sensitive_config,
        }
    }

    pub fn display_working_dir(&self) -> String {
        if self.show_sensitive_config {
            self.working_dir.display().to_string()
        } else {
            crate::error::redact_path_like(&self.working_dir.display().to_string())
        }
    }
}
