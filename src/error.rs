use std::path::PathBuf;

use thiserror::Error;

use crate::model::{Capability, SkillName};

/// Typed error taxonomy per the enforcement core's error kinds.
///
/// Library callers match on variants directly; the CLI boundary uses
/// [`categorize_for_cli`] to render the hint-bearing message the exit-code
/// scheme prints.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("spec invalid: {message}")]
    SpecInvalid {
        message: String,
        skill: Option<SkillName>,
    },

    #[error("resolution failed: no skill provides capability '{capability}'")]
    MissingProvider { capability: Capability },

    #[error("resolution failed: skill '{a}' conflicts with skill '{b}'")]
    Conflict { a: SkillName, b: SkillName },

    #[error("resolution failed: cycle detected among skills: {}", path.iter().map(|s| s.0.as_str()).collect::<Vec<_>>().join(" -> "))]
    Cycle { path: Vec<SkillName> },

    #[error("session file is corrupt: {message}")]
    SessionCorrupt { message: String, file: Option<PathBuf> },

    #[error("evidence check failed for artifact '{artifact}': {message}")]
    EvidenceError { artifact: String, message: String },

    #[error("command evidence error: {message}")]
    CommandError { message: String },

    #[error("could not acquire session lock: {message}")]
    LockContention { message: String },

    #[error("activation refused: request_id conflicts with an active session (session_id={existing_session_id})")]
    IdempotencyConflict { existing_session_id: String },

    #[error("io error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    pub fn spec_invalid(message: impl Into<String>) -> Self {
        CoreError::SpecInvalid {
            message: message.into(),
            skill: None,
        }
    }
}

/// (code, hint) pair rendered at the CLI boundary, in the style the teacher's
/// `ErrorCategory` uses — library code never consults this, only `main`.
pub fn categorize_for_cli(err: &CoreError) -> (&'static str, &'static str) {
    match err {
        CoreError::SpecInvalid { .. } => (
            "SPEC_INVALID",
            "Fix the offending entry in chains/skills.yaml or chains/profiles.yaml and retry.",
        ),
        CoreError::MissingProvider { .. } => (
            "RESOLUTION_FAILURE",
            "Add a skill that provides the missing capability, or relax the profile's capabilities_required.",
        ),
        CoreError::Conflict { .. } => (
            "RESOLUTION_FAILURE",
            "Remove one of the conflicting skills from the catalog or adjust capabilities_required so only one is selected.",
        ),
        CoreError::Cycle { .. } => (
            "RESOLUTION_FAILURE",
            "Break the requires cycle between the listed skills.",
        ),
        CoreError::SessionCorrupt { .. } => (
            "SESSION_CORRUPT",
            "Run `chain session clear` to discard the unreadable session file.",
        ),
        CoreError::EvidenceError { .. } => (
            "EVIDENCE_ERROR",
            "Inspect the artifact's diagnostic and satisfy the missing requirement.",
        ),
        CoreError::CommandError { .. } => (
            "COMMAND_ERROR",
            "Re-run the underlying command manually to see why it failed or timed out.",
        ),
        CoreError::LockContention { .. } => (
            "LOCK_CONTENTION",
            "Retry; another hook invocation is holding the session lock.",
        ),
        CoreError::IdempotencyConflict { .. } => (
            "IDEMPOTENCY_CONFLICT",
            "Run `chain session clear` before activating a different request.",
        ),
        CoreError::Io { .. } => (
            "INTERNAL",
            "Check filesystem permissions at the reported path.",
        ),
    }
}

pub fn format_cli_error(err: &CoreError) -> String {
    let (code, hint) = categorize_for_cli(err);
    format!("[{code}] {err}\nHint: {hint}")
}

/// Redacts the user's home directory prefix from a path-like string, the
/// way the teacher's `redact_sqlite_urls` strips connection strings out of
/// error text before it reaches a terminal that might be logged elsewhere.
pub fn redact_path_like(text: &str) -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() && text.contains(&home) => text.replace(&home, "~"),
        _ => text.to_string(),
    }
}
