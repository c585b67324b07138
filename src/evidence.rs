//! Evaluates artifact specifications against the filesystem and subprocess
//! results: `file_exists` (glob), `marker_found` (regex over file content,
//! streamed past a byte cap), `command_success` (subprocess with timeout),
//! and `manual` (requires explicit session acknowledgment).

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use regex::Regex;

use crate::model::{ArtifactKind, ArtifactSpec};
use crate::session::SessionState;
use crate::spec_loader::CatalogView;

#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    pub command_timeout: Duration,
    pub marker_max_bytes: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            marker_max_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub passed: bool,
    pub diagnostic: Option<String>,
}

impl ArtifactOutcome {
    fn pass() -> Self {
        Self {
            passed: true,
            diagnostic: None,
        }
    }

    fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Evaluate a single artifact. `manual_acks` is the set of artifact names
/// the session records as explicitly acknowledged.
pub async fn evaluate_artifact(
    cfg: &EvidenceConfig,
    working_dir: &Path,
    artifact: &ArtifactSpec,
    manual_acks: &HashSet<String>,
) -> ArtifactOutcome {
    match &artifact.kind {
        ArtifactKind::FileExists { pattern } => evaluate_file_exists(working_dir, pattern),
        ArtifactKind::MarkerFound { file, pattern } => {
            evaluate_marker_found(cfg, working_dir, file, pattern)
        }
        ArtifactKind::CommandSuccess {
            command,
            expected_exit_code,
        } => evaluate_command_success(cfg, working_dir, command, *expected_exit_code).await,
        ArtifactKind::Manual => {
            if manual_acks.contains(&artifact.name) {
                ArtifactOutcome::pass()
            } else {
                ArtifactOutcome::fail("unchecked: requires explicit acknowledgment")
            }
        }
    }
}

fn evaluate_file_exists(working_dir: &Path, pattern: &str) -> ArtifactOutcome {
    let full_pattern = working_dir.join(pattern);
    let full_pattern = full_pattern.to_string_lossy().to_string();

    let matches = match glob::glob(&full_pattern) {
        Ok(paths) => paths,
        Err(err) => {
            return ArtifactOutcome::fail(format!("invalid glob '{pattern}': {err}"));
        }
    };

    let found = matches.filter_map(Result::ok).next().is_some();
    if found {
        ArtifactOutcome::pass()
    } else {
        ArtifactOutcome::fail(format!("no file matched glob '{pattern}'"))
    }
}

fn evaluate_marker_found(
    cfg: &EvidenceConfig,
    working_dir: &Path,
    file: &str,
    pattern: &str,
) -> ArtifactOutcome {
    let path = working_dir.join(file);
    let handle = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return ArtifactOutcome::fail(format!("file_not_found: '{}'", path.display())),
    };

    let regex = match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => return ArtifactOutcome::fail(format!("invalid regex '{pattern}': {err}")),
    };

    let mut reader = std::io::BufReader::new(handle);
    let mut buf = Vec::with_capacity(64 * 1024);
    let mut chunk = [0u8; 64 * 1024];
    loop {
        if buf.len() >= cfg.marker_max_bytes {
            break;
        }
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => return ArtifactOutcome::fail(format!("read error: {err}")),
        };
        buf.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8_lossy(&buf);
    if regex.is_match(&text) {
        ArtifactOutcome::pass()
    } else {
        ArtifactOutcome::fail(format!("pattern '{pattern}' not found in '{file}'"))
    }
}

async fn evaluate_command_success(
    cfg: &EvidenceConfig,
    working_dir: &Path,
    command: &str,
    expected_exit_code: i32,
) -> ArtifactOutcome {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        // A timed-out check must not leave the child running: dropping the
        // `Child` handle on timeout sends it a kill signal instead of leaking it.
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(err) => return ArtifactOutcome::fail(format!("command_error: failed to spawn: {err}")),
    };

    match tokio::time::timeout(cfg.command_timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let code = output.status.code().unwrap_or(-1);
            if code == expected_exit_code {
                ArtifactOutcome::pass()
            } else {
                ArtifactOutcome::fail(format!(
                    "command exited with {code}, expected {expected_exit_code}"
                ))
            }
        }
        Ok(Err(err)) => ArtifactOutcome::fail(format!("command_error: {err}")),
        Err(_) => ArtifactOutcome::fail("command_error: timeout".to_string()),
    }
}

/// Result of running all of a profile's `completion_requirements`.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub passed: bool,
    pub failures: Vec<(String, String)>,
}

pub async fn evaluate_completion(
    cfg: &EvidenceConfig,
    working_dir: &Path,
    requirements: &[ArtifactSpec],
    manual_acks: &HashSet<String>,
) -> CompletionOutcome {
    let mut failures = Vec::new();
    for artifact in requirements {
        let outcome = evaluate_artifact(cfg, working_dir, artifact, manual_acks).await;
        if !outcome.passed {
            failures.push((
                artifact.name.clone(),
                outcome.diagnostic.unwrap_or_default(),
            ));
        }
    }
    CompletionOutcome {
        passed: failures.is_empty(),
        failures,
    }
}

/// Re-evaluates the active chain's not-yet-satisfied capabilities against the
/// filesystem/subprocess and, for each that now passes, marks it satisfied
/// and recomputes `blocked_intents`. This is what lets a `file_exists` /
/// `marker_found` / `command_success` capability transition out of a denial
/// mid-session (spec §4.D/§4.E), rather than only ever at activation time.
/// Returns whether anything changed.
pub async fn refresh_capabilities(
    cfg: &EvidenceConfig,
    working_dir: &Path,
    catalog: &CatalogView,
    session: &mut SessionState,
) -> bool {
    let mut seen = session.satisfied_capabilities();
    let mut changed = false;

    for skill_name in session.chain.clone() {
        let Some(skill) = catalog.skill(&skill_name.0) else {
            continue;
        };

        for capability in &skill.provides {
            if seen.contains(capability) {
                continue;
            }
            // Earliest chain skill to provide a capability owns it: mark as
            // seen before evaluating so a later provider of the same
            // capability is never consulted.
            seen.insert(capability.clone());

            let mut all_pass = true;
            for artifact in &skill.artifacts {
                let outcome =
                    evaluate_artifact(cfg, working_dir, artifact, &session.manual_acks).await;
                if !outcome.passed {
                    all_pass = false;
                    break;
                }
            }

            if all_pass {
                session.mark_satisfied(capability.clone(), skill.name.0.clone());
                changed = true;
            }
        }
    }

    if changed {
        let satisfied = session.satisfied_capabilities();
        let chain_skills = session.chain.iter().filter_map(|n| catalog.skill(&n.0));
        session.blocked_intents = crate::resolver::compute_blocked_intents(chain_skills, &satisfied);
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactSpec;
    use std::collections::HashSet;

    fn artifact(name: &str, kind: ArtifactKind) -> ArtifactSpec {
        ArtifactSpec {
            name: name.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn file_exists_passes_on_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("login.test.ts"), "").unwrap();
        let spec = artifact(
            "tests-exist",
            ArtifactKind::FileExists {
                pattern: "*.test.ts".to_string(),
            },
        );
        let outcome =
            evaluate_artifact(&EvidenceConfig::default(), dir.path(), &spec, &HashSet::new()).await;
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn file_exists_fails_on_zero_matches() {
        let dir = tempfile::tempdir().unwrap();
        let spec = artifact(
            "tests-exist",
            ArtifactKind::FileExists {
                pattern: "*.test.ts".to_string(),
            },
        );
        let outcome =
            evaluate_artifact(&EvidenceConfig::default(), dir.path(), &spec, &HashSet::new()).await;
        assert!(!outcome.passed);
    }

    #[tokio::test]
    async fn marker_found_respects_inline_flags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "Status: GREEN").unwrap();
        let spec = artifact(
            "status-green",
            ArtifactKind::MarkerFound {
                file: "README.md".to_string(),
                pattern: "(?i)status:\\s*green".to_string(),
            },
        );
        let outcome =
            evaluate_artifact(&EvidenceConfig::default(), dir.path(), &spec, &HashSet::new()).await;
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn manual_requires_acknowledgment() {
        let dir = tempfile::tempdir().unwrap();
        let spec = artifact("reviewed", ArtifactKind::Manual);
        let not_acked =
            evaluate_artifact(&EvidenceConfig::default(), dir.path(), &spec, &HashSet::new()).await;
        assert!(!not_acked.passed);

        let mut acks = HashSet::new();
        acks.insert("reviewed".to_string());
        let acked = evaluate_artifact(&EvidenceConfig::default(), dir.path(), &spec, &acks).await;
        assert!(acked.passed);
    }

    #[tokio::test]
    async fn command_success_matches_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let spec = artifact(
            "tests-pass",
            ArtifactKind::CommandSuccess {
                command: "exit 0".to_string(),
                expected_exit_code: 0,
            },
        );
        let outcome =
            evaluate_artifact(&EvidenceConfig::default(), dir.path(), &spec, &HashSet::new()).await;
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn command_success_fails_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let spec = artifact(
            "slow",
            ArtifactKind::CommandSuccess {
                command: "sleep 5".to_string(),
                expected_exit_code: 0,
            },
        );
        let cfg = EvidenceConfig {
            command_timeout: Duration::from_millis(50),
            ..EvidenceConfig::default()
        };
        let outcome = evaluate_artifact(&cfg, dir.path(), &spec, &HashSet::new()).await;
        assert!(!outcome.passed);
        assert!(outcome.diagnostic.unwrap().contains("timeout"));
    }
}
