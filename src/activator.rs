//! Wires a router decision (or an explicit profile command) into session
//! creation: idempotency on `request_id`, conflict detection, resolution.

use chrono::Utc;

use crate::error::CoreError;
use crate::model::{Capability, Intent, SkillName, Strictness};
use crate::resolver::{self, BlockedReason, ResolutionError};
use crate::session::{SessionState, SessionStore};
use crate::spec_loader::CatalogView;

#[derive(Debug, Clone)]
pub struct ActivationResult {
    pub activated: bool,
    pub session_id: String,
    pub profile_id: String,
    pub chain: Vec<SkillName>,
    pub blocked_intents: std::collections::BTreeMap<Intent, BlockedReason>,
    pub idempotent: bool,
}

#[derive(Debug, Clone)]
pub enum ActivationOutcome {
    Activated(ActivationResult),
    Conflict { existing_session_id: String },
    Failed(ResolutionError),
}

pub fn activate(
    store: &SessionStore,
    catalog: &CatalogView,
    profile_name: &str,
    request_id: Option<String>,
    strictness_override: Option<Strictness>,
) -> Result<ActivationOutcome, CoreError> {
    if let Some(existing) = store.load_current()? {
        if existing.request_id == request_id {
            return Ok(ActivationOutcome::Activated(ActivationResult {
                activated: false,
                session_id: existing.session_id,
                profile_id: existing.profile_id,
                chain: existing.chain,
                blocked_intents: existing.blocked_intents,
                idempotent: true,
            }));
        }
        return Ok(ActivationOutcome::Conflict {
            existing_session_id: existing.session_id,
        });
    }

    let profile = match catalog.profile(profile_name) {
        Some(p) => p,
        None => {
            return Err(CoreError::spec_invalid(format!(
                "unknown profile '{profile_name}'"
            )));
        }
    };

    let capabilities_required: Vec<Capability> = profile.capabilities_required.clone();

    let resolution = match resolver::resolve(catalog, &capabilities_required) {
        Ok(result) => result,
        Err(err) => return Ok(ActivationOutcome::Failed(err)),
    };

    let strictness = strictness_override.unwrap_or(profile.strictness);
    let now = Utc::now();
    let session_id = format!("sess-{}-{}", now.timestamp_millis(), std::process::id());

    let state = SessionState {
        session_id: session_id.clone(),
        profile_id: profile.name.clone(),
        strictness,
        chain: resolution.chain.clone(),
        capabilities_required: resolution.capabilities_required.clone(),
        capabilities_satisfied: vec![],
        blocked_intents: resolution.blocked_intents.clone(),
        manual_acks: Default::default(),
        activated_at: now,
        last_updated: now,
        request_id,
    };

    store.save(&state)?;

    Ok(ActivationOutcome::Activated(ActivationResult {
        activated: true,
        session_id,
        profile_id: profile.name.clone(),
        chain: resolution.chain,
        blocked_intents: resolution.blocked_intents,
        idempotent: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactKind, ArtifactSpec, Cost, Risk, SkillSpec};
    use crate::spec_loader::{ProfilesCatalog, SkillsCatalog};
    use std::collections::BTreeSet;

    fn catalog() -> CatalogView {
        let skill = SkillSpec {
            name: SkillName::from("tdd"),
            skill_path: "skills/tdd".to_string(),
            description: None,
            provides: [Capability::from("test_written"), Capability::from("test_green")]
                .into_iter()
                .collect(),
            requires: BTreeSet::new(),
            conflicts: BTreeSet::new(),
            risk: Risk::Medium,
            cost: Cost::Medium,
            artifacts: vec![ArtifactSpec {
                name: "tests-exist".to_string(),
                kind: ArtifactKind::FileExists {
                    pattern: "**/*.test.ts".to_string(),
                },
            }],
            tool_policy: None,
        };

        let profile = crate::model::ProfileSpec {
            name: "bug-fix".to_string(),
            description: "fix a reported bug".to_string(),
            match_patterns: vec!["fix".to_string(), "bug".to_string()],
            capabilities_required: vec![Capability::from("test_written"), Capability::from("test_green")],
            strictness: Strictness::Strict,
            priority: 10,
            completion_requirements: vec![],
        };

        CatalogView::build(
            SkillsCatalog {
                version: "1.0".into(),
                skills: vec![skill],
            },
            ProfilesCatalog {
                version: "1.0".into(),
                profiles: vec![profile],
            },
        )
        .unwrap()
    }

    #[test]
    fn activates_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let cat = catalog();

        let outcome = activate(&store, &cat, "bug-fix", Some("req-1".into()), None).unwrap();
        match outcome {
            ActivationOutcome::Activated(result) => {
                assert!(result.activated);
                assert!(!result.idempotent);
                assert_eq!(result.chain, vec![SkillName::from("tdd")]);
            }
            other => panic!("expected Activated, got {other:?}"),
        }
    }

    #[test]
    fn repeated_request_id_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let cat = catalog();

        let first = activate(&store, &cat, "bug-fix", Some("req-1".into()), None).unwrap();
        let second = activate(&store, &cat, "bug-fix", Some("req-1".into()), None).unwrap();

        let (first_id, second_id, idempotent) = match (first, second) {
            (ActivationOutcome::Activated(a), ActivationOutcome::Activated(b)) => {
                (a.session_id, b.session_id, b.idempotent)
            }
            _ => panic!("expected both activations to succeed"),
        };
        assert_eq!(first_id, second_id);
        assert!(idempotent);
    }

    #[test]
    fn different_request_id_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let cat = catalog();

        activate(&store, &cat, "bug-fix", Some("req-1".into()), None).unwrap();
        let outcome = activate(&store, &cat, "bug-fix", Some("req-2".into()), None).unwrap();
        assert!(matches!(outcome, ActivationOutcome::Conflict { .. }));
    }
}
