//! Session store: the single durable per-working-directory record consulted
//! by every gating decision. Writes are atomic (temp file + rename); an
//! advisory `fd-lock` guards every read-modify-write cycle.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{Capability, Intent, SkillName, Strictness};
use crate::resolver::BlockedReason;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySatisfaction {
    pub capability: Capability,
    pub evidence_source: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub profile_id: String,
    pub strictness: Strictness,
    pub chain: Vec<SkillName>,
    pub capabilities_required: BTreeSet<Capability>,
    pub capabilities_satisfied: Vec<CapabilitySatisfaction>,
    pub blocked_intents: BTreeMap<Intent, BlockedReason>,
    #[serde(default)]
    pub manual_acks: HashSet<String>,
    pub activated_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl SessionState {
    pub fn satisfied_capabilities(&self) -> BTreeSet<Capability> {
        self.capabilities_satisfied
            .iter()
            .map(|c| c.capability.clone())
            .collect()
    }

    pub fn mark_satisfied(&mut self, capability: Capability, evidence_source: impl Into<String>) {
        if self.satisfied_capabilities().contains(&capability) {
            return;
        }
        self.capabilities_satisfied.push(CapabilitySatisfaction {
            capability,
            evidence_source: evidence_source.into(),
            at: Utc::now(),
        });
    }
}

/// Loads, mutates, and persists the single active session for a working
/// directory at `<root>/.chain/session.json`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

const MAX_READ_RETRIES: u32 = 3;

impl SessionStore {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: working_dir.into(),
        }
    }

    fn chain_dir(&self) -> PathBuf {
        self.root.join(".chain")
    }

    pub fn session_path(&self) -> PathBuf {
        self.chain_dir().join("session.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.chain_dir().join("session.lock")
    }

    fn archive_dir(&self) -> PathBuf {
        self.chain_dir().join("archive")
    }

    pub fn observability_log_path(&self) -> PathBuf {
        self.chain_dir().join("observability.log")
    }

    /// Returns `None` if no session file exists. Tolerates a torn read by
    /// retrying up to [`MAX_READ_RETRIES`] times with a short backoff before
    /// surfacing [`CoreError::SessionCorrupt`].
    pub fn load_current(&self) -> Result<Option<SessionState>, CoreError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }

        let mut last_err = None;
        for attempt in 0..MAX_READ_RETRIES {
            match std::fs::read_to_string(&path) {
                Ok(text) => match serde_json::from_str::<SessionState>(&text) {
                    Ok(state) => return Ok(Some(state)),
                    Err(err) => {
                        last_err = Some(err.to_string());
                        if attempt + 1 < MAX_READ_RETRIES {
                            std::thread::sleep(backoff_delay(attempt));
                        }
                    }
                },
                Err(err) => {
                    last_err = Some(err.to_string());
                    if attempt + 1 < MAX_READ_RETRIES {
                        std::thread::sleep(backoff_delay(attempt));
                    }
                }
            }
        }

        Err(CoreError::SessionCorrupt {
            message: last_err.unwrap_or_else(|| "unreadable session file".to_string()),
            file: Some(path),
        })
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, CoreError>) -> Result<T, CoreError> {
        std::fs::create_dir_all(self.chain_dir()).map_err(|source| CoreError::Io {
            path: self.chain_dir(),
            source,
        })?;

        let lock_path = self.lock_path();
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| CoreError::Io {
                path: lock_path.clone(),
                source,
            })?;

        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(|err| CoreError::LockContention {
            message: format!("failed to acquire session lock: {err}"),
        })?;

        f()
    }

    /// Serializes `state` to a sibling temp file and renames it over
    /// `session.json`, so readers never observe a truncated file.
    pub fn save(&self, state: &SessionState) -> Result<(), CoreError> {
        self.with_lock(|| {
            let path = self.session_path();
            let tmp_path = self
                .chain_dir()
                .join(format!("session.json.tmp-{}", std::process::id()));

            let json = serde_json::to_string_pretty(state).map_err(|err| CoreError::SpecInvalid {
                message: format!("failed to serialize session state: {err}"),
                skill: None,
            })?;

            std::fs::write(&tmp_path, json).map_err(|source| CoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;

            std::fs::rename(&tmp_path, &path).map_err(|source| CoreError::Io {
                path: path.clone(),
                source,
            })?;

            Ok(())
        })
    }

    pub fn clear_current(&self) -> Result<bool, CoreError> {
        self.with_lock(|| {
            let path = self.session_path();
            if !path.exists() {
                return Ok(false);
            }
            std::fs::remove_file(&path).map_err(|source| CoreError::Io {
                path: path.clone(),
                source,
            })?;
            Ok(true)
        })
    }

    /// Moves the current session into `.chain/archive/<timestamp>-<id>.json`
    /// and removes the live session file.
    pub fn archive(&self, state: &SessionState) -> Result<PathBuf, CoreError> {
        self.with_lock(|| {
            std::fs::create_dir_all(self.archive_dir()).map_err(|source| CoreError::Io {
                path: self.archive_dir(),
                source,
            })?;

            let timestamp = state.last_updated.format("%Y%m%dT%H%M%SZ");
            let archive_path = self
                .archive_dir()
                .join(format!("{timestamp}-{}.json", state.session_id));

            let json = serde_json::to_string_pretty(state).map_err(|err| CoreError::SpecInvalid {
                message: format!("failed to serialize session state: {err}"),
                skill: None,
            })?;
            std::fs::write(&archive_path, json).map_err(|source| CoreError::Io {
                path: archive_path.clone(),
                source,
            })?;

            let live_path = self.session_path();
            if live_path.exists() {
                std::fs::remove_file(&live_path).map_err(|source| CoreError::Io {
                    path: live_path,
                    source,
                })?;
            }

            Ok(archive_path)
        })
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 5u64 * 2u64.pow(attempt);
    Duration::from_millis(base_ms)
}

pub fn skills_catalog_path(working_dir: &Path) -> PathBuf {
    working_dir.join("chains").join("skills.yaml")
}

pub fn profiles_catalog_path(working_dir: &Path) -> PathBuf {
    working_dir.join("chains").join("profiles.yaml")
}

pub fn vector_store_path(working_dir: &Path) -> PathBuf {
    working_dir.join(".chain").join("vector_store.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Strictness;

    fn sample_state() -> SessionState {
        let now = Utc::now();
        SessionState {
            session_id: "sess-1".to_string(),
            profile_id: "bug-fix".to_string(),
            strictness: Strictness::Strict,
            chain: vec![SkillName::from("tdd")],
            capabilities_required: BTreeSet::new(),
            capabilities_satisfied: vec![],
            blocked_intents: BTreeMap::new(),
            manual_acks: HashSet::new(),
            activated_at: now,
            last_updated: now,
            request_id: Some("req-1".to_string()),
        }
    }

    #[test]
    fn load_current_is_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load_current().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let state = sample_state();
        store.save(&state).unwrap();

        let loaded = store.load_current().unwrap().unwrap();
        assert_eq!(loaded.session_id, state.session_id);
        assert_eq!(loaded.request_id, state.request_id);
    }

    #[test]
    fn clear_current_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&sample_state()).unwrap();
        assert!(store.clear_current().unwrap());
        assert!(store.load_current().unwrap().is_none());
        assert!(!store.clear_current().unwrap());
    }

    #[test]
    fn archive_moves_session_and_clears_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let state = sample_state();
        store.save(&state).unwrap();

        let archive_path = store.archive(&state).unwrap();
        assert!(archive_path.exists());
        assert!(store.load_current().unwrap().is_none());
    }

    #[test]
    fn corrupt_session_file_surfaces_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join(".chain")).unwrap();
        std::fs::write(store.session_path(), "not json").unwrap();

        let err = store.load_current().unwrap_err();
        assert!(matches!(err, CoreError::SessionCorrupt { .. }));
    }
}
