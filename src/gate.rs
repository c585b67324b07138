//! Policy gate: classifies a pending tool invocation into intents, looks up
//! which intents the active session currently denies, and emits an
//! allow/deny decision with a structured denial message. Also runs the
//! completion gate on session-stop signals.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

use crate::model::{Capability, Intent, SkillName, Strictness};
use crate::resolver::BlockedReason;
use crate::session::SessionState;
use crate::spec_loader::CatalogView;

/// Named tools that are never denied (read-class): they map straight to
/// `Intent::Read`, which the catalogs in practice never list in
/// `deny_until`, making the mapping "never denied" an emergent property
/// rather than a special case in the gate itself.
const NAMED_TOOL_TABLE: &[(&str, Intent)] = &[
    ("write", Intent::Write),
    ("edit", Intent::Edit),
    ("multiedit", Intent::Edit),
    ("notebookedit", Intent::Edit),
    ("read", Intent::Read),
    ("glob", Intent::Read),
    ("grep", Intent::Read),
];

const SHELL_TOOL_NAMES: &[&str] = &["bash", "shell", "execute_bash", "run_command", "run_shell_command"];

/// Ordered regex -> intent table reproducing every canonical pattern the
/// gate must recognize. Built once at gate construction, not per call.
pub struct PolicyGate {
    bash_patterns: Vec<(Regex, Intent)>,
}

impl PolicyGate {
    pub fn new() -> Self {
        let patterns: &[(&str, Intent)] = &[
            (r"\bgit\s+commit\b", Intent::Commit),
            (r"\bgit\s+push\b", Intent::Push),
            (r"\bgit\s+push\b.*--delete", Intent::Delete),
            (r"\brm\s+-r[f]?\b", Intent::Delete),
            (r"\bgit\s+branch\s+-[dD]\b", Intent::Delete),
            (r"\b(npm|yarn|pnpm)\s+publish\b", Intent::Deploy),
            (r"\bdeploy\b", Intent::Deploy),
            (r"\b(echo|cat)\s+.*>\s", Intent::Write),
            (r"\btee\b", Intent::Write),
            (r"\bmkdir\b", Intent::Write),
            (r"\btouch\b", Intent::Write),
        ];

        let bash_patterns = patterns
            .iter()
            .map(|(pattern, intent)| (Regex::new(pattern).expect("canonical pattern compiles"), *intent))
            .collect();

        Self { bash_patterns }
    }

    /// Classifies a tool invocation into the set of intents it maps to. A
    /// tool invocation may map to zero intents, in which case it is never
    /// blocked by this gate.
    pub fn classify(&self, tool_name: &str, input: &Value) -> BTreeSet<Intent> {
        let lowered = tool_name.to_ascii_lowercase();

        if let Some((_, intent)) = NAMED_TOOL_TABLE.iter().find(|(name, _)| *name == lowered) {
            return std::iter::once(*intent).collect();
        }

        if SHELL_TOOL_NAMES.contains(&lowered.as_str()) {
            let command = extract_command(input).unwrap_or_default();
            return self
                .bash_patterns
                .iter()
                .filter(|(re, _)| re.is_match(&command))
                .map(|(_, intent)| *intent)
                .collect();
        }

        BTreeSet::new()
    }

    /// Given `intents` observed on a tool call and the session's current
    /// `blocked_intents`, produces a gate decision respecting `strictness`.
    /// `catalog` is consulted only to find the next-chain skill that
    /// provides an unsatisfied capability for the denial payload.
    pub fn decide(
        &self,
        intents: &BTreeSet<Intent>,
        session: &SessionState,
        strictness: Strictness,
        catalog: &CatalogView,
    ) -> PolicyDecision {
        let blocked: std::collections::BTreeMap<Intent, BlockedReason> = intents
            .iter()
            .filter_map(|intent| {
                session
                    .blocked_intents
                    .get(intent)
                    .map(|reason| (*intent, reason.clone()))
            })
            .collect();

        if blocked.is_empty() {
            return PolicyDecision::Allow {
                observed: intents.clone(),
                warning: None,
            };
        }

        let payload = build_deny_payload(&blocked, session, catalog);

        match strictness {
            Strictness::Permissive => PolicyDecision::Allow {
                observed: intents.clone(),
                warning: None,
            },
            Strictness::Advisory => PolicyDecision::Allow {
                observed: intents.clone(),
                warning: Some(payload),
            },
            Strictness::Strict => PolicyDecision::Deny(payload),
        }
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_command(input: &Value) -> Option<String> {
    input
        .get("command")
        .and_then(Value::as_str)
        .or_else(|| input.get("input").and_then(|v| v.get("command")).and_then(Value::as_str))
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub enum PolicyDecision {
    Allow {
        observed: BTreeSet<Intent>,
        warning: Option<DenyPayload>,
    },
    Deny(DenyPayload),
}

#[derive(Debug, Clone)]
pub struct DenyPayload {
    pub blocked: std::collections::BTreeMap<Intent, BlockedReason>,
    pub unsatisfied: Vec<crate::model::Capability>,
    pub next_skill: Option<SkillName>,
    pub next_step: String,
}

impl DenyPayload {
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("## CHAIN ENFORCEMENT: BLOCKED\n\n");
        for (intent, reason) in &self.blocked {
            out.push_str(&format!(
                "- `{intent}` blocked: {} (Skill(skill: \"{}\"), until: `{}`)\n",
                reason.reason, reason.skill, reason.until
            ));
        }
        out.push_str("\nNEXT STEP: ");
        out.push_str(&self.next_step);
        out.push('\n');
        out
    }
}

fn build_deny_payload(
    blocked: &std::collections::BTreeMap<Intent, BlockedReason>,
    session: &SessionState,
    catalog: &CatalogView,
) -> DenyPayload {
    let unsatisfied: Vec<Capability> = {
        let mut caps: Vec<_> = blocked.values().map(|r| r.until.clone()).collect();
        caps.sort();
        caps.dedup();
        caps
    };

    // The chain skill that *provides* an unsatisfied capability, not merely
    // the one that declared the deny_until rule: those coincide only when a
    // single skill both declares the rule and supplies the capability.
    let next_skill = session
        .chain
        .iter()
        .find(|skill_name| {
            catalog
                .skill(&skill_name.0)
                .map(|skill| skill.provides.iter().any(|cap| unsatisfied.contains(cap)))
                .unwrap_or(false)
        })
        .cloned();

    let next_step = match blocked.values().next() {
        Some(reason) => format!(
            "satisfy capability '{}' ({}) before retrying this action.",
            reason.until, reason.reason
        ),
        None => "review the active skill chain's requirements.".to_string(),
    };

    DenyPayload {
        blocked: blocked.clone(),
        unsatisfied,
        next_skill,
        next_step,
    }
}
