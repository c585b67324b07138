//! Shared data model: capabilities, intents, artifacts, skills and profiles.
//!
//! These types are the vocabulary every other module in this crate speaks.
//! They are intentionally dumb containers; behavior (resolution, evidence
//! evaluation, gating) lives in the modules that consume them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An opaque token marking a unit of demonstrated progress (e.g. `test_written`).
///
/// Wrapped in a newtype so resolver/evidence code can't accidentally compare
/// a capability to an intent or a skill name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub String);

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Capability(value.to_string())
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Capability(value)
    }
}

/// Name of a skill, opaque to the core beyond equality/ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillName(pub String);

impl fmt::Display for SkillName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SkillName {
    fn from(value: &str) -> Self {
        SkillName(value.to_string())
    }
}

impl From<String> for SkillName {
    fn from(value: String) -> Self {
        SkillName(value)
    }
}

/// Coarse classification of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Read,
    Write,
    Edit,
    Commit,
    Push,
    Deploy,
    Delete,
    Run,
}

impl Intent {
    pub const ALL: [Intent; 8] = [
        Intent::Read,
        Intent::Write,
        Intent::Edit,
        Intent::Commit,
        Intent::Push,
        Intent::Deploy,
        Intent::Delete,
        Intent::Run,
    ];
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Intent::Read => "read",
            Intent::Write => "write",
            Intent::Edit => "edit",
            Intent::Commit => "commit",
            Intent::Push => "push",
            Intent::Deploy => "deploy",
            Intent::Delete => "delete",
            Intent::Run => "run",
        };
        f.write_str(label)
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Intent::Read),
            "write" => Ok(Intent::Write),
            "edit" => Ok(Intent::Edit),
            "commit" => Ok(Intent::Commit),
            "push" => Ok(Intent::Push),
            "deploy" => Ok(Intent::Deploy),
            "delete" => Ok(Intent::Delete),
            "run" => Ok(Intent::Run),
            other => Err(format!("unknown intent '{other}'")),
        }
    }
}

/// Risk tier a skill carries. Ordering is load-bearing: it feeds the
/// resolver's tie-break comparator (`low < medium < high < critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Risk {
    fn default() -> Self {
        Risk::Medium
    }
}

/// Cost tier a skill carries. Ordering feeds the resolver tie-break
/// (`low < medium < high`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cost {
    Low,
    Medium,
    High,
}

impl Default for Cost {
    fn default() -> Self {
        Cost::Medium
    }
}

/// Strictness a profile enforces when the gate finds a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    Strict,
    Advisory,
    Permissive,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strictness::Strict => "strict",
            Strictness::Advisory => "advisory",
            Strictness::Permissive => "permissive",
        };
        f.write_str(label)
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Strictness::Strict),
            "advisory" => Ok(Strictness::Advisory),
            "permissive" => Ok(Strictness::Permissive),
            other => Err(format!("unknown strictness '{other}'")),
        }
    }
}

/// A named, typed predicate the evidence checker evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ArtifactKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactKind {
    FileExists {
        pattern: String,
    },
    MarkerFound {
        file: String,
        pattern: String,
    },
    CommandSuccess {
        command: String,
        #[serde(default)]
        expected_exit_code: i32,
    },
    Manual,
}

/// `{intent -> {until, reason}}`: a tool invocation mapping to `intent` is
/// denied until `until` appears in the session's satisfied set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyUntilRule {
    pub until: Capability,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub deny_until: std::collections::BTreeMap<Intent, DenyUntilRule>,
}

fn default_risk() -> Risk {
    Risk::Medium
}

fn default_cost() -> Cost {
    Cost::Medium
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillSpec {
    pub name: SkillName,
    pub skill_path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provides: BTreeSet<Capability>,
    #[serde(default)]
    pub requires: BTreeSet<Capability>,
    #[serde(default)]
    pub conflicts: BTreeSet<SkillName>,
    #[serde(default = "default_risk")]
    pub risk: Risk,
    #[serde(default = "default_cost")]
    pub cost: Cost,
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    #[serde(default)]
    pub tool_policy: Option<ToolPolicy>,
}

impl SkillSpec {
    pub fn deny_until(&self) -> impl Iterator<Item = (Intent, &DenyUntilRule)> {
        self.tool_policy
            .iter()
            .flat_map(|policy| policy.deny_until.iter())
            .map(|(intent, rule)| (*intent, rule))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSpec {
    pub name: String,
    pub description: String,
    #[serde(default, rename = "match")]
    pub match_patterns: Vec<String>,
    #[serde(default)]
    pub capabilities_required: Vec<Capability>,
    #[serde(default = "default_strictness")]
    pub strictness: Strictness,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub completion_requirements: Vec<ArtifactSpec>,
}

fn default_strictness() -> Strictness {
    Strictness::Strict
}
