//! Skill graph resolver: given a profile's required capabilities and a
//! skills catalog, produces a topologically ordered chain, or a structured
//! resolution error (missing provider, conflict, cycle).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::model::{Capability, Intent, SkillName, SkillSpec};
use crate::spec_loader::CatalogView;

/// Reason a given intent is currently denied, carrying enough context to
/// render a denial payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockedReason {
    pub skill: SkillName,
    pub until: Capability,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub chain: Vec<SkillName>,
    pub capabilities_required: BTreeSet<Capability>,
    pub blocked_intents: BTreeMap<Intent, BlockedReason>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("no skill provides capability '{0}'")]
    MissingProvider(Capability),
    #[error("skill '{0}' conflicts with skill '{1}'")]
    Conflict(SkillName, SkillName),
    #[error("cycle detected: {}", .0.iter().map(|s| s.0.as_str()).collect::<Vec<_>>().join(" -> "))]
    Cycle(Vec<SkillName>),
}

/// Shared tie-break: (fewer unresolved requires, lower risk, lower cost,
/// lexicographic name). Used both to pick a provider for a capability and to
/// order a topological layer, per spec so the two descriptions can't drift.
fn tie_break_key(skill: &SkillSpec, satisfied: &BTreeSet<Capability>) -> (usize, crate::model::Risk, crate::model::Cost, String) {
    let unresolved = skill.requires.difference(satisfied).count();
    (unresolved, skill.risk, skill.cost, skill.name.0.clone())
}

fn pick_provider<'a>(
    candidates: &[&'a SkillSpec],
    satisfied: &BTreeSet<Capability>,
) -> &'a SkillSpec {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| tie_break_key(a, satisfied).cmp(&tie_break_key(b, satisfied)))
        .expect("candidates is non-empty")
}

/// Resolve a profile's `capabilities_required` into an ordered chain.
pub fn resolve(
    catalog: &CatalogView,
    capabilities_required: &[Capability],
) -> Result<ResolutionResult, ResolutionError> {
    let mut selected: BTreeMap<SkillName, &SkillSpec> = BTreeMap::new();
    let mut satisfied: BTreeSet<Capability> = BTreeSet::new();
    let mut diagnostics = Vec::new();

    // Deterministic processing order for required capabilities themselves.
    let mut queue: Vec<Capability> = capabilities_required.to_vec();
    queue.sort();
    queue.dedup();

    let mut pending: Vec<Capability> = queue.clone();
    while let Some(capability) = pending.pop() {
        if satisfied.contains(&capability) {
            continue;
        }

        let candidates: Vec<&SkillSpec> = catalog
            .all_skills()
            .iter()
            .filter(|s| s.provides.contains(&capability))
            .collect();

        if candidates.is_empty() {
            return Err(ResolutionError::MissingProvider(capability));
        }

        let winner = pick_provider(&candidates, &satisfied);

        if !selected.contains_key(&winner.name) {
            selected.insert(winner.name.clone(), winner);
            diagnostics.push(format!(
                "selected '{}' to provide '{}'",
                winner.name, capability
            ));
            for req in &winner.requires {
                if !satisfied.contains(req) {
                    pending.push(req.clone());
                }
            }
        }
        satisfied.extend(winner.provides.iter().cloned());
    }

    // Conflict check: deterministic first-pair-found by name order.
    let names: Vec<&SkillName> = {
        let mut v: Vec<&SkillName> = selected.keys().collect();
        v.sort();
        v
    };
    for (i, a_name) in names.iter().enumerate() {
        let a = selected[*a_name];
        for b_name in names.iter().skip(i + 1) {
            let b = selected[*b_name];
            if a.conflicts.contains(&b.name) || b.conflicts.contains(&a.name) {
                return Err(ResolutionError::Conflict(a.name.clone(), b.name.clone()));
            }
        }
    }

    let chain = topological_order(&selected)?;

    let blocked_intents = compute_blocked_intents(
        chain.iter().map(|name| selected[name]),
        &BTreeSet::new(),
    );

    Ok(ResolutionResult {
        chain,
        capabilities_required: capabilities_required.iter().cloned().collect(),
        blocked_intents,
        diagnostics,
    })
}

/// Topological sort of the induced `requires` subgraph among `selected`
/// skills, breaking ties within a layer with [`tie_break_key`] and detecting
/// cycles via Kahn's algorithm (an empty-ready-set-before-exhaustion signals
/// a cycle; the remaining nodes are reported as the cycle path).
fn topological_order(
    selected: &BTreeMap<SkillName, &SkillSpec>,
) -> Result<Vec<SkillName>, ResolutionError> {
    // Edge skill X -> skill Y when Y provides a capability X requires: X
    // depends on Y, so Y must be placed first. in_degree counts dependencies
    // not yet placed.
    let provider_of: HashMap<&Capability, &SkillName> = {
        let mut map = HashMap::new();
        for (name, skill) in selected {
            for cap in &skill.provides {
                map.insert(cap, name);
            }
        }
        map
    };

    let mut in_degree: HashMap<&SkillName, usize> = selected.keys().map(|n| (n, 0)).collect();
    let mut dependents: HashMap<&SkillName, Vec<&SkillName>> =
        selected.keys().map(|n| (n, Vec::new())).collect();

    for (name, skill) in selected {
        for req in &skill.requires {
            if let Some(provider) = provider_of.get(req) {
                if *provider != name {
                    *in_degree.get_mut(name).unwrap() += 1;
                    dependents.get_mut(provider).unwrap().push(name);
                }
            }
        }
    }

    let mut placed: HashSet<&SkillName> = HashSet::new();
    let mut order: Vec<SkillName> = Vec::new();
    let satisfied_placeholder: BTreeSet<Capability> = BTreeSet::new();

    loop {
        let mut ready: Vec<&SkillName> = in_degree
            .iter()
            .filter(|(name, &deg)| deg == 0 && !placed.contains(*name))
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            break;
        }

        ready.sort_by(|a, b| {
            let sa = selected[*a];
            let sb = selected[*b];
            tie_break_key(sa, &satisfied_placeholder).cmp(&tie_break_key(sb, &satisfied_placeholder))
        });

        for name in ready {
            placed.insert(name);
            order.push(name.clone());
            for dep in &dependents[name] {
                *in_degree.get_mut(*dep).unwrap() -= 1;
            }
        }
    }

    if placed.len() != selected.len() {
        let remaining: Vec<SkillName> = selected
            .keys()
            .filter(|n| !placed.contains(*n))
            .cloned()
            .collect();
        return Err(ResolutionError::Cycle(remaining));
    }

    Ok(order)
}

/// Union, over the given skills (in chain order), of each `deny_until` entry
/// whose `until` capability is not in `satisfied`, keyed by intent with the
/// first-encountered reason winning.
pub fn compute_blocked_intents<'a>(
    chain_skills: impl Iterator<Item = &'a SkillSpec>,
    satisfied: &BTreeSet<Capability>,
) -> BTreeMap<Intent, BlockedReason> {
    let mut blocked = BTreeMap::new();
    for skill in chain_skills {
        for (intent, rule) in skill.deny_until() {
            if satisfied.contains(&rule.until) {
                continue;
            }
            blocked.entry(intent).or_insert_with(|| BlockedReason {
                skill: skill.name.clone(),
                until: rule.until.clone(),
                reason: rule.reason.clone(),
            });
        }
    }
    blocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactKind, ArtifactSpec, Cost, Risk, SkillSpec};
    use crate::spec_loader::{ProfilesCatalog, SkillsCatalog};

    fn skill(
        name: &str,
        provides: &[&str],
        requires: &[&str],
        risk: Risk,
        cost: Cost,
    ) -> SkillSpec {
        SkillSpec {
            name: SkillName::from(name),
            skill_path: format!("skills/{name}"),
            description: None,
            provides: provides.iter().map(|c| Capability::from(*c)).collect(),
            requires: requires.iter().map(|c| Capability::from(*c)).collect(),
            conflicts: BTreeSet::new(),
            risk,
            cost,
            artifacts: vec![ArtifactSpec {
                name: "dummy".to_string(),
                kind: ArtifactKind::Manual,
            }],
            tool_policy: None,
        }
    }

    fn catalog(skills: Vec<SkillSpec>) -> CatalogView {
        CatalogView::build(
            SkillsCatalog {
                version: "1.0".into(),
                skills,
            },
            ProfilesCatalog {
                version: "1.0".into(),
                profiles: vec![],
            },
        )
        .unwrap()
    }

    #[test]
    fn resolves_simple_chain() {
        let cat = catalog(vec![
            skill("setup", &["project_ready"], &[], Risk::Low, Cost::Low),
            skill(
                "tdd",
                &["test_written", "test_green"],
                &["project_ready"],
                Risk::Medium,
                Cost::Medium,
            ),
        ]);
        let result = resolve(&cat, &[Capability::from("test_written")]).unwrap();
        assert_eq!(
            result.chain,
            vec![SkillName::from("setup"), SkillName::from("tdd")]
        );
    }

    #[test]
    fn missing_provider_fails() {
        let cat = catalog(vec![]);
        let err = resolve(&cat, &[Capability::from("nope")]).unwrap_err();
        assert!(matches!(err, ResolutionError::MissingProvider(_)));
    }

    #[test]
    fn conflicting_skills_fail() {
        let mut a = skill("a", &["cap_a"], &[], Risk::Low, Cost::Low);
        a.conflicts.insert(SkillName::from("b"));
        let b = skill("b", &["cap_b"], &[], Risk::Low, Cost::Low);
        let cat = catalog(vec![a, b]);
        let err = resolve(
            &cat,
            &[Capability::from("cap_a"), Capability::from("cap_b")],
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::Conflict(_, _)));
    }

    #[test]
    fn tie_break_prefers_lower_risk() {
        let cat = catalog(vec![
            skill("risky", &["x"], &[], Risk::High, Cost::Low),
            skill("safe", &["x"], &[], Risk::Low, Cost::High),
        ]);
        let result = resolve(&cat, &[Capability::from("x")]).unwrap();
        assert_eq!(result.chain, vec![SkillName::from("safe")]);
    }

    #[test]
    fn detects_cycle() {
        let a = skill("a", &["a_cap"], &["b_cap"], Risk::Low, Cost::Low);
        let b = skill("b", &["b_cap"], &["a_cap"], Risk::Low, Cost::Low);
        let cat = catalog(vec![a, b]);
        let err = resolve(&cat, &[Capability::from("a_cap")]).unwrap_err();
        assert!(matches!(err, ResolutionError::Cycle(_)));
    }
}
