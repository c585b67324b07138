//! Semantic router: scores a free-text query against every known profile
//! (keyword regex + optional embedding cosine similarity) and emits a ranked
//! `RouteDecision`. Does not mutate session state.

use regex::Regex;

use crate::embedding::{cosine_similarity, Embedder, VectorStore};
use crate::model::ProfileSpec;

#[derive(Debug, Clone, Copy)]
pub struct RouterThresholds {
    pub immediate: f32,
    pub suggestion: f32,
}

impl Default for RouterThresholds {
    fn default() -> Self {
        Self {
            immediate: 0.85,
            suggestion: 0.70,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RouterWeights {
    pub keyword: f32,
    pub embedding: f32,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            keyword: 0.3,
            embedding: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    Immediate,
    Suggestion,
    Chat,
}

#[derive(Debug, Clone)]
pub struct ProfileMatch {
    pub profile_name: String,
    pub score: f32,
    pub keyword_score: f32,
    pub embedding_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub request_id: String,
    pub query: String,
    pub mode: RouteMode,
    pub candidates: Vec<ProfileMatch>,
    pub selected_profile: Option<String>,
    pub routing_time_ms: u64,
}

/// Interprets a profile pattern as a regex: multi-word phrases are matched
/// literally (case-insensitively), simple single-token patterns are
/// word-boundary anchored.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return None;
    }
    let body = if trimmed.split_whitespace().count() > 1 {
        regex::escape(trimmed)
    } else {
        format!(r"\b{}\b", regex::escape(trimmed))
    };
    Regex::new(&format!("(?i){body}")).ok()
}

fn keyword_score(profile: &ProfileSpec, query: &str) -> f32 {
    if profile.match_patterns.is_empty() {
        return 0.0;
    }
    let n = profile.match_patterns.len() as f32;
    let matched = profile
        .match_patterns
        .iter()
        .filter_map(|p| compile_pattern(p))
        .filter(|re| re.is_match(query))
        .count() as f32;
    (matched / n).min(1.0)
}

pub struct Router<'a> {
    embedder: &'a dyn Embedder,
    vector_store: Option<&'a VectorStore>,
    thresholds: RouterThresholds,
    weights: RouterWeights,
}

impl<'a> Router<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        vector_store: Option<&'a VectorStore>,
        thresholds: RouterThresholds,
        weights: RouterWeights,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            thresholds,
            weights,
        }
    }

    pub fn route(
        &self,
        query: &str,
        profiles: &[ProfileSpec],
        request_id: String,
        elapsed_ms: u64,
    ) -> RouteDecision {
        if query.trim().is_empty() || profiles.is_empty() {
            return RouteDecision {
                request_id,
                query: query.to_string(),
                mode: RouteMode::Chat,
                candidates: Vec::new(),
                selected_profile: None,
                routing_time_ms: elapsed_ms,
            };
        }

        let query_embedding = self.embedder.embed(query);

        let mut candidates: Vec<ProfileMatch> = profiles
            .iter()
            .map(|profile| {
                let kw = keyword_score(profile, query);
                let embedding_score = query_embedding.as_ref().and_then(|q| {
                    self.vector_store
                        .and_then(|store| store.vector_for(&profile.name))
                        .map(|stored| cosine_similarity(q, stored))
                });

                let combined = match embedding_score {
                    Some(e) => self.weights.keyword * kw + self.weights.embedding * e,
                    None => kw,
                };

                ProfileMatch {
                    profile_name: profile.name.clone(),
                    score: combined,
                    keyword_score: kw,
                    embedding_score,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            let profile_a = profiles.iter().find(|p| p.name == a.profile_name).unwrap();
            let profile_b = profiles.iter().find(|p| p.name == b.profile_name).unwrap();
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(profile_b.priority.cmp(&profile_a.priority))
                .then(a.profile_name.cmp(&b.profile_name))
        });

        let selected = candidates.iter().find(|candidate| {
            profiles
                .iter()
                .find(|p| p.name == candidate.profile_name)
                .map(|p| !p.match_patterns.is_empty())
                .unwrap_or(false)
                && candidate.score > 0.0
        });

        let top_score = selected.map(|c| c.score).unwrap_or(0.0);
        let mode = if top_score >= self.thresholds.immediate {
            RouteMode::Immediate
        } else if top_score >= self.thresholds.suggestion {
            RouteMode::Suggestion
        } else {
            RouteMode::Chat
        };

        RouteDecision {
            request_id,
            query: query.to_string(),
            mode,
            candidates,
            selected_profile: selected.map(|c| c.profile_name.clone()),
            routing_time_ms: elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NullEmbedder;
    use crate::model::{Capability, Strictness};

    fn profile(name: &str, patterns: &[&str], priority: i64) -> ProfileSpec {
        ProfileSpec {
            name: name.to_string(),
            description: name.to_string(),
            match_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            capabilities_required: vec![Capability::from("x")],
            strictness: Strictness::Strict,
            priority,
            completion_requirements: vec![],
        }
    }

    #[test]
    fn empty_prompt_is_chat() {
        let null = NullEmbedder;
        let router = Router::new(&null, None, RouterThresholds::default(), RouterWeights::default());
        let profiles = vec![profile("bug-fix", &["fix"], 10)];
        let decision = router.route("", &profiles, "r1".into(), 1);
        assert_eq!(decision.mode, RouteMode::Chat);
        assert!(decision.selected_profile.is_none());
    }

    #[test]
    fn higher_priority_wins_tie() {
        let null = NullEmbedder;
        let router = Router::new(&null, None, RouterThresholds::default(), RouterWeights::default());
        // Both profiles match their single pattern, so their keyword scores
        // tie at 1.0 and priority is the deciding factor.
        let profiles = vec![
            profile("bug-fix", &["fix"], 10),
            profile("new-feature", &["add"], 5),
        ];
        let decision = router.route("add a fix for the button", &profiles, "r1".into(), 1);
        assert_eq!(decision.selected_profile.as_deref(), Some("bug-fix"));
        assert!(matches!(decision.mode, RouteMode::Suggestion | RouteMode::Immediate));
    }

    #[test]
    fn empty_match_list_never_selected() {
        let null = NullEmbedder;
        let router = Router::new(&null, None, RouterThresholds::default(), RouterWeights::default());
        let profiles = vec![profile("silent", &[], 100)];
        let decision = router.route("anything at all", &profiles, "r1".into(), 1);
        assert!(decision.selected_profile.is_none());
        assert_eq!(decision.mode, RouteMode::Chat);
    }
}
