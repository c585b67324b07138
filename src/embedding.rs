//! Capability-based embedding abstraction. The router accepts an `Embedder`
//! to turn a query into a vector; a `NullEmbedder` disables the semantic
//! path entirely, collapsing the router to keyword-only scoring. Precomputed
//! profile vectors live separately in a `VectorStore` loaded from
//! `.chain/vector_store.json`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Turns free text into a unit embedding. A query-side embedder is a
/// separate concern from the precomputed `VectorStore`: the store only
/// holds vectors for known profiles, generated offline.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Disables the semantic path: embedding score is always 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmbedder;

impl Embedder for NullEmbedder {
    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorStoreFile {
    version: String,
    model: String,
    #[serde(rename = "generatedAt")]
    generated_at: String,
    skills: Vec<VectorStoreEntry>,
}

/// Field name mirrors the external JSON schema verbatim (`skillName`) even
/// though entries here are keyed by profile name; the schema is reused
/// generically for whatever catalog entity the vector was generated for.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorStoreEntry {
    #[serde(rename = "skillName")]
    skill_name: String,
    #[allow(dead_code)]
    description: String,
    #[serde(rename = "triggerExamples")]
    #[allow(dead_code)]
    trigger_examples: Vec<String>,
    embedding: Vec<f32>,
    #[allow(dead_code)]
    keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VectorStore {
    pub model: String,
    by_name: HashMap<String, Vec<f32>>,
}

impl VectorStore {
    /// Loads `path`; rejects a `model` mismatch against `expected_model`
    /// rather than silently degrading, since a mismatched model's vectors
    /// are not comparable to a freshly-authored query embedding.
    pub fn load(path: &Path, expected_model: Option<&str>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: VectorStoreFile = serde_json::from_str(&text).map_err(|err| CoreError::SpecInvalid {
            message: format!("failed to parse vector store '{}': {err}", path.display()),
            skill: None,
        })?;

        if let Some(expected) = expected_model {
            if expected != file.model {
                return Err(CoreError::SpecInvalid {
                    message: format!(
                        "vector store model '{}' does not match expected model '{expected}'",
                        file.model
                    ),
                    skill: None,
                });
            }
        }

        let by_name = file
            .skills
            .into_iter()
            .map(|entry| (entry.skill_name, entry.embedding))
            .collect();

        Ok(Self {
            model: file.model,
            by_name,
        })
    }

    pub fn vector_for(&self, name: &str) -> Option<&[f32]> {
        self.by_name.get(name).map(Vec::as_slice)
    }
}

/// Cosine similarity clamped to `[0, 1]` (embeddings are expected unit-norm,
/// but negative similarity is clamped up rather than propagated negative).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_embedder_always_none() {
        assert!(NullEmbedder.embed("add a fix for the button").is_none());
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn rejects_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_store.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","model":"model-a","generatedAt":"2026-01-01T00:00:00Z","skills":[]}"#,
        )
        .unwrap();

        let err = VectorStore::load(&path, Some("model-b")).unwrap_err();
        assert!(matches!(err, CoreError::SpecInvalid { .. }));
    }
}
