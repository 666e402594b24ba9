//! Deterministic bag-of-words hashing embedder.

use crate::{token_digest, EmbedAction, Embedder};
use engram_core::{EmbeddingVector, EngramResult};

/// Embedder that folds word tokens into hash buckets and L2-normalizes.
///
/// Deterministic and offline: identical texts produce identical vectors, and
/// texts sharing vocabulary land near each other under cosine similarity.
/// Suitable for local installs without an embedding service and for tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_id: String,
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model_id: format!("hashing-bow-{}", dimensions),
            dimensions,
        }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut data = vec![0.0f32; self.dimensions];

        for token in tokenize(text) {
            let bucket = (token_digest(&token) % self.dimensions as u64) as usize;
            data[bucket] += 1.0;
        }

        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }

        data
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str, _action: EmbedAction) -> EngramResult<EmbeddingVector> {
        Ok(EmbeddingVector::new(
            self.generate(text),
            self.model_id.clone(),
        ))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("rust memory kernel", EmbedAction::Add).unwrap();
        let b = embedder.embed("rust memory kernel", EmbedAction::Search).unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_unit_norm() {
        let embedder = HashingEmbedder::new(64);
        let v = embedder.embed("some text with words", EmbedAction::Add).unwrap();
        let norm: f32 = v.data.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let embedder = HashingEmbedder::new(256);
        let base = embedder
            .embed("planning the database migration", EmbedAction::Add)
            .unwrap();
        let near = embedder
            .embed("database migration planning session", EmbedAction::Search)
            .unwrap();
        let far = embedder
            .embed("pizza toppings and weekend hiking", EmbedAction::Search)
            .unwrap();
        assert!(base.cosine_similarity(&near) > base.cosine_similarity(&far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("", EmbedAction::Add).unwrap();
        assert!(v.data.iter().all(|x| *x == 0.0));
    }
}
