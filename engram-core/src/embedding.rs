//! Embedding vector operations

use serde::{Deserialize, Serialize};

/// Embedding vector with dynamic dimensions.
/// Supports any embedding model dimension (e.g., 384, 768, 1536).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    /// The embedding data as a vector of f32 values.
    pub data: Vec<f32>,
    /// Identifier of the model that produced this embedding.
    pub model_id: String,
}

impl EmbeddingVector {
    /// Create a new embedding vector.
    pub fn new(data: Vec<f32>, model_id: impl Into<String>) -> Self {
        Self {
            data,
            model_id: model_id.into(),
        }
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.data.len()
    }

    /// Compute cosine similarity with another vector.
    ///
    /// Returns 0.0 for mismatched dimensions or zero-norm inputs rather than
    /// erroring; callers treating "no signal" and "orthogonal" identically is
    /// the retrieval contract.
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> f32 {
        cosine_similarity(&self.data, &other.data)
    }

    /// Check if this vector carries any data.
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }

    /// Fold another vector into this one as a rolling mean, where this vector
    /// currently averages `n` members.
    pub fn rolling_mean(&self, incoming: &EmbeddingVector, n: usize) -> EmbeddingVector {
        if self.data.len() != incoming.data.len() {
            return incoming.clone();
        }
        let n = n.max(1) as f32;
        let data = self
            .data
            .iter()
            .zip(incoming.data.iter())
            .map(|(old, new)| (old * n + new) / (n + 1.0))
            .collect();
        EmbeddingVector::new(data, self.model_id.clone())
    }
}

/// Cosine similarity over raw float slices.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = EmbeddingVector::new(vec![0.5, 0.5, 0.0], "test");
        assert!((v.cosine_similarity(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = EmbeddingVector::new(vec![1.0, 0.0], "test");
        let b = EmbeddingVector::new(vec![0.0, 1.0], "test");
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_dimension_mismatch_is_zero() {
        let a = EmbeddingVector::new(vec![1.0, 0.0], "test");
        let b = EmbeddingVector::new(vec![1.0, 0.0, 0.0], "test");
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn test_rolling_mean_weighting() {
        let old = EmbeddingVector::new(vec![1.0, 0.0], "test");
        let new = EmbeddingVector::new(vec![0.0, 1.0], "test");
        let merged = old.rolling_mean(&new, 1);
        assert_eq!(merged.data, vec![0.5, 0.5]);

        let merged3 = old.rolling_mean(&new, 3);
        assert_eq!(merged3.data, vec![0.75, 0.25]);
    }
}
