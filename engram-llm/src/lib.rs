//! Engram LLM - provider seams
//!
//! Provider-agnostic traits for embeddings and text generation. The kernel
//! treats both as opaque blocking calls; production providers live in the
//! host. This crate ships a deterministic hashing embedder (offline/local
//! use and tests) and a static LLM stub.

use engram_core::{EmbeddingVector, EngramResult, ProviderError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod providers;

pub use providers::{HashingEmbedder, StaticLlm};

// ============================================================================
// EMBEDDING PROVIDER TRAIT
// ============================================================================

/// Purpose of an embedding request. Providers may prefix or route by action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbedAction {
    Add,
    Search,
    Update,
    Forget,
}

impl EmbedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedAction::Add => "add",
            EmbedAction::Search => "search",
            EmbedAction::Update => "update",
            EmbedAction::Forget => "forget",
        }
    }
}

/// Trait for embedding providers.
/// Implementations must be thread-safe (Send + Sync); calls block.
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    fn embed(&self, text: &str, action: EmbedAction) -> EngramResult<EmbeddingVector>;

    /// Generate embeddings for multiple texts in a batch.
    fn embed_batch(
        &self,
        texts: &[&str],
        action: EmbedAction,
    ) -> EngramResult<Vec<EmbeddingVector>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, action)?);
        }
        Ok(results)
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Model identifier for this provider.
    fn model_id(&self) -> &str;
}

// ============================================================================
// LLM PROVIDER TRAIT
// ============================================================================

/// Trait for text generation providers. No streaming at this layer.
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the prompt.
    fn generate(&self, prompt: &str) -> EngramResult<String>;
}

/// Stable 64-bit digest of a token, used by the hashing embedder.
pub(crate) fn token_digest(token: &str) -> u64 {
    let hash = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(bytes)
}

/// Convenience error constructor for providers reporting downtime.
pub fn provider_unavailable(reason: impl Into<String>) -> ProviderError {
    ProviderError::Unavailable {
        reason: reason.into(),
    }
}
