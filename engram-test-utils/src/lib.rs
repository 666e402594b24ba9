//! Engram Test Utilities
//!
//! Centralized test infrastructure for the Engram workspace:
//! - an in-memory kernel harness wired to the hashing embedder
//! - scripted LLM responses for echo / conflict / fusion paths
//! - fixture builders for common entities

use engram_core::{EngramConfig, EngramResult, MemoryRecord};
use engram_kernel::MemoryKernel;
use engram_llm::{Embedder, EmbedAction, HashingEmbedder, LlmProvider, StaticLlm};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// Re-export the pieces tests reach for constantly.
pub use engram_core;
pub use engram_kernel;
pub use engram_llm;

/// Embedding dimensionality used across the test suite.
pub const TEST_DIMENSIONS: usize = 128;

/// A generic echo response that parses at every depth.
pub const ECHO_RESPONSE: &str = r#"{
    "paraphrases": ["a rephrased version of the memory", "the same memory said differently"],
    "keywords": ["memory", "test"],
    "implications": ["testing continues"],
    "questions": ["what was the memory about?"],
    "question_form": "what was the memory about?",
    "category": "fact",
    "importance": 0.6
}"#;

/// Config tuned for tests: in-memory store, test dimensionality.
pub fn test_config() -> EngramConfig {
    let mut config = EngramConfig::default();
    config.vector.dimensions = TEST_DIMENSIONS;
    config
}

/// Kernel on an in-memory database with the hashing embedder and a static
/// echo-shaped LLM.
pub fn test_kernel() -> EngramResult<MemoryKernel> {
    test_kernel_with(test_config())
}

/// Kernel with a custom config, same providers as `test_kernel`.
pub fn test_kernel_with(config: EngramConfig) -> EngramResult<MemoryKernel> {
    MemoryKernel::new(
        config,
        Arc::new(HashingEmbedder::new(TEST_DIMENSIONS)),
        Some(Arc::new(StaticLlm::new(ECHO_RESPONSE))),
    )
}

/// Kernel without any LLM provider: echo degrades to shallow, conflict
/// classification to COMPATIBLE.
pub fn test_kernel_without_llm() -> EngramResult<MemoryKernel> {
    MemoryKernel::new(
        test_config(),
        Arc::new(HashingEmbedder::new(TEST_DIMENSIONS)),
        None,
    )
}

/// A fresh memory fixture owned by `user`.
pub fn make_memory(user: &str, content: &str) -> MemoryRecord {
    MemoryRecord::new(user, content, chrono::Utc::now())
}

/// LLM provider returning scripted responses in order, then repeating the
/// last one. Thread-safe; useful for driving conflict-then-echo sequences.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: VecDeque<String> = responses.into_iter().map(Into::into).collect();
        let last = queue.back().cloned().unwrap_or_default();
        Self {
            responses: Mutex::new(queue),
            last: Mutex::new(last),
        }
    }
}

impl LlmProvider for ScriptedLlm {
    fn generate(&self, _prompt: &str) -> EngramResult<String> {
        let mut queue = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        match queue.pop_front() {
            Some(response) => {
                *self.last.lock().unwrap_or_else(|e| e.into_inner()) = response.clone();
                Ok(response)
            }
            None => Ok(self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()),
        }
    }
}

/// Embedder that fails every call; drives the degraded read path.
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str, _action: EmbedAction) -> EngramResult<engram_core::EmbeddingVector> {
        Err(engram_core::ProviderError::Unavailable {
            reason: "embedder offline".to_string(),
        }
        .into())
    }

    fn dimensions(&self) -> usize {
        TEST_DIMENSIONS
    }

    fn model_id(&self) -> &str {
        "failing"
    }
}
