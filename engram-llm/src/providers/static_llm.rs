//! Fixed-response LLM stub.

use crate::LlmProvider;
use engram_core::EngramResult;

/// LLM provider that returns the same response for every prompt.
///
/// Used when no generation provider is configured: echo processing degrades
/// to shallow, conflict classification falls back to COMPATIBLE. Also handy
/// for driving parse paths in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticLlm {
    response: String,
}

impl StaticLlm {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl LlmProvider for StaticLlm {
    fn generate(&self, _prompt: &str) -> EngramResult<String> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_response() {
        let llm = StaticLlm::new("{\"ok\": true}");
        assert_eq!(llm.generate("anything").unwrap(), "{\"ok\": true}");
    }
}
