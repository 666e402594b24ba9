//! Provider implementations
//!
//! Concrete implementations of the Embedder and LlmProvider traits that work
//! without network access. Hosted providers (OpenAI, Ollama, Gemini, ...)
//! implement the same traits on the host side.

mod hashing;
mod static_llm;

pub use hashing::HashingEmbedder;
pub use static_llm::StaticLlm;
