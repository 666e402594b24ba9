//! Engram Echo - multi-modal encoding
//!
//! Echo encoding rehearses new content into paraphrases, keywords,
//! question-forms, and implications, mirroring how vocalizing information
//! strengthens human memory traces. The crate also hosts the regex intent
//! classifier, the hierarchical category graph, and knowledge-graph entity
//! extraction.

mod categories;
mod echo;
mod graph;
mod intent;

pub use categories::{CategoryMatch, CategoryProcessor};
pub use echo::{EchoContext, EchoProcessor, EchoResult};
pub use graph::{extract_entities, graph_boost, ExtractedEntity};
pub use intent::classify_intent;
