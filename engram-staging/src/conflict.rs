//! Write-time conflict classification against the nearest existing memory

use engram_core::{ConflictClass, MemoryRecord};
use engram_llm::LlmProvider;
use tracing::warn;

const CONFLICT_PROMPT: &str = "Two memories about the same user may disagree.\n\
Existing memory (created {existing_created_at}, accessed {existing_access_count}x, \
strength {existing_strength:.2}):\n{existing_memory}\n\n\
New memory:\n{new_memory}\n\n\
Classify their relationship as one of COMPATIBLE, CONTRADICTORY, SUBSUMES \
(new replaces existing), SUBSUMED (existing already covers new).\n\
Respond with a JSON object: {\"classification\": ..., \"confidence\": 0.0-1.0, \
\"merged_content\": optional merged text, \"explanation\": short reason}.";

/// Outcome of classifying a proposed write against an existing memory.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConflictResolution {
    pub classification: ConflictClass,
    pub confidence: f64,
    pub merged_content: Option<String>,
    pub explanation: String,
}

impl WriteConflictResolution {
    /// The conservative null action used when classification cannot run.
    fn compatible(explanation: &str) -> Self {
        Self {
            classification: ConflictClass::Compatible,
            confidence: 0.5,
            merged_content: None,
            explanation: explanation.to_string(),
        }
    }
}

/// Classify a new write against its nearest existing memory via the LLM.
///
/// Any failure (provider down, unparseable output) falls back to COMPATIBLE
/// with confidence 0.5: the null action risks a duplicate, never data loss.
pub fn resolve_write_conflict(
    existing: &MemoryRecord,
    new_content: &str,
    llm: Option<&dyn LlmProvider>,
) -> WriteConflictResolution {
    let Some(llm) = llm else {
        return WriteConflictResolution::compatible("No LLM provider configured");
    };

    let prompt = CONFLICT_PROMPT
        .replace("{existing_created_at}", &existing.created_at.to_rfc3339())
        .replace(
            "{existing_access_count}",
            &existing.access_count.to_string(),
        )
        .replace(
            "{existing_strength:.2}",
            &format!("{:.2}", existing.strength),
        )
        .replace("{existing_memory}", &existing.content)
        .replace("{new_memory}", new_content);

    let response = match llm.generate(&prompt) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "conflict resolution LLM call failed");
            return WriteConflictResolution::compatible("LLM call failed");
        }
    };

    match parse_resolution(&response) {
        Some(resolution) => resolution,
        None => {
            warn!("conflict resolution parsing failed");
            WriteConflictResolution::compatible("Failed to parse LLM response")
        }
    }
}

fn parse_resolution(response: &str) -> Option<WriteConflictResolution> {
    let value: serde_json::Value = serde_json::from_str(response.trim()).ok()?;
    let object = value.as_object()?;

    let classification = object
        .get("classification")
        .and_then(|v| v.as_str())
        .and_then(|s| ConflictClass::from_db_str(s).ok())
        .unwrap_or(ConflictClass::Compatible);
    let confidence = match object.get("confidence") {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.5),
        _ => 0.5,
    };

    Some(WriteConflictResolution {
        classification,
        confidence: confidence.clamp(0.0, 1.0),
        merged_content: object
            .get("merged_content")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        explanation: object
            .get("explanation")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_llm::StaticLlm;

    fn existing() -> MemoryRecord {
        MemoryRecord::new("u1", "user prefers coffee", chrono::Utc::now())
    }

    #[test]
    fn test_contradictory_classification() {
        let llm = StaticLlm::new(
            r#"{"classification": "CONTRADICTORY", "confidence": 0.9, "explanation": "opposite"}"#,
        );
        let resolution = resolve_write_conflict(&existing(), "user hates coffee", Some(&llm));
        assert_eq!(resolution.classification, ConflictClass::Contradictory);
        assert_eq!(resolution.confidence, 0.9);
    }

    #[test]
    fn test_subsumes_carries_merged_content() {
        let llm = StaticLlm::new(
            r#"{"classification": "SUBSUMES", "confidence": 0.8, "merged_content": "user prefers oat-milk coffee"}"#,
        );
        let resolution =
            resolve_write_conflict(&existing(), "user prefers oat-milk coffee", Some(&llm));
        assert_eq!(resolution.classification, ConflictClass::Subsumes);
        assert_eq!(
            resolution.merged_content.as_deref(),
            Some("user prefers oat-milk coffee")
        );
    }

    #[test]
    fn test_garbage_defaults_to_compatible() {
        let llm = StaticLlm::new("certainly! here's my analysis...");
        let resolution = resolve_write_conflict(&existing(), "anything", Some(&llm));
        assert_eq!(resolution.classification, ConflictClass::Compatible);
        assert_eq!(resolution.confidence, 0.5);
    }

    #[test]
    fn test_missing_llm_defaults_to_compatible() {
        let resolution = resolve_write_conflict(&existing(), "anything", None);
        assert_eq!(resolution.classification, ConflictClass::Compatible);
    }
}
