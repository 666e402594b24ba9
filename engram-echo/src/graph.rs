//! Knowledge-graph entity extraction and retrieval boost

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)\b").expect("valid pattern")
});
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid pattern")
});
static REPO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\brepo:[^\s]+").expect("valid pattern"));

/// Words that look like proper nouns at sentence starts but are not entities.
static NOISE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "i", "we", "the", "this", "that", "a", "an", "my", "your", "it", "he", "she", "they",
        "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december", "yes", "no", "ok",
    ]
    .into_iter()
    .collect()
});

/// An entity mention extracted from memory content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedEntity {
    pub name: String,
    pub kind: &'static str,
}

/// Regex entity extraction: proper nouns, email addresses, repo references.
pub fn extract_entities(content: &str) -> Vec<ExtractedEntity> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for capture in EMAIL_RE.find_iter(content) {
        let name = capture.as_str().to_string();
        if seen.insert(name.to_lowercase()) {
            out.push(ExtractedEntity {
                name,
                kind: "email",
            });
        }
    }
    for capture in REPO_RE.find_iter(content) {
        let name = capture.as_str().to_string();
        if seen.insert(name.to_lowercase()) {
            out.push(ExtractedEntity { name, kind: "repo" });
        }
    }
    for capture in NAME_RE.find_iter(content) {
        let name = capture.as_str().trim().to_string();
        if NOISE.contains(name.to_lowercase().as_str()) {
            continue;
        }
        if seen.insert(name.to_lowercase()) {
            out.push(ExtractedEntity {
                name,
                kind: "person",
            });
        }
    }
    out
}

/// Bounded retrieval boost when query terms overlap a memory's entities.
pub fn graph_boost(
    query_lower: &str,
    query_terms: &HashSet<String>,
    entity_names: &[String],
    weight: f64,
) -> f64 {
    for entity in entity_names {
        let entity_lower = entity.to_lowercase();
        if query_lower.contains(&entity_lower)
            || query_terms.iter().any(|term| entity_lower.contains(term))
        {
            return weight;
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_people_emails_and_repos() {
        let entities =
            extract_entities("Met Alice Chen about repo:/x, follow up at alice@example.com");
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Alice Chen"));
        assert!(names.contains(&"alice@example.com"));
        assert!(names.iter().any(|n| n.starts_with("repo:")));
    }

    #[test]
    fn test_noise_words_are_skipped() {
        let entities = extract_entities("The meeting was on Monday with Bob");
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Bob"));
        assert!(!names.contains(&"The"));
        assert!(!names.contains(&"Monday"));
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let entities = extract_entities("Bob met Bob again");
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn test_graph_boost_matches_entity() {
        let terms: HashSet<String> = ["bob".to_string()].into_iter().collect();
        let names = vec!["Bob".to_string()];
        assert_eq!(graph_boost("what did bob say", &terms, &names, 0.1), 0.1);
        let other = vec!["Alice".to_string()];
        assert_eq!(graph_boost("what did bob say", &terms, &other, 0.1), 0.0);
    }
}
