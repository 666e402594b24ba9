//! Confidentiality scope detection

use engram_core::ConfidentialityScope;

/// Keyword tables routing content to a scope when nothing explicit is given.
const FINANCE_HINTS: &[&str] = &[
    "bank", "salary", "invest", "loan", "mortgage", "budget", "tax", "rent", "bill", "iban",
];
const HEALTH_HINTS: &[&str] = &[
    "doctor", "medication", "diagnosis", "allergy", "therapy", "prescription", "clinic",
];
const PRIVATE_HINTS: &[&str] = &[
    "password", "secret", "api key", "api_key", "token", "credential", "pin",
];
const PERSONAL_HINTS: &[&str] = &[
    "family", "friend", "birthday", "wife", "husband", "partner", "vacation", "hobby",
];

/// Resolve a scope from (explicit, metadata, categories, content keywords),
/// in that precedence, defaulting to `work`.
pub fn detect_confidentiality_scope(
    explicit: Option<ConfidentialityScope>,
    metadata: &serde_json::Map<String, serde_json::Value>,
    categories: &[String],
    content: &str,
) -> ConfidentialityScope {
    if let Some(scope) = explicit {
        return scope;
    }

    if let Some(scope) = metadata
        .get("confidentiality_scope")
        .and_then(|v| v.as_str())
        .and_then(|s| ConfidentialityScope::from_db_str(s).ok())
    {
        return scope;
    }

    for category in categories {
        let category = category.to_lowercase();
        if category.contains("finance") {
            return ConfidentialityScope::Finance;
        }
        if category.contains("health") {
            return ConfidentialityScope::Health;
        }
        if category.contains("personal") || category.contains("relationship") {
            return ConfidentialityScope::Personal;
        }
    }

    let content_lower = content.to_lowercase();
    let hit = |hints: &[&str]| hints.iter().any(|hint| content_lower.contains(hint));
    if hit(PRIVATE_HINTS) {
        return ConfidentialityScope::Private;
    }
    if hit(FINANCE_HINTS) {
        return ConfidentialityScope::Finance;
    }
    if hit(HEALTH_HINTS) {
        return ConfidentialityScope::Health;
    }
    if hit(PERSONAL_HINTS) {
        return ConfidentialityScope::Personal;
    }

    ConfidentialityScope::Work
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_metadata() -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    #[test]
    fn test_explicit_wins() {
        let scope = detect_confidentiality_scope(
            Some(ConfidentialityScope::Health),
            &empty_metadata(),
            &[],
            "my bank account",
        );
        assert_eq!(scope, ConfidentialityScope::Health);
    }

    #[test]
    fn test_metadata_beats_content() {
        let mut metadata = empty_metadata();
        metadata.insert(
            "confidentiality_scope".to_string(),
            serde_json::Value::String("finance".to_string()),
        );
        let scope =
            detect_confidentiality_scope(None, &metadata, &[], "saw the doctor on tuesday");
        assert_eq!(scope, ConfidentialityScope::Finance);
    }

    #[test]
    fn test_category_hints() {
        let scope = detect_confidentiality_scope(
            None,
            &empty_metadata(),
            &["health".to_string()],
            "note",
        );
        assert_eq!(scope, ConfidentialityScope::Health);
    }

    #[test]
    fn test_content_keywords() {
        let metadata = empty_metadata();
        assert_eq!(
            detect_confidentiality_scope(None, &metadata, &[], "the wifi password is hunter2"),
            ConfidentialityScope::Private
        );
        assert_eq!(
            detect_confidentiality_scope(None, &metadata, &[], "salary review next month"),
            ConfidentialityScope::Finance
        );
        assert_eq!(
            detect_confidentiality_scope(None, &metadata, &[], "new medication schedule"),
            ConfidentialityScope::Health
        );
        assert_eq!(
            detect_confidentiality_scope(None, &metadata, &[], "dinner with family"),
            ConfidentialityScope::Personal
        );
    }

    #[test]
    fn test_default_is_work() {
        assert_eq!(
            detect_confidentiality_scope(None, &empty_metadata(), &[], "shipped the release"),
            ConfidentialityScope::Work
        );
    }
}
