//! Invariant validation for staged writes

use chrono::Utc;
use engram_core::{CommitChecks, EngramResult, InvariantConflict, InvariantRecord, MemoryId};
use engram_storage::Store;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid pattern")
});
static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:my\s+name\s+is|name:)\s*([A-Za-z][A-Za-z\s'-]{1,80})")
        .expect("valid pattern")
});
static LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:i\s+live\s+in|based\s+in|location:)\s*([A-Za-z][A-Za-z\s'-]{1,80})")
        .expect("valid pattern")
});
static SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|api[_\s-]?key|secret|access token|private key)\b")
        .expect("valid pattern")
});

/// Evaluates proposed writes against stored identity invariants.
pub struct InvariantEngine {
    store: Arc<Store>,
}

impl InvariantEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Risk checks for a proposed ADD.
    ///
    /// Risk floors: clean 0.15, duplicate 0.35, invariant conflict 0.72,
    /// PII 0.85. Conflicts or PII force the commit into AUTO_STASHED.
    pub fn evaluate_add(&self, user_id: &str, content: &str) -> EngramResult<CommitChecks> {
        let mut checks = CommitChecks::default();

        if let Some(duplicate) = self.store.find_exact_content(user_id, content)? {
            checks.duplicate_of = Some(duplicate.memory_id);
            checks.risk_score = checks.risk_score.max(0.35);
        }

        let mut conflicts: Vec<InvariantConflict> = Vec::new();
        for (key, proposed) in extract_invariant_pairs(content) {
            let Some(current) = self.store.get_invariant(user_id, &key)? else {
                continue;
            };
            let current_value = current.value.trim();
            if !current_value.is_empty()
                && !current_value.eq_ignore_ascii_case(proposed.trim())
            {
                conflicts.push(InvariantConflict {
                    key,
                    existing: current_value.to_string(),
                    proposed: proposed.trim().to_string(),
                });
            }
        }
        if !conflicts.is_empty() {
            checks.invariants_ok = false;
            checks.conflicts = conflicts;
            checks.risk_score = checks.risk_score.max(0.72);
        }

        if SECRET_RE.is_match(content) {
            checks.pii_risk = true;
            checks.risk_score = checks.risk_score.max(0.85);
        }

        if checks.conflicts.is_empty() && !checks.pii_risk && checks.duplicate_of.is_none() {
            checks.risk_score = checks.risk_score.max(0.15);
        }

        Ok(checks)
    }

    /// Persist identity pairs found in applied content.
    pub fn upsert_invariants_from_content(
        &self,
        user_id: &str,
        content: &str,
        source_memory_id: Option<MemoryId>,
    ) -> EngramResult<()> {
        let now = Utc::now();
        for (key, value) in extract_invariant_pairs(content) {
            self.store.upsert_invariant(&InvariantRecord {
                user_id: user_id.to_string(),
                key,
                value,
                category: "identity".to_string(),
                confidence: 0.9,
                source_memory_id,
                created_at: now,
                updated_at: now,
            })?;
        }
        Ok(())
    }
}

/// Identity pairs extractable from free text.
pub(crate) fn extract_invariant_pairs(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    if let Some(captures) = NAME_RE.captures(content) {
        if let Some(name) = captures.get(1) {
            pairs.push(("identity.name".to_string(), name.as_str().trim().to_string()));
        }
    }
    if let Some(email) = EMAIL_RE.find(content) {
        pairs.push((
            "identity.primary_email".to_string(),
            email.as_str().trim().to_string(),
        ));
    }
    if let Some(captures) = LOCATION_RE.captures(content) {
        if let Some(location) = captures.get(1) {
            pairs.push((
                "identity.location".to_string(),
                location.as_str().trim().to_string(),
            ));
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::MemoryRecord;

    fn engine() -> (Arc<Store>, InvariantEngine) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = InvariantEngine::new(Arc::clone(&store));
        (store, engine)
    }

    #[test]
    fn test_extract_identity_pairs() {
        let pairs = extract_invariant_pairs(
            "my name is Alice, reach me at alice@example.com, I live in Lisbon",
        );
        assert!(pairs.contains(&("identity.name".to_string(), "Alice".to_string())));
        assert!(pairs.contains(&(
            "identity.primary_email".to_string(),
            "alice@example.com".to_string()
        )));
        assert!(pairs.contains(&("identity.location".to_string(), "Lisbon".to_string())));
    }

    #[test]
    fn test_clean_content_has_floor_risk() {
        let (_, engine) = engine();
        let checks = engine.evaluate_add("u1", "the deploy finished fine").unwrap();
        assert!(checks.invariants_ok);
        assert!(!checks.pii_risk);
        assert_eq!(checks.risk_score, 0.15);
        assert!(!checks.requires_stash());
    }

    #[test]
    fn test_pii_detection() {
        let (_, engine) = engine();
        let checks = engine
            .evaluate_add("u1", "my api_key=sk-abc123")
            .unwrap();
        assert!(checks.pii_risk);
        assert!(checks.risk_score >= 0.85);
        assert!(checks.requires_stash());
    }

    #[test]
    fn test_duplicate_detection() {
        let (store, engine) = engine();
        let existing = MemoryRecord::new("u1", "the deploy finished fine", Utc::now());
        let id = store.add_memory(&existing).unwrap();

        let checks = engine
            .evaluate_add("u1", "The deploy finished fine")
            .unwrap();
        assert_eq!(checks.duplicate_of, Some(id));
        assert!(checks.risk_score >= 0.35);
        // A duplicate alone does not stash.
        assert!(!checks.requires_stash());
    }

    #[test]
    fn test_invariant_conflict_detection() {
        let (_, engine) = engine();
        engine
            .upsert_invariants_from_content("u1", "my name is Alice", None)
            .unwrap();

        let checks = engine.evaluate_add("u1", "my name is Bob").unwrap();
        assert!(!checks.invariants_ok);
        assert_eq!(checks.conflicts.len(), 1);
        assert_eq!(checks.conflicts[0].key, "identity.name");
        assert_eq!(checks.conflicts[0].existing, "Alice");
        assert_eq!(checks.conflicts[0].proposed, "Bob");
        assert!(checks.risk_score >= 0.72);
        assert!(checks.requires_stash());
    }

    #[test]
    fn test_same_value_is_not_a_conflict() {
        let (_, engine) = engine();
        engine
            .upsert_invariants_from_content("u1", "my name is Alice", None)
            .unwrap();
        let checks = engine.evaluate_add("u1", "my name is alice").unwrap();
        assert!(checks.invariants_ok);
        assert!(checks.conflicts.is_empty());
    }
}
