//! Query intent classifier for retrieval routing
//!
//! Regex-based (zero LLM cost, sub-millisecond): decides whether a query
//! targets episodic memories (conversations, events), semantic memories
//! (facts, preferences), or is ambiguous.

use engram_core::QueryIntent;
use once_cell::sync::Lazy;
use regex::Regex;

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|e| panic!("invalid intent pattern {source:?}: {e}"))
}

/// Patterns that signal episodic (event/time-based) queries.
static EPISODIC_PATTERNS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    vec![
        (pattern(r"(?i)\bwhen did\b"), 1.0),
        (pattern(r"(?i)\blast time\b"), 1.0),
        (pattern(r"(?i)\bwhat happened\b"), 1.0),
        (pattern(r"(?i)\bdo you remember\b"), 0.8),
        (pattern(r"(?i)\brecall\b"), 0.6),
        (pattern(r"(?i)\b\d+\s*(days?|weeks?|months?|hours?)\s+ago\b"), 1.0),
        (pattern(r"(?i)\byesterday\b"), 0.9),
        (pattern(r"(?i)\blast (week|month|year|session|conversation)\b"), 1.0),
        (pattern(r"(?i)\bwe (discussed|talked|mentioned|said)\b"), 0.9),
        (pattern(r"(?i)\bi (said|told|mentioned|asked)\b"), 0.8),
        (pattern(r"(?i)\bwhat did (i|we|you)\b"), 0.9),
        (pattern(r"(?i)\bhistory of\b"), 0.7),
        (pattern(r"(?i)\btimeline\b"), 0.7),
        (pattern(r"(?i)\bsequence of events\b"), 1.0),
        (pattern(r"(?i)\bfirst time\b"), 0.8),
        (pattern(r"(?i)\bhow many times\b"), 0.7),
    ]
});

/// Patterns that signal semantic (fact/knowledge-based) queries.
static SEMANTIC_PATTERNS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    vec![
        (pattern(r"(?i)\bwhat is\b"), 0.8),
        (pattern(r"(?i)\bwhat are\b"), 0.7),
        (pattern(r"(?i)\bwhat'?s my\b"), 0.9),
        (pattern(r"(?i)\bprefer\b"), 0.9),
        (pattern(r"(?i)\bfavorite\b"), 0.9),
        (pattern(r"(?i)\btell me about\b"), 0.7),
        (pattern(r"(?i)\bwho is\b"), 0.7),
        (pattern(r"(?i)\bexplain\b"), 0.6),
        (pattern(r"(?i)\bdescribe\b"), 0.6),
        (pattern(r"(?i)\bhow (do|does|to)\b"), 0.7),
        (pattern(r"(?i)\bprocess for\b"), 0.8),
        (pattern(r"(?i)\bsteps to\b"), 0.7),
        (pattern(r"(?i)\bprocedure\b"), 0.7),
        (pattern(r"(?i)\bworkflow\b"), 0.7),
        (pattern(r"(?i)\bdefault\b"), 0.5),
        (pattern(r"(?i)\busually\b"), 0.6),
        (pattern(r"(?i)\balways\b"), 0.5),
        (pattern(r"(?i)\bnever\b"), 0.5),
    ]
});

/// Classify a search query as episodic, semantic, or mixed.
///
/// Requires clear dominance (>1.5×) to declare a specific intent.
pub fn classify_intent(query: &str) -> QueryIntent {
    if query.trim().is_empty() {
        return QueryIntent::Mixed;
    }

    let episodic_score: f64 = EPISODIC_PATTERNS
        .iter()
        .filter(|(pattern, _)| pattern.is_match(query))
        .map(|(_, weight)| weight)
        .sum();
    let semantic_score: f64 = SEMANTIC_PATTERNS
        .iter()
        .filter(|(pattern, _)| pattern.is_match(query))
        .map(|(_, weight)| weight)
        .sum();

    if episodic_score == 0.0 && semantic_score == 0.0 {
        return QueryIntent::Mixed;
    }
    if episodic_score > semantic_score * 1.5 {
        return QueryIntent::Episodic;
    }
    if semantic_score > episodic_score * 1.5 {
        return QueryIntent::Semantic;
    }
    QueryIntent::Mixed
}
