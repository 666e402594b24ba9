//! Retrieval scoring functions

use engram_core::EchoMetadata;
use std::collections::{HashMap, HashSet};

/// Composite score from similarity and strength.
pub fn composite_score(similarity: f64, strength: f64) -> f64 {
    similarity * strength
}

/// Simple tokenization for keyword scoring: lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// BM25 score of a document against query terms.
///
/// `k1` saturates term frequency, `b` normalizes by document length; IDF is
/// log-smoothed so terms present in every document still score ≥ 0.
pub fn bm25_score(
    query_terms: &HashSet<String>,
    doc_terms: &[String],
    doc_freq: &HashMap<String, usize>,
    total_docs: usize,
    avg_doc_len: f64,
    k1: f64,
    b: f64,
) -> f64 {
    if doc_terms.is_empty() || query_terms.is_empty() {
        return 0.0;
    }

    let doc_len = doc_terms.len() as f64;
    let avg_doc_len = if avg_doc_len == 0.0 { doc_len.max(1.0) } else { avg_doc_len };

    let mut term_freq: HashMap<&str, usize> = HashMap::new();
    for term in doc_terms {
        *term_freq.entry(term.as_str()).or_insert(0) += 1;
    }

    let mut score = 0.0;
    for term in query_terms {
        let Some(&tf) = term_freq.get(term.as_str()) else {
            continue;
        };
        let df = doc_freq.get(term).copied().unwrap_or(1) as f64;
        let idf = ((total_docs as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
        let tf = tf as f64;
        let tf_component = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * doc_len / avg_doc_len));
        score += idf * tf_component;
    }
    score
}

/// Keyword match score: fraction of query terms found in the memory's
/// content, echo keywords, or paraphrases. Simpler than BM25 and usable
/// without corpus statistics.
pub fn keyword_score(query_terms: &HashSet<String>, content: &str, echo: Option<&EchoMetadata>) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }

    let mut content_terms: HashSet<String> = tokenize(content).into_iter().collect();
    if let Some(echo) = echo {
        content_terms.extend(echo.keywords.iter().map(|k| k.to_lowercase()));
        for paraphrase in &echo.paraphrases {
            content_terms.extend(tokenize(paraphrase));
        }
    }
    if content_terms.is_empty() {
        return 0.0;
    }

    let matches = query_terms.intersection(&content_terms).count();
    matches as f64 / query_terms.len() as f64
}

/// Weighted blend of semantic and keyword scores.
pub fn hybrid_score(semantic: f64, keyword: f64, alpha: f64) -> f64 {
    alpha * semantic + (1.0 - alpha) * keyword
}

/// Re-ranking boost from echo metadata matches, capped.
///
/// Each matching echo keyword adds 0.05; question-form term overlap adds up
/// to 0.15; each matching implication adds 0.03.
pub fn echo_boost(
    query_lower: &str,
    query_terms: &HashSet<String>,
    echo: &EchoMetadata,
    cap: f64,
) -> f64 {
    let mut boost = 0.0;

    let keyword_matches = echo
        .keywords
        .iter()
        .filter(|k| query_lower.contains(&k.to_lowercase()))
        .count();
    boost += keyword_matches as f64 * 0.05;

    if let Some(question_form) = &echo.question_form {
        let question_terms: HashSet<String> = tokenize(question_form).into_iter().collect();
        let overlap = query_terms.intersection(&question_terms).count();
        if overlap > 0 {
            boost += (overlap as f64 * 0.05).min(0.15);
        }
    }

    for implication in &echo.implications {
        let implication_terms: HashSet<String> = tokenize(implication).into_iter().collect();
        if query_terms.intersection(&implication_terms).next().is_some() {
            boost += 0.03;
        }
    }

    boost.min(cap)
}
