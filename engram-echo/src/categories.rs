//! Hierarchical category graph

use engram_core::{CategoryConfig, CategoryId, CategoryNode, EngramIdType, Timestamp};
use engram_llm::LlmProvider;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Seed taxonomy: (name, parent, keywords).
const SEED_CATEGORIES: &[(&str, Option<&str>, &[&str])] = &[
    ("fact", None, &["fact", "information", "detail", "data"]),
    (
        "preference",
        None,
        &["prefer", "favorite", "like", "love", "hate", "dislike"],
    ),
    ("goal", None, &["goal", "plan", "want", "aim", "target", "intend"]),
    ("habit", None, &["habit", "routine", "usually", "always", "daily"]),
    (
        "identity",
        Some("fact"),
        &["name", "email", "address", "birthday", "age", "live"],
    ),
    (
        "relationship",
        None,
        &["friend", "family", "wife", "husband", "partner", "colleague"],
    ),
    (
        "work",
        None,
        &["work", "project", "deadline", "meeting", "repo", "deploy"],
    ),
    (
        "health",
        None,
        &["doctor", "medication", "allergy", "exercise", "sleep", "diet"],
    ),
    (
        "finance",
        None,
        &["bank", "salary", "invest", "budget", "rent", "bill"],
    ),
];

/// A detected category with match confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMatch {
    pub name: String,
    pub confidence: f64,
}

/// In-memory category graph; the kernel persists snapshots through the store.
pub struct CategoryProcessor {
    config: CategoryConfig,
    llm: Option<Arc<dyn LlmProvider>>,
    nodes: RwLock<HashMap<String, CategoryNode>>,
}

impl CategoryProcessor {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, config: CategoryConfig) -> Self {
        let mut nodes = HashMap::new();
        for (name, _, keywords) in SEED_CATEGORIES {
            nodes.insert(
                name.to_string(),
                CategoryNode {
                    category_id: CategoryId::new_v4(),
                    name: name.to_string(),
                    parent: None,
                    keywords: keywords.iter().map(|k| k.to_string()).collect(),
                    strength: 1.0,
                    memory_count: 0,
                    last_accessed: None,
                    summary: None,
                },
            );
        }
        // Second pass resolves parent ids once all seeds exist.
        for (name, parent, _) in SEED_CATEGORIES {
            if let Some(parent_name) = parent {
                let parent_id = nodes.get(*parent_name).map(|n| n.category_id);
                if let (Some(node), Some(parent_id)) = (nodes.get_mut(*name), parent_id) {
                    node.parent = Some(parent_id);
                }
            }
        }
        Self {
            config,
            llm,
            nodes: RwLock::new(nodes),
        }
    }

    /// Replace the in-memory graph with a persisted snapshot.
    pub fn load(&self, snapshot: Vec<CategoryNode>) {
        if snapshot.is_empty() {
            return;
        }
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.clear();
        for node in snapshot {
            nodes.insert(node.name.clone(), node);
        }
    }

    /// Snapshot the graph for persistence.
    pub fn snapshot(&self) -> Vec<CategoryNode> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<CategoryNode> = nodes.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Detect the best-matching category for a piece of content.
    ///
    /// Keyword matching runs first; the LLM is only consulted when enabled
    /// and the keyword pass is not confident.
    pub fn detect_category(&self, content: &str, use_llm: bool) -> CategoryMatch {
        let keyword_match = self.keyword_match(content);
        if keyword_match.confidence >= 0.4 || !use_llm || !self.config.use_llm_categorization {
            return keyword_match;
        }

        match self.llm_match(content) {
            Some(llm_match) => llm_match,
            None => keyword_match,
        }
    }

    fn keyword_match(&self, content: &str) -> CategoryMatch {
        let content_lower = content.to_lowercase();
        let terms: HashSet<&str> = content_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut best = CategoryMatch {
            name: "fact".to_string(),
            confidence: 0.0,
        };
        for node in nodes.values() {
            let hits = node
                .keywords
                .iter()
                .filter(|k| terms.contains(k.as_str()) || content_lower.contains(k.as_str()))
                .count();
            if hits == 0 {
                continue;
            }
            // Two keyword hits count as a confident match.
            let confidence = (hits as f64 / 2.0).min(1.0);
            if confidence > best.confidence {
                best = CategoryMatch {
                    name: node.name.clone(),
                    confidence,
                };
            }
        }
        best
    }

    fn llm_match(&self, content: &str) -> Option<CategoryMatch> {
        let llm = self.llm.as_ref()?;
        let names: Vec<String> = {
            let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
            nodes.keys().cloned().collect()
        };
        let prompt = format!(
            "Classify this memory into exactly one category of: {}.\n\
             Memory: {}\nRespond with only the category name.",
            names.join(", "),
            content
        );
        let response = match llm.generate(&prompt) {
            Ok(response) => response.trim().to_lowercase(),
            Err(e) => {
                warn!(error = %e, "category LLM call failed");
                return None;
            }
        };
        if names.iter().any(|n| n == &response) {
            Some(CategoryMatch {
                name: response,
                confidence: 0.7,
            })
        } else {
            None
        }
    }

    /// Categories related to `name`: its parent, children, and siblings.
    pub fn find_related(&self, name: &str) -> Vec<String> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let Some(node) = nodes.get(name) else {
            return Vec::new();
        };

        let mut related = HashSet::new();
        for other in nodes.values() {
            if other.name == node.name {
                continue;
            }
            let is_parent = node.parent == Some(other.category_id);
            let is_child = other.parent == Some(node.category_id);
            let is_sibling =
                node.parent.is_some() && other.parent.is_some() && node.parent == other.parent;
            if is_parent || is_child || is_sibling {
                related.insert(other.name.clone());
            }
        }
        let mut out: Vec<String> = related.into_iter().collect();
        out.sort();
        out
    }

    /// Summary text for a category, regenerating it when asked (or when none
    /// exists yet). Without an LLM the summary is assembled from the node's
    /// keywords and counts.
    pub fn category_summary(&self, name: &str, regenerate: bool) -> Option<String> {
        {
            let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
            let node = nodes.get(name)?;
            if !regenerate {
                if let Some(summary) = &node.summary {
                    return Some(summary.clone());
                }
            }
        }

        let (keywords, memory_count) = {
            let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
            let node = nodes.get(name)?;
            (node.keywords.clone(), node.memory_count)
        };

        let generated = self
            .llm
            .as_ref()
            .and_then(|llm| {
                let prompt = format!(
                    "Write one sentence summarizing a memory category named '{}' \
                     covering: {}.",
                    name,
                    keywords.join(", ")
                );
                llm.generate(&prompt).ok()
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "{} memories about {} ({} stored)",
                    name,
                    keywords.join(", "),
                    memory_count
                )
            });

        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(node) = nodes.get_mut(name) {
            node.summary = Some(generated.clone());
        }
        Some(generated)
    }

    /// Record a retrieval access against a category.
    pub fn access_category(&self, name: &str, now: Timestamp) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(node) = nodes.get_mut(name) {
            node.last_accessed = Some(now);
            node.strength = (node.strength + 0.05).min(1.0);
        }
    }

    /// Record a memory added under (or removed from) a category.
    pub fn update_category_stats(&self, name: &str, strength: f64, is_addition: bool) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let node = nodes.entry(name.to_string()).or_insert_with(|| CategoryNode {
            category_id: CategoryId::new_v4(),
            name: name.to_string(),
            parent: None,
            keywords: Vec::new(),
            strength: 1.0,
            memory_count: 0,
            last_accessed: None,
            summary: None,
        });
        if is_addition {
            node.memory_count += 1;
            node.strength = (node.strength + strength * 0.1).min(1.0);
        } else {
            node.memory_count = (node.memory_count - 1).max(0);
        }
    }

    /// Decay unused categories and merge near-duplicate keyword sets.
    pub fn apply_decay(&self, now: Timestamp) -> usize {
        let cutoff = now - chrono::Duration::days(self.config.decay_after_days);
        let mut decayed = 0;
        {
            let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
            for node in nodes.values_mut() {
                let stale = node.last_accessed.map(|t| t < cutoff).unwrap_or(false);
                if stale && node.strength > 0.0 {
                    node.strength /= 2.0;
                    decayed += 1;
                }
            }
        }
        decayed += self.merge_similar();
        decayed
    }

    /// Merge category pairs whose keyword sets overlap beyond the threshold.
    fn merge_similar(&self) -> usize {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let names: Vec<String> = nodes.keys().cloned().collect();
        let mut merged = 0;

        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                let (Some(a), Some(b)) = (nodes.get(&names[i]), nodes.get(&names[j])) else {
                    continue;
                };
                if a.keywords.is_empty() || b.keywords.is_empty() {
                    continue;
                }
                let a_set: HashSet<&String> = a.keywords.iter().collect();
                let b_set: HashSet<&String> = b.keywords.iter().collect();
                let overlap = a_set.intersection(&b_set).count() as f64
                    / a_set.len().min(b_set.len()) as f64;
                if overlap < self.config.merge_keyword_overlap {
                    continue;
                }

                // Fold the smaller category into the larger one.
                let (keep, drop) = if a.memory_count >= b.memory_count {
                    (names[i].clone(), names[j].clone())
                } else {
                    (names[j].clone(), names[i].clone())
                };
                let dropped = match nodes.remove(&drop) {
                    Some(dropped) => dropped,
                    None => continue,
                };
                if let Some(kept) = nodes.get_mut(&keep) {
                    kept.memory_count += dropped.memory_count;
                    for keyword in dropped.keywords {
                        if !kept.keywords.contains(&keyword) {
                            kept.keywords.push(keyword);
                        }
                    }
                    merged += 1;
                    debug!(kept = %keep, dropped = %drop, "merged categories");
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn processor() -> CategoryProcessor {
        CategoryProcessor::new(None, CategoryConfig::default())
    }

    #[test]
    fn test_keyword_detection() {
        let matched = processor().detect_category("I prefer dark roast coffee", false);
        assert_eq!(matched.name, "preference");
        assert!(matched.confidence > 0.0);
    }

    #[test]
    fn test_unmatched_content_falls_back_to_fact() {
        let matched = processor().detect_category("zzz qqq", false);
        assert_eq!(matched.name, "fact");
        assert_eq!(matched.confidence, 0.0);
    }

    #[test]
    fn test_related_categories_via_parent() {
        let related = processor().find_related("identity");
        assert!(related.contains(&"fact".to_string()));
    }

    #[test]
    fn test_stats_and_access() {
        let processor = processor();
        processor.update_category_stats("work", 0.8, true);
        processor.access_category("work", Utc::now());
        let snapshot = processor.snapshot();
        let work = snapshot.iter().find(|n| n.name == "work").unwrap();
        assert_eq!(work.memory_count, 1);
        assert!(work.last_accessed.is_some());
    }

    #[test]
    fn test_decay_halves_stale_categories() {
        let processor = processor();
        let long_ago = Utc::now() - chrono::Duration::days(90);
        processor.access_category("health", long_ago);
        processor.apply_decay(Utc::now());
        let snapshot = processor.snapshot();
        let health = snapshot.iter().find(|n| n.name == "health").unwrap();
        assert!(health.strength < 1.0);
    }

    #[test]
    fn test_summary_fallback_without_llm() {
        let processor = processor();
        let summary = processor.category_summary("work", false).unwrap();
        assert!(summary.contains("work"));
        // Cached on the node afterwards.
        let snapshot = processor.snapshot();
        let work = snapshot.iter().find(|n| n.name == "work").unwrap();
        assert!(work.summary.is_some());
        assert!(processor.category_summary("nonexistent", false).is_none());
    }

    #[test]
    fn test_snapshot_load_roundtrip() {
        let processor = processor();
        processor.update_category_stats("work", 1.0, true);
        let snapshot = processor.snapshot();

        let fresh = CategoryProcessor::new(None, CategoryConfig::default());
        fresh.load(snapshot.clone());
        assert_eq!(fresh.snapshot(), snapshot);
    }

    #[test]
    fn test_merge_similar_categories() {
        let processor = processor();
        {
            let mut nodes = processor.nodes.write().unwrap();
            nodes.insert(
                "food".to_string(),
                CategoryNode {
                    category_id: CategoryId::new_v4(),
                    name: "food".to_string(),
                    parent: None,
                    keywords: vec!["pizza".to_string(), "pasta".to_string()],
                    strength: 1.0,
                    memory_count: 5,
                    last_accessed: None,
                    summary: None,
                },
            );
            nodes.insert(
                "meals".to_string(),
                CategoryNode {
                    category_id: CategoryId::new_v4(),
                    name: "meals".to_string(),
                    parent: None,
                    keywords: vec!["pizza".to_string(), "pasta".to_string()],
                    strength: 1.0,
                    memory_count: 1,
                    last_accessed: None,
                    summary: None,
                },
            );
        }
        processor.merge_similar();
        let snapshot = processor.snapshot();
        assert!(snapshot.iter().any(|n| n.name == "food"));
        assert!(!snapshot.iter().any(|n| n.name == "meals"));
        let food = snapshot.iter().find(|n| n.name == "food").unwrap();
        assert_eq!(food.memory_count, 6);
    }
}
