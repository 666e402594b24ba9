//! Engram Episodic - CAST-style scene grouping
//!
//! Every ingested memory becomes a view (one perception). Views cluster into
//! scenes when at least two of three proximity conditions hold: close in
//! time, same place, similar topic. Scenes carry a rolling mean embedding of
//! their members and the union of observed characters.

use chrono::Utc;
use engram_core::{
    Character, CharacterRole, ConfidentialityScope, EmbeddingVector, EngramIdType, EngramResult,
    EpisodicConfig, MemoryId, MemoryTier, Scene, SceneId, Timestamp, View, ViewId, ViewSignals,
};
use engram_echo::extract_entities;
use engram_llm::{EmbedAction, Embedder};
use engram_storage::{MemoryPatch, SceneFilters, ScenePatch, Store};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Inputs for ingesting one memory as a view.
#[derive(Debug, Clone)]
pub struct ViewIngest<'a> {
    pub user_id: &'a str,
    pub agent_id: Option<&'a str>,
    pub memory_id: MemoryId,
    pub content: &'a str,
    pub metadata: &'a serde_json::Map<String, serde_json::Value>,
    pub namespace: &'a str,
    pub timestamp: Timestamp,
    pub importance: f64,
    pub scope: ConfidentialityScope,
}

/// Outcome of one ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub view_id: ViewId,
    pub scene_id: SceneId,
    /// True when the view joined an existing scene.
    pub attached: bool,
}

/// A scored scene search hit.
#[derive(Debug, Clone)]
pub struct SceneHit {
    pub scene: Scene,
    pub score: f64,
}

/// CAST-inspired episodic storage and retrieval.
pub struct EpisodicStore {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    config: EpisodicConfig,
}

impl EpisodicStore {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>, config: EpisodicConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Ingest a memory as a view, attaching it to a matching scene or
    /// creating a fresh one.
    pub fn ingest_memory_as_view(&self, ingest: &ViewIngest<'_>) -> EngramResult<IngestOutcome> {
        let (place_type, place_value) = extract_place(ingest.metadata);
        let topic_label = extract_topic(ingest.content);
        let topic_embedding = if topic_label.is_empty() {
            None
        } else {
            Some(self.embedder.embed(&topic_label, EmbedAction::Search)?)
        };
        let characters = extract_characters(ingest.content, ingest.metadata, ingest.agent_id);

        let target = self.find_scene_for_view(
            ingest.user_id,
            ingest.namespace,
            ingest.timestamp,
            place_value.as_deref(),
            topic_embedding.as_ref(),
        )?;

        let (scene_id, attached) = match target {
            Some(scene) => {
                self.attach_to_scene(
                    &scene,
                    ingest.memory_id,
                    ingest.timestamp,
                    place_value.as_deref(),
                    &topic_label,
                    topic_embedding.as_ref(),
                    &characters,
                )?;
                (scene.scene_id, true)
            }
            None => {
                let scene_id = self.create_scene(ingest, &topic_label, place_value.as_deref(),
                    topic_embedding.clone(), &characters)?;
                (scene_id, false)
            }
        };

        let view = View {
            view_id: ViewId::new_v4(),
            user_id: ingest.user_id.to_string(),
            agent_id: ingest.agent_id.map(str::to_string),
            timestamp: ingest.timestamp,
            place_type,
            place_value,
            topic_label,
            topic_ref: Some(ingest.memory_id),
            characters,
            raw_text: ingest.content.to_string(),
            signals: ViewSignals {
                importance: ingest.importance,
                sentiment: "neutral".to_string(),
            },
            scene_id,
        };
        let view_id = self.store.add_view(&view)?;
        debug!(%view_id, %scene_id, attached, "ingested view");

        Ok(IngestOutcome {
            view_id,
            scene_id,
            attached,
        })
    }

    /// Search scenes by topic similarity, keyword hits, place, and entities.
    pub fn search_scenes(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
        entities: Option<&[String]>,
        place_hint: Option<&str>,
    ) -> EngramResult<Vec<SceneHit>> {
        let pool = self.store.get_scenes(&SceneFilters {
            user_id: Some(user_id.to_string()),
            limit: Some((limit * 5).max(20)),
            ..SceneFilters::default()
        })?;
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query, EmbedAction::Search)?;
        let query_lower = query.to_lowercase();
        let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
        let entities_lower: BTreeSet<String> = entities
            .unwrap_or_default()
            .iter()
            .map(|e| e.to_lowercase())
            .collect();

        let mut scored: Vec<SceneHit> = Vec::new();
        for scene in pool {
            let mut score = scene
                .embedding
                .as_ref()
                .map(|embedding| query_embedding.cosine_similarity(embedding) as f64)
                .unwrap_or(0.0);

            let text = format!("{} {} {}", scene.summary, scene.topic, scene.title).to_lowercase();
            let keyword_hits = query_terms.iter().filter(|t| text.contains(**t)).count();
            score += keyword_hits as f64 * 0.05;

            if let Some(place_hint) = place_hint {
                match &scene.location {
                    Some(location)
                        if location.to_lowercase().contains(&place_hint.to_lowercase()) =>
                    {
                        score += 0.1;
                    }
                    Some(_) => continue,
                    None => {}
                }
            }

            if !entities_lower.is_empty() {
                let participants: BTreeSet<String> = scene
                    .participants
                    .iter()
                    .map(|p| p.to_lowercase())
                    .collect();
                if participants.is_disjoint(&entities_lower) {
                    continue;
                }
            }

            scored.push(SceneHit { scene, score });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Best candidate scene satisfying ≥2 of (time window, same place, topic
    /// similarity).
    fn find_scene_for_view(
        &self,
        user_id: &str,
        namespace: &str,
        view_time: Timestamp,
        place_value: Option<&str>,
        topic_embedding: Option<&EmbeddingVector>,
    ) -> EngramResult<Option<Scene>> {
        let candidates = self.store.get_scenes(&SceneFilters {
            user_id: Some(user_id.to_string()),
            namespace: Some(namespace.to_string()),
            limit: Some(self.config.candidate_limit),
            ..SceneFilters::default()
        })?;

        let window = chrono::Duration::minutes(self.config.time_window_minutes);
        let mut best: Option<(f64, Scene)> = None;

        for scene in candidates {
            let mut conditions = 0;
            let mut score = 0.0;

            let scene_time = scene.end_time.max(scene.start_time);
            if (view_time - scene_time).abs() <= window {
                conditions += 1;
                score += 0.4;
            }

            if let (Some(place), Some(scene_place)) = (place_value, scene.location.as_deref()) {
                if place.eq_ignore_ascii_case(scene_place) {
                    conditions += 1;
                    score += 0.3;
                }
            }

            if let (Some(topic), Some(scene_embedding)) = (topic_embedding, scene.embedding.as_ref())
            {
                let similarity = topic.cosine_similarity(scene_embedding) as f64;
                if similarity >= self.config.topic_threshold {
                    conditions += 1;
                    score += (similarity * 0.3).min(0.3);
                }
            }

            if conditions >= 2 && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, scene));
            }
        }

        Ok(best.map(|(_, scene)| scene))
    }

    #[allow(clippy::too_many_arguments)]
    fn attach_to_scene(
        &self,
        scene: &Scene,
        memory_id: MemoryId,
        view_time: Timestamp,
        place_value: Option<&str>,
        topic_label: &str,
        topic_embedding: Option<&EmbeddingVector>,
        characters: &[Character],
    ) -> EngramResult<()> {
        if !scene.memory_ids.contains(&memory_id) {
            self.store
                .add_scene_memory(scene.scene_id, memory_id, scene.memory_ids.len())?;
        }

        let mut participants: BTreeSet<String> = scene.participants.iter().cloned().collect();
        participants.extend(characters.iter().map(|c| c.entity_id.clone()));

        let member_count = scene.memory_ids.len().max(1);
        let embedding = match (scene.embedding.as_ref(), topic_embedding) {
            (Some(old), Some(new)) => Some(old.rolling_mean(new, member_count)),
            (None, Some(new)) => Some(new.clone()),
            (old, None) => old.cloned(),
        };

        let patch = ScenePatch {
            participants: Some(participants.into_iter().collect()),
            end_time: Some(view_time.max(scene.end_time)),
            location: place_value
                .map(str::to_string)
                .or_else(|| scene.location.clone()),
            summary: scene
                .summary
                .is_empty()
                .then(|| topic_label.to_string()),
            topic: scene.topic.is_empty().then(|| topic_label.to_string()),
            embedding,
            ..ScenePatch::default()
        };
        self.store.update_scene(scene.scene_id, &patch)?;
        self.store.update_memory(
            memory_id,
            &MemoryPatch {
                scene_id: Some(Some(scene.scene_id)),
                ..MemoryPatch::default()
            },
        )?;
        Ok(())
    }

    fn create_scene(
        &self,
        ingest: &ViewIngest<'_>,
        topic_label: &str,
        place_value: Option<&str>,
        topic_embedding: Option<EmbeddingVector>,
        characters: &[Character],
    ) -> EngramResult<SceneId> {
        let now = Utc::now();
        let scene = Scene {
            scene_id: SceneId::new_v4(),
            user_id: ingest.user_id.to_string(),
            title: topic_label.to_string(),
            topic: topic_label.to_string(),
            summary: topic_label.to_string(),
            location: place_value.map(str::to_string),
            participants: characters.iter().map(|c| c.entity_id.clone()).collect(),
            memory_ids: Vec::new(),
            start_time: ingest.timestamp,
            end_time: ingest.timestamp,
            embedding: topic_embedding,
            scene_strength: 1.0,
            tier: MemoryTier::Sml,
            namespace: ingest.namespace.to_string(),
            confidentiality_scope: ingest.scope,
            created_at: now,
            updated_at: now,
        };
        let scene_id = self.store.add_scene(&scene)?;
        self.store.add_scene_memory(scene_id, ingest.memory_id, 0)?;
        self.store.update_memory(
            ingest.memory_id,
            &MemoryPatch {
                scene_id: Some(Some(scene_id)),
                ..MemoryPatch::default()
            },
        )?;
        Ok(scene_id)
    }
}

/// Place extraction: metadata place/location first, then repo/workspace, all
/// typed "digital".
fn extract_place(metadata: &serde_json::Map<String, serde_json::Value>) -> (String, Option<String>) {
    if let Some(place) = metadata.get("place").or_else(|| metadata.get("location")) {
        match place {
            serde_json::Value::Object(object) => {
                let place_type = object
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("digital")
                    .to_string();
                let value = object
                    .get("value")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                return (place_type, value);
            }
            serde_json::Value::String(s) => return ("digital".to_string(), Some(s.clone())),
            _ => {}
        }
    }
    if let Some(repo) = metadata
        .get("repo")
        .or_else(|| metadata.get("workspace"))
        .and_then(|v| v.as_str())
    {
        return ("digital".to_string(), Some(repo.to_string()));
    }
    ("digital".to_string(), None)
}

/// Topic label: the first ten terms of the content.
fn extract_topic(content: &str) -> String {
    let terms: Vec<&str> = content.split_whitespace().take(10).collect();
    if terms.is_empty() {
        "untitled".to_string()
    } else {
        terms.join(" ")
    }
}

/// Characters: the acting agent as MC, proper nouns as SC.
fn extract_characters(
    content: &str,
    metadata: &serde_json::Map<String, serde_json::Value>,
    agent_id: Option<&str>,
) -> Vec<Character> {
    let primary = metadata
        .get("actor_id")
        .or_else(|| metadata.get("speaker"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| agent_id.map(str::to_string))
        .unwrap_or_else(|| "char_self".to_string());

    let mut characters = vec![Character {
        entity_id: primary.clone(),
        role: CharacterRole::Main,
    }];
    for entity in extract_entities(content) {
        if entity.kind != "person" || entity.name == primary {
            continue;
        }
        let character = Character {
            entity_id: entity.name,
            role: CharacterRole::Supporting,
        };
        if !characters.contains(&character) {
            characters.push(character);
        }
    }
    characters
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_llm::HashingEmbedder;

    fn episodic() -> (Arc<Store>, EpisodicStore) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let episodic = EpisodicStore::new(
            Arc::clone(&store),
            Arc::new(HashingEmbedder::new(128)),
            EpisodicConfig::default(),
        );
        (store, episodic)
    }

    fn repo_metadata() -> serde_json::Map<String, serde_json::Value> {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "repo".to_string(),
            serde_json::Value::String("repo:/x".to_string()),
        );
        metadata
    }

    fn ingest_input<'a>(
        memory_id: MemoryId,
        content: &'a str,
        metadata: &'a serde_json::Map<String, serde_json::Value>,
        timestamp: Timestamp,
    ) -> ViewIngest<'a> {
        ViewIngest {
            user_id: "u1",
            agent_id: Some("a1"),
            memory_id,
            content,
            metadata,
            namespace: "default",
            timestamp,
            importance: 0.5,
            scope: ConfidentialityScope::Work,
        }
    }

    #[test]
    fn test_close_views_share_a_scene() {
        let (store, episodic) = episodic();
        let metadata = repo_metadata();
        let t0 = Utc::now();

        let m1 = MemoryId::new_v4();
        let first = episodic
            .ingest_memory_as_view(&ingest_input(
                m1,
                "debugging the flaky migration test",
                &metadata,
                t0,
            ))
            .unwrap();
        assert!(!first.attached);

        let m2 = MemoryId::new_v4();
        let later = t0 + chrono::Duration::minutes(10);
        let second = episodic
            .ingest_memory_as_view(&ingest_input(
                m2,
                "migration test debugging continues flaky",
                &metadata,
                later,
            ))
            .unwrap();
        // Same place + within window (+ similar topic): joins the scene.
        assert!(second.attached);
        assert_eq!(second.scene_id, first.scene_id);

        let scene = store.get_scene(first.scene_id).unwrap().unwrap();
        assert_eq!(scene.memory_ids, vec![m1, m2]);
        assert_eq!(scene.end_time, later);
        assert!(scene.participants.contains(&"a1".to_string()));
    }

    #[test]
    fn test_distant_views_get_new_scenes() {
        let (_, episodic) = episodic();
        let metadata = serde_json::Map::new();
        let t0 = Utc::now();

        let first = episodic
            .ingest_memory_as_view(&ingest_input(
                MemoryId::new_v4(),
                "kernel planning discussion",
                &metadata,
                t0,
            ))
            .unwrap();
        let second = episodic
            .ingest_memory_as_view(&ingest_input(
                MemoryId::new_v4(),
                "weekend pasta recipe ideas",
                &metadata,
                t0 + chrono::Duration::hours(5),
            ))
            .unwrap();
        assert_ne!(first.scene_id, second.scene_id);
    }

    #[test]
    fn test_memory_scene_link_is_written() {
        let (store, episodic) = episodic();
        let metadata = serde_json::Map::new();
        let memory = engram_core::MemoryRecord::new("u1", "standup notes", Utc::now());
        let memory_id = store.add_memory(&memory).unwrap();

        let outcome = episodic
            .ingest_memory_as_view(&ingest_input(
                memory_id,
                "standup notes",
                &metadata,
                Utc::now(),
            ))
            .unwrap();

        let loaded = store.get_memory(memory_id).unwrap().unwrap();
        assert_eq!(loaded.scene_id, Some(outcome.scene_id));
    }

    #[test]
    fn test_supporting_characters_from_proper_nouns() {
        let metadata = serde_json::Map::new();
        let characters = extract_characters("Paired with Dana on the parser", &metadata, Some("a1"));
        assert_eq!(characters[0].role, CharacterRole::Main);
        assert!(characters
            .iter()
            .any(|c| c.entity_id == "Dana" && c.role == CharacterRole::Supporting));
    }

    #[test]
    fn test_scene_search_by_topic_and_entities() {
        let (_, episodic) = episodic();
        let metadata = repo_metadata();
        let t0 = Utc::now();

        episodic
            .ingest_memory_as_view(&ingest_input(
                MemoryId::new_v4(),
                "Reviewed the retry queue with Dana",
                &metadata,
                t0,
            ))
            .unwrap();

        let hits = episodic
            .search_scenes("u1", "retry queue review", 5, None, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);

        // Entity filter excludes scenes with disjoint participants.
        let hits = episodic
            .search_scenes(
                "u1",
                "retry queue review",
                5,
                Some(&["Quentin".to_string()]),
                None,
            )
            .unwrap();
        assert!(hits.is_empty());

        let hits = episodic
            .search_scenes(
                "u1",
                "retry queue review",
                5,
                Some(&["Dana".to_string()]),
                None,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_place_extraction_variants() {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "place".to_string(),
            serde_json::json!({"type": "physical", "value": "office"}),
        );
        assert_eq!(
            extract_place(&metadata),
            ("physical".to_string(), Some("office".to_string()))
        );

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "location".to_string(),
            serde_json::Value::String("cafe".to_string()),
        );
        assert_eq!(
            extract_place(&metadata),
            ("digital".to_string(), Some("cafe".to_string()))
        );

        assert_eq!(extract_place(&serde_json::Map::new()).1, None);
    }
}
