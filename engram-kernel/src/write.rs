//! The apply path: direct writes, vector fan-out, and rollback

use crate::{AppliedWrite, DirectWriteResult, MemoryKernel, WriteEvent};
use chrono::Utc;
use engram_core::{
    ConfidentialityScope, ConflictClass, EngramIdType, EngramResult, MemoryEventKind, MemoryId,
    MemoryRecord, MemoryTier, Provenance, SharingScope, StagingError,
};
use engram_echo::{extract_entities, EchoResult};
use engram_episodic::ViewIngest;
use engram_llm::EmbedAction;
use engram_staging::resolve_write_conflict;
use engram_storage::MemoryPatch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Inputs for one direct write application.
pub(crate) struct DirectWrite<'a> {
    pub user_id: &'a str,
    pub agent_id: Option<&'a str>,
    pub content: &'a str,
    pub categories: &'a [String],
    pub metadata: &'a serde_json::Map<String, serde_json::Value>,
    pub scope: ConfidentialityScope,
    pub namespace: &'a str,
    pub provenance: &'a Provenance,
    pub source_app: Option<&'a str>,
}

impl MemoryKernel {
    /// Apply one write end-to-end: idempotency, echo, conflict resolution,
    /// store insert, vector fan-out, categories, graph, episodic view, and
    /// invariant upsert.
    pub(crate) fn apply_direct_write(
        &self,
        write: &DirectWrite<'_>,
    ) -> EngramResult<DirectWriteResult> {
        // Idempotency: identical content under the same key is a no-op;
        // different content is a hard conflict.
        let source_app = write.provenance.source_app.as_deref().or(write.source_app);
        if let Some(source_event_id) = write.provenance.source_event_id.as_deref() {
            if let Some(existing) = self.store.get_memory_by_source_event(
                write.user_id,
                source_event_id,
                write.namespace,
                source_app,
            )? {
                if existing.content.trim() != write.content.trim() {
                    return Err(StagingError::IdempotencyConflict {
                        source_event_id: source_event_id.to_string(),
                    }
                    .into());
                }
                return Ok(DirectWriteResult {
                    results: vec![AppliedWrite {
                        id: existing.memory_id,
                        event: WriteEvent::Existing,
                        tier: existing.tier,
                        strength: existing.strength,
                        vector_nodes: 0,
                    }],
                    created_ids: Vec::new(),
                    idempotent: true,
                });
            }
        }

        let mut content = write.content.trim().to_string();
        let mut categories = write.categories.to_vec();
        if categories.is_empty() && self.config.categories.auto_categorize {
            let matched = self
                .categories
                .detect_category(&content, self.config.categories.use_llm_categorization);
            if matched.confidence > 0.0 {
                categories.push(matched.name);
            }
        }

        let mut echo_result = self.run_echo(&content);
        if categories.is_empty() {
            if let Some(category) = echo_result.as_ref().and_then(|e| e.category.clone()) {
                categories.push(category);
            }
        }
        let mut embedding = self.embed_primary(&content, echo_result.as_ref())?;

        // Conflict resolution against the nearest memory in scope.
        let mut event = WriteEvent::Add;
        if let Some((nearest, similarity)) = self.nearest_memory(write.user_id, &embedding)? {
            if similarity >= self.config.staging.conflict_similarity_threshold
                && self.config.decay.enable_forgetting
            {
                let resolution =
                    resolve_write_conflict(&nearest, &content, self.llm.as_deref());
                match resolution.classification {
                    ConflictClass::Contradictory => {
                        self.demote_existing(&nearest, "CONTRADICTORY")?;
                        event = WriteEvent::Update;
                    }
                    ConflictClass::Subsumes => {
                        if let Some(merged) = resolution.merged_content {
                            if merged.trim() != content {
                                content = merged.trim().to_string();
                                echo_result = self.run_echo(&content);
                                embedding = self.embed_primary(&content, echo_result.as_ref())?;
                            }
                        }
                        self.demote_existing(&nearest, "SUBSUMES")?;
                        event = WriteEvent::Update;
                    }
                    ConflictClass::Subsumed => {
                        let boosted = (nearest.strength + 0.05).min(1.0);
                        self.store.update_memory(
                            nearest.memory_id,
                            &MemoryPatch {
                                strength: Some(boosted),
                                ..MemoryPatch::default()
                            },
                        )?;
                        self.store.increment_access(nearest.memory_id)?;
                        return Ok(DirectWriteResult {
                            results: vec![AppliedWrite {
                                id: nearest.memory_id,
                                event: WriteEvent::Noop,
                                tier: nearest.tier,
                                strength: boosted,
                                vector_nodes: 0,
                            }],
                            created_ids: Vec::new(),
                            idempotent: false,
                        });
                    }
                    ConflictClass::Compatible => {}
                }
            }
        }

        let strength = echo_result
            .as_ref()
            .map(|e| e.strength_multiplier)
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        let now = Utc::now();
        let mut memory = MemoryRecord::new(write.user_id, content.clone(), now)
            .with_scope(write.scope)
            .with_namespace(write.namespace)
            .with_strength(strength);
        memory.agent_id = write.agent_id.map(str::to_string);
        memory.categories = categories.clone();
        memory.metadata = write.metadata.clone();
        memory.echo = echo_result.as_ref().map(EchoResult::to_metadata);
        memory.sharing_scope = infer_sharing_scope(write.metadata, write.agent_id);
        memory.source_type = Some(write.provenance.source_type.clone());
        memory.source_app = source_app.map(str::to_string);
        memory.source_event_id = write.provenance.source_event_id.clone();
        if self.config.traces.enable_multi_trace {
            memory.traces = Some(engram_decay::initialize_traces(
                strength,
                true,
                &self.config.traces,
            ));
        }

        let memory_id = self.store.add_memory(&memory)?;
        self.store.record_event(
            memory_id,
            MemoryEventKind::Add,
            None,
            Some(strength),
            None,
            Some(MemoryTier::Sml),
        )?;

        let (vectors, payloads, ids) =
            self.build_vectors_for(&memory, &embedding, echo_result.as_ref())?;
        let vector_nodes = vectors.len();
        self.vector.insert(&vectors, &payloads, &ids)?;

        for category in &categories {
            self.categories
                .update_category_stats(category, strength, true);
        }

        for entity in extract_entities(&content) {
            let entity_id = self
                .store
                .ensure_entity(write.user_id, &entity.name, entity.kind)?;
            self.store
                .add_entity_link(entity_id, memory_id, "mentioned_in", 1.0)?;
        }

        self.episodic.ingest_memory_as_view(&ViewIngest {
            user_id: write.user_id,
            agent_id: write.agent_id,
            memory_id,
            content: &content,
            metadata: write.metadata,
            namespace: write.namespace,
            timestamp: now,
            importance: echo_result.as_ref().map(|e| e.importance).unwrap_or(0.5),
            scope: write.scope,
        })?;

        self.invariants
            .upsert_invariants_from_content(write.user_id, &content, Some(memory_id))?;

        debug!(%memory_id, event = ?event, vector_nodes, "applied write");
        Ok(DirectWriteResult {
            results: vec![AppliedWrite {
                id: memory_id,
                event,
                tier: MemoryTier::Sml,
                strength,
                vector_nodes,
            }],
            created_ids: vec![memory_id],
            idempotent: false,
        })
    }

    /// Remove a memory and its vector nodes. Tombstone policy comes from
    /// config; rollback paths force a hard delete.
    pub(crate) fn delete_memory_internal(
        &self,
        memory_id: MemoryId,
        hard: bool,
    ) -> EngramResult<bool> {
        self.delete_vectors_for_memory(memory_id)?;
        let use_tombstone = !hard && self.config.storage.use_tombstone_deletion;
        let deleted = self.store.delete_memory(memory_id, use_tombstone)?;
        if deleted {
            self.store.record_event(
                memory_id,
                MemoryEventKind::Delete,
                None,
                Some(0.0),
                None,
                None,
            )?;
        }
        Ok(deleted)
    }

    pub(crate) fn delete_vectors_for_memory(&self, memory_id: MemoryId) -> EngramResult<()> {
        let filter = memory_filter(memory_id);
        let nodes = self.vector.list(Some(&filter), Some(64))?;
        if nodes.is_empty() {
            self.vector.delete(memory_id.as_uuid())?;
            return Ok(());
        }
        for node in nodes {
            self.vector.delete(node.id)?;
        }
        Ok(())
    }

    /// Push updated echo fields onto every vector node of a memory.
    pub(crate) fn update_vector_payloads(
        &self,
        memory_id: MemoryId,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> EngramResult<()> {
        let filter = memory_filter(memory_id);
        for node in self.vector.list(Some(&filter), Some(64))? {
            let mut payload = node.payload.clone();
            for (key, value) in updates {
                payload.insert(key.clone(), value.clone());
            }
            self.vector.update(node.id, None, Some(&payload))?;
        }
        Ok(())
    }

    fn run_echo(&self, content: &str) -> Option<EchoResult> {
        if !self.config.echo.enable_echo {
            return None;
        }
        Some(self.echo.process(content, None, None))
    }

    /// Embed the primary text: the question-form when configured and
    /// available, the raw content otherwise.
    fn embed_primary(
        &self,
        content: &str,
        echo_result: Option<&EchoResult>,
    ) -> EngramResult<Vec<f32>> {
        let primary = self.primary_text(content, echo_result);
        Ok(self.embedder.embed(primary, EmbedAction::Add)?.data)
    }

    fn primary_text<'a>(&self, content: &'a str, echo_result: Option<&'a EchoResult>) -> &'a str {
        if self.config.echo.use_question_embedding {
            if let Some(question) = echo_result.and_then(|e| e.question_form.as_deref()) {
                return question;
            }
        }
        content
    }

    fn nearest_memory(
        &self,
        user_id: &str,
        embedding: &[f32],
    ) -> EngramResult<Option<(MemoryRecord, f64)>> {
        let mut filter = serde_json::Map::new();
        filter.insert(
            "user_id".to_string(),
            serde_json::Value::String(user_id.to_string()),
        );
        let hits = self.vector.search(embedding, 1, Some(&filter))?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };
        let memory_id = resolve_memory_id(&hit);
        let Some(memory) = self.store.get_memory(memory_id)? else {
            return Ok(None);
        };
        if memory.tombstoned {
            return Ok(None);
        }
        Ok(Some((memory, hit.score as f64)))
    }

    /// Superseded memories drop to near-zero strength and back to SML.
    fn demote_existing(&self, memory: &MemoryRecord, reason: &str) -> EngramResult<()> {
        let new_strength = memory.strength.min(0.05);
        let mut metadata = memory.metadata.clone();
        metadata.insert("superseded".to_string(), serde_json::Value::Bool(true));
        metadata.insert(
            "superseded_reason".to_string(),
            serde_json::Value::String(reason.to_string()),
        );

        self.store.update_memory(
            memory.memory_id,
            &MemoryPatch {
                strength: Some(new_strength),
                tier: Some(MemoryTier::Sml),
                metadata: Some(metadata.clone()),
                ..MemoryPatch::default()
            },
        )?;
        self.update_vector_payloads(memory.memory_id, &metadata)?;
        self.store.record_event(
            memory.memory_id,
            MemoryEventKind::Demote,
            Some(memory.strength),
            Some(new_strength),
            Some(memory.tier),
            Some(MemoryTier::Sml),
        )?;
        warn!(memory_id = %memory.memory_id, reason, "demoted superseded memory");
        Ok(())
    }

    /// Vector fan-out: primary node (memory id), content node when the
    /// primary is the question-form, then paraphrase and question nodes.
    pub(crate) fn build_vectors_for(
        &self,
        memory: &MemoryRecord,
        embedding: &[f32],
        echo_result: Option<&EchoResult>,
    ) -> EngramResult<(
        Vec<Vec<f32>>,
        Vec<serde_json::Map<String, serde_json::Value>>,
        Vec<Uuid>,
    )> {
        let mut base = serde_json::Map::new();
        base.insert(
            "memory_id".to_string(),
            serde_json::Value::String(memory.memory_id.to_string()),
        );
        base.insert(
            "user_id".to_string(),
            serde_json::Value::String(memory.user_id.clone()),
        );
        if let Some(agent_id) = &memory.agent_id {
            base.insert(
                "agent_id".to_string(),
                serde_json::Value::String(agent_id.clone()),
            );
        }
        base.insert(
            "namespace".to_string(),
            serde_json::Value::String(memory.namespace.clone()),
        );
        base.insert(
            "categories".to_string(),
            serde_json::Value::Array(
                memory
                    .categories
                    .iter()
                    .map(|c| serde_json::Value::String(c.clone()))
                    .collect(),
            ),
        );

        let mut vectors: Vec<Vec<f32>> = Vec::new();
        let mut payloads: Vec<serde_json::Map<String, serde_json::Value>> = Vec::new();
        let mut ids: Vec<Uuid> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        let mut add_node = |text: &str,
                            node_type: &str,
                            subtype: Option<&str>,
                            vector: Vec<f32>,
                            node_id: Uuid|
         -> bool {
            let cleaned = text.trim();
            if cleaned.is_empty() || !seen.insert(cleaned.to_lowercase()) {
                return false;
            }
            let mut payload = base.clone();
            payload.insert(
                "text".to_string(),
                serde_json::Value::String(cleaned.to_string()),
            );
            payload.insert(
                "type".to_string(),
                serde_json::Value::String(node_type.to_string()),
            );
            if let Some(subtype) = subtype {
                payload.insert(
                    "subtype".to_string(),
                    serde_json::Value::String(subtype.to_string()),
                );
            }
            if node_type == "primary" {
                payload.insert(
                    "memory".to_string(),
                    serde_json::Value::String(memory.content.clone()),
                );
            }
            vectors.push(vector);
            payloads.push(payload);
            ids.push(node_id);
            true
        };

        let primary_text = self.primary_text(&memory.content, echo_result);
        let primary_subtype = (primary_text != memory.content).then_some("question_form");
        add_node(
            primary_text,
            "primary",
            primary_subtype,
            embedding.to_vec(),
            memory.memory_id.as_uuid(),
        );

        if primary_text != memory.content {
            let vector = self
                .embedder
                .embed(&memory.content, EmbedAction::Add)?
                .data;
            add_node(
                &memory.content,
                "echo_node",
                Some("content"),
                vector,
                Uuid::new_v4(),
            );
        }

        if let Some(echo_result) = echo_result {
            for paraphrase in &echo_result.paraphrases {
                let vector = self.embedder.embed(paraphrase, EmbedAction::Add)?.data;
                add_node(
                    paraphrase,
                    "echo_node",
                    Some("paraphrase"),
                    vector,
                    Uuid::new_v4(),
                );
            }
            for question in &echo_result.questions {
                let vector = self.embedder.embed(question, EmbedAction::Add)?.data;
                add_node(
                    question,
                    "echo_node",
                    Some("question"),
                    vector,
                    Uuid::new_v4(),
                );
            }
        }

        Ok((vectors, payloads, ids))
    }
}

/// Resolve the owning memory id of a vector hit.
///
/// The winning node may be a paraphrase or question node; only `memory_id`
/// in its payload is trusted, the node id itself only for primary nodes.
pub(crate) fn resolve_memory_id(hit: &engram_vector::VectorHit) -> MemoryId {
    hit.payload
        .get("memory_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| MemoryId::new(hit.id))
}

pub(crate) fn memory_filter(memory_id: MemoryId) -> serde_json::Map<String, serde_json::Value> {
    let mut filter = serde_json::Map::new();
    filter.insert(
        "memory_id".to_string(),
        serde_json::Value::String(memory_id.to_string()),
    );
    filter
}

fn infer_sharing_scope(
    metadata: &serde_json::Map<String, serde_json::Value>,
    agent_id: Option<&str>,
) -> SharingScope {
    if let Some(scope) = metadata
        .get("sharing_scope")
        .and_then(|v| v.as_str())
        .and_then(|s| SharingScope::from_db_str(s).ok())
    {
        return scope;
    }
    if metadata.get("connector_id").and_then(|v| v.as_str()).is_some() {
        return SharingScope::Connector;
    }
    if metadata
        .get("agent_category")
        .and_then(|v| v.as_str())
        .is_some()
    {
        return SharingScope::Category;
    }
    if agent_id.is_some() {
        return SharingScope::Agent;
    }
    SharingScope::Global
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharing_scope_inference() {
        let empty = serde_json::Map::new();
        assert_eq!(infer_sharing_scope(&empty, None), SharingScope::Global);
        assert_eq!(infer_sharing_scope(&empty, Some("a1")), SharingScope::Agent);

        let mut with_connector = serde_json::Map::new();
        with_connector.insert(
            "connector_id".to_string(),
            serde_json::Value::String("slack".to_string()),
        );
        assert_eq!(
            infer_sharing_scope(&with_connector, Some("a1")),
            SharingScope::Connector
        );

        let mut explicit = serde_json::Map::new();
        explicit.insert(
            "sharing_scope".to_string(),
            serde_json::Value::String("global".to_string()),
        );
        assert_eq!(
            infer_sharing_scope(&explicit, Some("a1")),
            SharingScope::Global
        );
    }
}
