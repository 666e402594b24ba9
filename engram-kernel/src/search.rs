//! Hybrid retrieval

use crate::scoring::{composite_score, echo_boost, hybrid_score, keyword_score, tokenize};
use crate::write::resolve_memory_id;
use crate::{
    ContextPacket, MaskingStats, MemoryHit, MemoryKernel, SceneEntry, SceneSearchResponse,
    SceneSummary, SearchEntry, SearchRequest, SearchResponse, Snippet, TokenUsage,
};
use chrono::Utc;
use engram_core::{
    Capability, ConfidentialityScope, EngramError, EngramResult, MemoryRecord, QueryIntent,
    SessionRecord, SharingScope,
};
use engram_echo::{classify_intent, graph_boost};
use engram_llm::EmbedAction;
use engram_policy::{mask_item, PolicyGateway};
use engram_storage::MemoryPatch;
use std::collections::HashSet;
use tracing::{debug, warn};

impl MemoryKernel {
    /// Hybrid semantic + keyword retrieval with scope and namespace masking.
    pub fn search(&self, request: &SearchRequest) -> EngramResult<SearchResponse> {
        let session = self.gateway.authenticate(
            request.token.as_deref(),
            Some(&request.user_id),
            request.agent_id.as_deref(),
            true,
            if request.token.is_some() || request.agent_id.is_some() {
                &[Capability::Search]
            } else {
                &[]
            },
        )?;
        let allowed_scopes = allowed_scopes_of(session.as_ref());
        let allowed_namespaces = self.gateway.resolve_allowed_namespaces(
            session.as_ref(),
            &request.user_id,
            request.agent_id.as_deref(),
            "read",
        )?;

        let intent = classify_intent(&request.query);
        let limit = request.limit.max(1);

        if request.query.trim().is_empty() {
            return Ok(SearchResponse {
                results: Vec::new(),
                count: 0,
                intent,
                context_packet: ContextPacket {
                    query: request.query.clone(),
                    snippets: Vec::new(),
                    token_usage: TokenUsage::default(),
                    masking: MaskingStats::default(),
                },
                scene_hits: Vec::new(),
                diagnostic: None,
            });
        }

        // Embedding failure degrades to an empty result with a diagnostic
        // instead of erroring the read path.
        let query_embedding = match self.embedder.embed(&request.query, EmbedAction::Search) {
            Ok(embedding) => embedding.data,
            Err(e) => {
                warn!(error = %e, "query embedding failed");
                return Ok(empty_response(&request.query, intent, e));
            }
        };

        let mut filter = serde_json::Map::new();
        filter.insert(
            "user_id".to_string(),
            serde_json::Value::String(request.user_id.clone()),
        );
        let raw_hits = self
            .vector
            .search(&query_embedding, limit * 2, Some(&filter))?;
        let collapsed = collapse_by_memory(raw_hits);
        let total_candidates = collapsed.len();

        let query_lower = request.query.to_lowercase();
        let query_terms: HashSet<String> = tokenize(&request.query).into_iter().collect();
        let keyword_enabled = request
            .keyword_search
            .unwrap_or(self.config.retrieval.keyword_search);

        // Category context for the query (fast keyword pass only).
        let query_category = {
            let matched = self.categories.detect_category(&request.query, false);
            (matched.confidence > 0.4).then(|| {
                self.categories.access_category(&matched.name, Utc::now());
                let related = self.categories.find_related(&matched.name);
                (matched.name, related)
            })
        };

        let mut entries: Vec<SearchEntry> = Vec::new();
        for (memory_id, similarity) in collapsed {
            let Some(memory) = self.store.get_memory(memory_id)? else {
                continue;
            };
            if memory.tombstoned {
                continue;
            }
            if memory.is_expired(Utc::now().date_naive()) {
                self.delete_memory_internal(memory.memory_id, false)?;
                continue;
            }
            if memory.strength < self.config.retrieval.min_strength {
                continue;
            }
            if !request.categories.is_empty()
                && !request
                    .categories
                    .iter()
                    .any(|c| memory.categories.contains(c))
            {
                continue;
            }
            if !request.scope_filter.is_empty()
                && !request.scope_filter.contains(&memory.sharing_scope)
            {
                continue;
            }
            if !self.sharing_allows(&memory, request) {
                continue;
            }

            // Masking comes before side effects: masked memories are not
            // touched, not boosted, and never leak content.
            let namespace_ok =
                PolicyGateway::is_namespace_allowed(&memory.namespace, &allowed_namespaces);
            let scope_ok = allowed_scopes.contains(&memory.confidentiality_scope);
            if !namespace_ok || !scope_ok {
                entries.push(SearchEntry::Masked(mask_item(
                    memory.memory_id,
                    Some(memory.created_at),
                    memory.importance(),
                )));
                continue;
            }

            let mut strength = memory.strength;
            let keyword = if keyword_enabled {
                keyword_score(&query_terms, &memory.content, memory.echo.as_ref())
            } else {
                0.0
            };
            let base = if keyword_enabled {
                hybrid_score(similarity, keyword, self.config.retrieval.hybrid_alpha)
            } else {
                similarity
            };
            let mut composite = composite_score(base, strength)
                * self.scope_weight(memory.sharing_scope);

            let boost = memory
                .echo
                .as_ref()
                .map(|echo| {
                    echo_boost(
                        &query_lower,
                        &query_terms,
                        echo,
                        self.config.retrieval.echo_boost_cap,
                    )
                })
                .unwrap_or(0.0);
            composite *= 1.0 + boost;

            let category_bump = query_category
                .as_ref()
                .map(|(name, related)| {
                    if memory.categories.contains(name) {
                        self.config.categories.category_boost_weight
                    } else if memory.categories.iter().any(|c| related.contains(c)) {
                        self.config.categories.cross_category_boost
                    } else {
                        0.0
                    }
                })
                .unwrap_or(0.0);
            composite *= 1.0 + category_bump;

            let entity_names = self.store.get_memory_entities(memory.memory_id)?;
            let graph_bump = graph_boost(
                &query_lower,
                &query_terms,
                &entity_names,
                self.config.retrieval.graph_boost_weight,
            );
            composite *= 1.0 + graph_bump;

            if self.config.retrieval.boost_on_access {
                strength = self.record_access(&memory)?;
            }

            entries.push(SearchEntry::Hit(Box::new(MemoryHit {
                id: memory.memory_id,
                memory: memory.content.clone(),
                user_id: memory.user_id.clone(),
                agent_id: memory.agent_id.clone(),
                categories: memory.categories.clone(),
                namespace: memory.namespace.clone(),
                confidentiality_scope: memory.confidentiality_scope,
                sharing_scope: memory.sharing_scope,
                tier: memory.tier,
                created_at: memory.created_at,
                updated_at: memory.updated_at,
                score: similarity,
                keyword_score: keyword,
                strength,
                access_count: memory.access_count + 1,
                composite_score: composite,
                echo_boost: boost,
                category_boost: category_bump,
                graph_boost: graph_bump,
                masked: false,
            })));
        }

        entries.sort_by(|a, b| {
            b.composite_score()
                .partial_cmp(&a.composite_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(limit);

        // Weak retrieval refs slow forgetting of what agents actually use.
        if let Some(agent_id) = request.agent_id.as_deref() {
            let kept: Vec<_> = entries
                .iter()
                .filter_map(|entry| match entry {
                    SearchEntry::Hit(hit) => Some(hit.id),
                    SearchEntry::Masked(_) => None,
                })
                .collect();
            if !kept.is_empty() {
                self.decay.refs().record_retrieval_refs(&kept, agent_id, false)?;
            }
        }

        self.persist_categories()?;

        let scene_hits = match intent {
            QueryIntent::Semantic => Vec::new(),
            QueryIntent::Episodic => self.scene_entries(
                &request.user_id,
                &request.query,
                limit,
                &allowed_scopes,
                &allowed_namespaces,
            )?,
            QueryIntent::Mixed => self.scene_entries(
                &request.user_id,
                &request.query,
                (limit / 2).max(3),
                &allowed_scopes,
                &allowed_namespaces,
            )?,
        };

        let masked_count = entries.iter().filter(|e| e.is_masked()).count();
        let snippets: Vec<Snippet> = entries
            .iter()
            .filter_map(|entry| match entry {
                SearchEntry::Hit(hit) => Some(Snippet {
                    id: hit.id,
                    text: hit.memory.clone(),
                }),
                SearchEntry::Masked(_) => None,
            })
            .collect();
        let estimated_tokens = snippets.iter().map(|s| s.text.len() / 4).sum();

        debug!(
            query = %request.query,
            results = entries.len(),
            masked = masked_count,
            intent = intent.as_db_str(),
            "search complete"
        );

        Ok(SearchResponse {
            count: entries.len(),
            intent,
            context_packet: ContextPacket {
                query: request.query.clone(),
                snippets,
                token_usage: TokenUsage {
                    estimated_tokens,
                    budget: 0,
                },
                masking: MaskingStats {
                    masked_count,
                    total_candidates,
                },
            },
            results: entries,
            scene_hits,
            diagnostic: None,
        })
    }

    /// Scene-only search with the same masking rules.
    pub fn search_scenes(
        &self,
        query: &str,
        user_id: &str,
        agent_id: Option<&str>,
        token: Option<&str>,
        limit: usize,
    ) -> EngramResult<SceneSearchResponse> {
        let session = self.gateway.authenticate(
            token,
            Some(user_id),
            agent_id,
            true,
            if token.is_some() || agent_id.is_some() {
                &[Capability::ReadScene]
            } else {
                &[]
            },
        )?;
        let allowed_scopes = allowed_scopes_of(session.as_ref());
        let allowed_namespaces =
            self.gateway
                .resolve_allowed_namespaces(session.as_ref(), user_id, agent_id, "read")?;

        let scenes =
            self.scene_entries(user_id, query, limit, &allowed_scopes, &allowed_namespaces)?;
        Ok(SceneSearchResponse {
            count: scenes.len(),
            scenes,
        })
    }

    /// Fetch one scene, masked when outside the session's reach.
    pub fn get_scene(
        &self,
        scene_id: engram_core::SceneId,
        user_id: &str,
        agent_id: Option<&str>,
        token: Option<&str>,
    ) -> EngramResult<Option<SceneEntry>> {
        let session = self.gateway.authenticate(
            token,
            Some(user_id),
            agent_id,
            true,
            if token.is_some() || agent_id.is_some() {
                &[Capability::ReadScene]
            } else {
                &[]
            },
        )?;
        let Some(scene) = self.store.get_scene(scene_id)? else {
            return Ok(None);
        };

        let allowed_scopes = allowed_scopes_of(session.as_ref());
        let allowed_namespaces =
            self.gateway
                .resolve_allowed_namespaces(session.as_ref(), user_id, agent_id, "read")?;
        let namespace_ok =
            PolicyGateway::is_namespace_allowed(&scene.namespace, &allowed_namespaces);
        let scope_ok = allowed_scopes.contains(&scene.confidentiality_scope);
        if !namespace_ok || !scope_ok {
            return Ok(Some(SceneEntry::Masked(mask_item(
                scene.scene_id,
                Some(scene.start_time),
                scene.scene_strength,
            ))));
        }
        Ok(Some(SceneEntry::Scene(SceneSummary {
            id: scene.scene_id,
            title: scene.title,
            topic: scene.topic,
            summary: scene.summary,
            start_time: scene.start_time,
            end_time: scene.end_time,
            participants: scene.participants,
            memory_count: scene.memory_ids.len(),
            score: 0.0,
            masked: false,
        })))
    }

    fn scene_entries(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
        allowed_scopes: &[ConfidentialityScope],
        allowed_namespaces: &[String],
    ) -> EngramResult<Vec<SceneEntry>> {
        let hits = self.episodic.search_scenes(user_id, query, limit, None, None)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let scene = hit.scene;
                let namespace_ok =
                    PolicyGateway::is_namespace_allowed(&scene.namespace, allowed_namespaces);
                let scope_ok = allowed_scopes.contains(&scene.confidentiality_scope);
                if !namespace_ok || !scope_ok {
                    return SceneEntry::Masked(mask_item(
                        scene.scene_id,
                        Some(scene.start_time),
                        scene.scene_strength,
                    ));
                }
                SceneEntry::Scene(SceneSummary {
                    id: scene.scene_id,
                    title: scene.title,
                    topic: scene.topic,
                    summary: scene.summary,
                    start_time: scene.start_time,
                    end_time: scene.end_time,
                    participants: scene.participants,
                    memory_count: scene.memory_ids.len(),
                    score: hit.score,
                    masked: false,
                })
            })
            .collect())
    }

    /// Access side effects: bump count, boost strength (bounded), boost the
    /// fast trace, check promotion, schedule re-echo. Returns the new
    /// strength.
    fn record_access(&self, memory: &MemoryRecord) -> EngramResult<f64> {
        self.store.increment_access(memory.memory_id)?;

        let mut strength = memory.strength;
        let boost = self.config.decay.access_strength_boost;
        let mut patch = MemoryPatch::default();
        if boost > 0.0 {
            let boosted = (strength + boost).min(1.0);
            if boosted != strength {
                strength = boosted;
                patch.strength = Some(boosted);
            }
        }
        if let Some(traces) = memory.traces {
            patch.traces = Some(engram_decay::boost_fast_trace(
                traces,
                boost,
                &self.config.traces,
            ));
        }
        if patch.strength.is_some() || patch.traces.is_some() {
            self.store.update_memory(memory.memory_id, &patch)?;
        }

        let access_count = memory.access_count + 1;
        if engram_decay::should_promote(memory.tier, access_count, strength, &self.config.decay) {
            self.store.update_memory(
                memory.memory_id,
                &MemoryPatch {
                    tier: Some(engram_core::MemoryTier::Lml),
                    ..MemoryPatch::default()
                },
            )?;
            self.store.record_event(
                memory.memory_id,
                engram_core::MemoryEventKind::Promote,
                None,
                None,
                Some(engram_core::MemoryTier::Sml),
                Some(engram_core::MemoryTier::Lml),
            )?;
        }

        if self.config.echo.reecho_on_access
            && access_count >= self.config.echo.reecho_threshold
            && memory
                .echo
                .as_ref()
                .map(|echo| echo.depth < engram_core::EchoDepth::Deep)
                .unwrap_or(true)
        {
            self.reecho_memory(memory)?;
        }

        Ok(strength)
    }

    /// Re-process a memory one echo depth deeper and write back the richer
    /// encoding; rehearsal also boosts strength by 10% (bounded).
    fn reecho_memory(&self, memory: &MemoryRecord) -> EngramResult<()> {
        if !self.config.echo.enable_echo {
            return Ok(());
        }
        let current_depth = memory
            .echo
            .as_ref()
            .map(|echo| echo.depth)
            .unwrap_or(engram_core::EchoDepth::Shallow);
        let result = self.echo.reecho(&memory.content, current_depth);
        let new_strength = (memory.strength * 1.1).min(1.0);

        self.store.update_memory(
            memory.memory_id,
            &MemoryPatch {
                echo: Some(result.to_metadata()),
                strength: Some(new_strength),
                ..MemoryPatch::default()
            },
        )?;
        self.store.record_event(
            memory.memory_id,
            engram_core::MemoryEventKind::Reecho,
            Some(memory.strength),
            Some(new_strength),
            None,
            None,
        )?;

        let mut updates = serde_json::Map::new();
        updates.insert(
            "echo_depth".to_string(),
            serde_json::Value::String(result.depth.as_db_str().to_string()),
        );
        self.update_vector_payloads(memory.memory_id, &updates)?;
        Ok(())
    }

    /// Sharing-scope gate: can this requester read this memory at all?
    fn sharing_allows(&self, memory: &MemoryRecord, request: &SearchRequest) -> bool {
        match memory.sharing_scope {
            SharingScope::Global => true,
            SharingScope::Agent => match (&request.agent_id, &memory.agent_id) {
                // A user-direct request sees everything it owns.
                (None, _) => true,
                (Some(requester), Some(owner)) => requester == owner,
                (Some(_), None) => true,
            },
            SharingScope::Category => {
                let memory_category = memory
                    .metadata
                    .get("agent_category")
                    .and_then(|v| v.as_str());
                match (&request.agent_category, memory_category) {
                    (Some(requested), Some(stored)) => requested.eq_ignore_ascii_case(stored),
                    (None, _) => request.agent_id.is_none(),
                    (Some(_), None) => false,
                }
            }
            SharingScope::Connector => {
                let memory_connector = memory
                    .metadata
                    .get("connector_id")
                    .and_then(|v| v.as_str());
                match memory_connector {
                    Some(stored) => request
                        .connector_ids
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(stored)),
                    None => request.agent_id.is_none(),
                }
            }
        }
    }

    fn scope_weight(&self, scope: SharingScope) -> f64 {
        let weights = &self.config.retrieval.scope_weights;
        match scope {
            SharingScope::Agent => weights.agent,
            SharingScope::Connector => weights.connector,
            SharingScope::Category => weights.category,
            SharingScope::Global => weights.global,
        }
    }
}

fn allowed_scopes_of(session: Option<&SessionRecord>) -> Vec<ConfidentialityScope> {
    match session {
        Some(session) => session.allowed_scopes.clone(),
        None => PolicyGateway::default_allowed_scopes(),
    }
}

/// Collapse multi-node vector hits by memory id, keeping the best score.
fn collapse_by_memory(
    hits: Vec<engram_vector::VectorHit>,
) -> Vec<(engram_core::MemoryId, f64)> {
    let mut best: Vec<(engram_core::MemoryId, f64)> = Vec::new();
    for hit in hits {
        let memory_id = resolve_memory_id(&hit);
        let score = hit.score as f64;
        match best.iter_mut().find(|(id, _)| *id == memory_id) {
            Some((_, existing)) if *existing < score => *existing = score,
            Some(_) => {}
            None => best.push((memory_id, score)),
        }
    }
    best
}

fn empty_response(query: &str, intent: QueryIntent, error: EngramError) -> SearchResponse {
    SearchResponse {
        results: Vec::new(),
        count: 0,
        intent,
        context_packet: ContextPacket {
            query: query.to_string(),
            snippets: Vec::new(),
            token_usage: TokenUsage::default(),
            masking: MaskingStats::default(),
        },
        scene_hits: Vec::new(),
        diagnostic: Some(format!("embedding unavailable: {}", error)),
    }
}
