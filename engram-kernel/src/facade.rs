//! Public kernel operations

use crate::write::DirectWrite;
use crate::{
    AppliedWrite, ApproveResponse, MemoryKernel, ProposeWriteRequest, ProposeWriteResponse,
    RejectResponse, ResolveConflictResponse, WriteEvent, WriteMode,
};
use chrono::Utc;
use engram_core::{
    normalize_namespace, AgentPolicy, AgentTrust, Capability, ChangeOp, ChangePatch, CommitId,
    CommitStatus, DailyDigest, DigestCommitEntry, DigestPayload, EngramResult, HandoffLane,
    HandoffSession, HandoffStatus, InvariantRecord, LaneId, LaneStatus, MemoryEvent, MemoryId,
    MemoryRecord, MemoryTier, Namespace, PolicyError, ProposalCommit, Provenance,
    SceneHighlight, StagingError, StashId, StashResolution, StorageError, ValidationError,
};
use engram_handoff::{CheckpointOutcome, CheckpointRequest, ResumeContext, SessionDigest};
use engram_policy::{detect_confidentiality_scope, SessionGrant, SessionRequest};
use engram_staging::auto_merge_allowed;
use engram_storage::{MemoryPatch, MemoryStats, SceneFilters};
use tracing::{info, warn};

const FUSION_SEPARATOR: &str = " | ";

impl MemoryKernel {
    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// Create a capability session; the returned grant carries the plaintext
    /// token exactly once.
    pub fn create_session(&self, request: &SessionRequest) -> EngramResult<SessionGrant> {
        self.gateway.create_session(request)
    }

    /// Authenticate a token for external surfaces that hold one.
    pub fn authenticate_session(
        &self,
        token: &str,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<engram_core::SessionRecord> {
        self.gateway
            .authenticate(Some(token), user_id, agent_id, true, &[])?
            .ok_or_else(|| PolicyError::InvalidToken.into())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Stage (or, for trusted local clients, directly apply) a write.
    pub fn propose_write(
        &self,
        request: &ProposeWriteRequest,
    ) -> EngramResult<ProposeWriteResponse> {
        let scope = detect_confidentiality_scope(
            request.scope,
            &request.metadata,
            &request.categories,
            &request.content,
        );
        let namespace = normalize_namespace(
            request
                .namespace
                .as_deref()
                .or_else(|| request.metadata.get("namespace").and_then(|v| v.as_str())),
        );

        let direct_requested = request.mode == WriteMode::Direct && request.trusted_direct;
        let require_for_agent = !direct_requested;
        let required: &[Capability] =
            if request.token.is_some() || (require_for_agent && request.agent_id.is_some()) {
                &[Capability::ProposeWrite]
            } else {
                &[]
            };
        let session = self.gateway.authenticate(
            request.token.as_deref(),
            Some(&request.user_id),
            request.agent_id.as_deref(),
            require_for_agent,
            required,
        )?;

        let allowed = self.gateway.resolve_allowed_namespaces(
            session.as_ref(),
            &request.user_id,
            request.agent_id.as_deref(),
            "write",
        )?;
        if !engram_policy::PolicyGateway::is_namespace_allowed(&namespace, &allowed) {
            return Err(PolicyError::NamespaceDenied { namespace }.into());
        }
        self.gateway
            .enforce_write_quotas(&request.user_id, request.agent_id.as_deref())?;
        self.store
            .ensure_namespace(&request.user_id, &namespace, None)?;

        let provenance = build_provenance(request);

        let mode = if request.mode == WriteMode::Direct || !self.config.staging.enable_staging {
            WriteMode::Direct
        } else {
            WriteMode::Staging
        };
        if mode == WriteMode::Direct {
            if !request.trusted_direct {
                return Err(PolicyError::DirectModeDenied.into());
            }
            let result = self.apply_direct_write(&DirectWrite {
                user_id: &request.user_id,
                agent_id: request.agent_id.as_deref(),
                content: &request.content,
                categories: &request.categories,
                metadata: &request.metadata,
                scope,
                namespace: &namespace,
                provenance: &provenance,
                source_app: request.source_app.as_deref(),
            })?;
            self.persist_categories()?;
            return Ok(ProposeWriteResponse::Direct { result });
        }

        let checks = self
            .invariants
            .evaluate_add(&request.user_id, &request.content)?;
        let patch = ChangePatch {
            content: request.content.clone(),
            categories: request.categories.clone(),
            metadata: request.metadata.clone(),
            infer: request.infer,
            source_app: request.source_app.clone(),
            confidentiality_scope: scope,
            namespace: namespace.clone(),
        };
        let commit = self.staging.create_add_commit(
            &request.user_id,
            request.agent_id.as_deref(),
            scope,
            patch,
            checks.clone(),
            provenance,
        )?;

        if !checks.conflicts.is_empty() {
            self.staging
                .stash_conflicts(&request.user_id, commit.commit_id, &checks.conflicts)?;
        }

        let mut status = commit.status;
        let mut auto_merged = false;
        if status == CommitStatus::Pending && self.config.staging.enable_auto_merge {
            if let Some(agent_id) = request.agent_id.as_deref() {
                let trust = self.store.get_agent_trust(&request.user_id, agent_id)?;
                if auto_merge_allowed(&trust, &checks, &self.config.staging) {
                    info!(commit_id = %commit.commit_id, agent_id, "auto-merging trusted commit");
                    self.approve_commit(commit.commit_id, None, None)?;
                    status = CommitStatus::Approved;
                    auto_merged = true;
                }
            }
        }

        Ok(ProposeWriteResponse::Staging {
            commit_id: commit.commit_id,
            status,
            checks,
            preview: commit.preview,
            auto_merged,
        })
    }

    /// Pending (or otherwise filtered) commits for review.
    pub fn list_pending_commits(
        &self,
        user_id: Option<&str>,
        status: Option<CommitStatus>,
        limit: usize,
        token: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<Vec<ProposalCommit>> {
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                user_id,
                agent_id,
                agent_id.is_some(),
                &[Capability::ReviewCommits],
            )?;
        }
        self.staging.list_commits(user_id, status, limit)
    }

    /// Approve and apply a staged commit.
    ///
    /// Exactly one concurrent caller wins the CAS into APPLYING; every other
    /// caller observes the live status. Approving an APPROVED commit is an
    /// idempotent success with no side effects.
    pub fn approve_commit(
        &self,
        commit_id: CommitId,
        token: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<ApproveResponse> {
        let commit = self.staging.get_commit(commit_id)?;
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(&commit.user_id),
                agent_id,
                agent_id.is_some(),
                &[Capability::ReviewCommits],
            )?;
        }

        match commit.status {
            CommitStatus::Approved => {
                return Ok(ApproveResponse {
                    commit_id,
                    status: CommitStatus::Approved,
                    applied: Vec::new(),
                });
            }
            CommitStatus::Rejected => {
                return Err(StagingError::AlreadyRejected { commit_id }.into());
            }
            _ => {}
        }

        self.staging.begin_apply(commit_id)?;

        let mut applied: Vec<AppliedWrite> = Vec::new();
        let mut created: Vec<MemoryId> = Vec::new();
        let outcome: EngramResult<()> = (|| {
            for change in &commit.changes {
                match change.op {
                    ChangeOp::Add => {
                        let result = self.apply_direct_write(&DirectWrite {
                            user_id: &commit.user_id,
                            agent_id: commit.agent_id.as_deref(),
                            content: &change.patch.content,
                            categories: &change.patch.categories,
                            metadata: &change.patch.metadata,
                            scope: change.patch.confidentiality_scope,
                            namespace: &change.patch.namespace,
                            provenance: &commit.provenance,
                            source_app: change.patch.source_app.as_deref(),
                        })?;
                        created.extend(result.created_ids.iter().copied());
                        applied.extend(result.results);
                    }
                    ChangeOp::Update => {
                        let target = change.target_id.ok_or_else(|| {
                            StagingError::UnsupportedChange {
                                target: "memory_item".to_string(),
                                op: "UPDATE without target".to_string(),
                            }
                        })?;
                        let updated = self.update_memory(
                            target,
                            Some(change.patch.content.as_str()),
                            None,
                            Some(change.patch.categories.as_slice()),
                        )?;
                        applied.push(AppliedWrite {
                            id: target,
                            event: WriteEvent::Update,
                            tier: updated.tier,
                            strength: updated.strength,
                            vector_nodes: 0,
                        });
                    }
                    ChangeOp::Delete => {
                        let target = change.target_id.ok_or_else(|| {
                            StagingError::UnsupportedChange {
                                target: "memory_item".to_string(),
                                op: "DELETE without target".to_string(),
                            }
                        })?;
                        self.delete_memory(target)?;
                        applied.push(AppliedWrite {
                            id: target,
                            event: WriteEvent::Update,
                            tier: MemoryTier::Sml,
                            strength: 0.0,
                            vector_nodes: 0,
                        });
                    }
                }
            }
            Ok(())
        })();

        if let Err(error) = outcome {
            // Roll back newly-created memories in reverse order.
            let mut rolled_back = 0i64;
            for memory_id in created.iter().rev() {
                if self.delete_memory_internal(*memory_id, true).unwrap_or(false) {
                    rolled_back += 1;
                }
            }
            self.staging
                .fail_apply(commit_id, &error.to_string(), rolled_back)?;
            warn!(%commit_id, %error, rolled_back, "commit apply failed");
            return Err(StagingError::ApplyFailed {
                commit_id,
                reason: error.to_string(),
                rolled_back,
            }
            .into());
        }

        self.staging.finish_apply(commit_id)?;
        if let Some(agent_id) = commit.agent_id.as_deref() {
            self.store
                .record_agent_outcome(&commit.user_id, agent_id, true)?;
        }
        self.persist_categories()?;
        info!(%commit_id, applied = applied.len(), "commit approved");

        Ok(ApproveResponse {
            commit_id,
            status: CommitStatus::Approved,
            applied,
        })
    }

    /// Reject a staged commit, recording the reason into its checks.
    pub fn reject_commit(
        &self,
        commit_id: CommitId,
        reason: Option<&str>,
        token: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<RejectResponse> {
        let commit = self.staging.get_commit(commit_id)?;
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(&commit.user_id),
                agent_id,
                agent_id.is_some(),
                &[Capability::ReviewCommits],
            )?;
        }

        let was_rejected = commit.status == CommitStatus::Rejected;
        self.staging.reject(commit_id, reason)?;
        if !was_rejected {
            if let Some(agent_id) = commit.agent_id.as_deref() {
                self.store
                    .record_agent_outcome(&commit.user_id, agent_id, false)?;
            }
        }

        Ok(RejectResponse {
            commit_id,
            status: CommitStatus::Rejected,
            reason: reason.map(str::to_string),
        })
    }

    /// Resolve a stashed invariant conflict. ACCEPT_PROPOSED re-points the
    /// invariant at the proposed value with reduced confidence.
    pub fn resolve_conflict(
        &self,
        stash_id: StashId,
        resolution: StashResolution,
        token: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<ResolveConflictResponse> {
        let stash = self
            .store
            .get_conflict_stash(stash_id)?
            .ok_or(StorageError::StashNotFound { id: stash_id })?;
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(&stash.user_id),
                agent_id,
                agent_id.is_some(),
                &[Capability::ResolveConflicts],
            )?;
        }

        self.store.resolve_conflict_stash(stash_id, resolution)?;
        if resolution == StashResolution::AcceptProposed && !stash.proposed.is_empty() {
            let now = Utc::now();
            self.store.upsert_invariant(&InvariantRecord {
                user_id: stash.user_id.clone(),
                key: stash.conflict_key.clone(),
                value: stash.proposed.clone(),
                category: "identity".to_string(),
                confidence: 0.8,
                source_memory_id: None,
                created_at: now,
                updated_at: now,
            })?;
        }

        Ok(ResolveConflictResponse {
            stash_id,
            resolution,
        })
    }

    /// Sweep interrupted APPLYING commits back to PENDING (also runs at
    /// construction).
    pub fn recover_interrupted_commits(&self) -> EngramResult<usize> {
        self.staging.recover_interrupted()
    }

    // ========================================================================
    // MEMORY ACCESS
    // ========================================================================

    /// Fetch one memory, counting the access.
    pub fn get_memory(&self, memory_id: MemoryId) -> EngramResult<Option<MemoryRecord>> {
        let memory = self.store.get_memory(memory_id)?;
        if memory.is_some() {
            self.store.increment_access(memory_id)?;
        }
        Ok(memory)
    }

    /// Update a memory's content, metadata, and/or categories. Content
    /// changes re-run echo encoding and rebuild the vector nodes.
    pub fn update_memory(
        &self,
        memory_id: MemoryId,
        content: Option<&str>,
        metadata: Option<&serde_json::Map<String, serde_json::Value>>,
        categories: Option<&[String]>,
    ) -> EngramResult<MemoryRecord> {
        let memory = self
            .store
            .get_memory(memory_id)?
            .ok_or(StorageError::MemoryNotFound { id: memory_id })?;
        if memory.immutable {
            return Err(ValidationError::InvalidValue {
                field: "memory_id".to_string(),
                reason: "memory is immutable".to_string(),
            }
            .into());
        }

        let mut patch = MemoryPatch {
            metadata: metadata.cloned(),
            categories: categories.map(<[String]>::to_vec),
            ..MemoryPatch::default()
        };
        if let Some(content) = content {
            patch.content = Some(content.to_string());
        }
        self.store.update_memory(memory_id, &patch)?;
        self.store.record_event(
            memory_id,
            engram_core::MemoryEventKind::Update,
            Some(memory.strength),
            Some(memory.strength),
            None,
            None,
        )?;

        if let Some(content) = content {
            // Rebuild the vector fan-out for the new content.
            self.delete_vectors_for_memory(memory_id)?;
            let updated = self
                .store
                .get_memory(memory_id)?
                .ok_or(StorageError::MemoryNotFound { id: memory_id })?;
            let echo_result = if self.config.echo.enable_echo {
                Some(self.echo.process(content, None, None))
            } else {
                None
            };
            let embedding = self
                .embedder
                .embed(content, engram_llm::EmbedAction::Update)?
                .data;
            let mut refreshed = updated.clone();
            refreshed.echo = echo_result.as_ref().map(|e| e.to_metadata());
            let (vectors, payloads, ids) =
                self.rebuild_vectors(&refreshed, &embedding, echo_result.as_ref())?;
            self.vector.insert(&vectors, &payloads, &ids)?;
            if let Some(echo_result) = echo_result {
                self.store.update_memory(
                    memory_id,
                    &MemoryPatch {
                        echo: Some(echo_result.to_metadata()),
                        ..MemoryPatch::default()
                    },
                )?;
            }
        }

        self.store
            .get_memory(memory_id)?
            .ok_or_else(|| StorageError::MemoryNotFound { id: memory_id }.into())
    }

    /// Delete a memory (tombstone per config) and its vector nodes.
    pub fn delete_memory(&self, memory_id: MemoryId) -> EngramResult<bool> {
        self.delete_memory_internal(memory_id, false)
    }

    /// Mutation history of one memory, oldest first.
    pub fn get_history(&self, memory_id: MemoryId) -> EngramResult<Vec<MemoryEvent>> {
        self.store.get_history(memory_id)
    }

    /// Aggregate memory statistics.
    pub fn get_stats(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<MemoryStats> {
        self.store.memory_stats(user_id, agent_id)
    }

    /// Fuse several memories into one long-tier record; sources are
    /// tombstoned. The LLM merges content when available, otherwise the
    /// contents are joined verbatim.
    pub fn fuse_memories(
        &self,
        memory_ids: &[MemoryId],
        user_id: &str,
    ) -> EngramResult<MemoryRecord> {
        if memory_ids.len() < 2 {
            return Err(ValidationError::InvalidValue {
                field: "memory_ids".to_string(),
                reason: "fusion needs at least two memories".to_string(),
            }
            .into());
        }
        let loaded = self.store.get_memories_bulk(memory_ids)?;
        let mut sources: Vec<&MemoryRecord> = Vec::new();
        for memory_id in memory_ids {
            let memory = loaded
                .get(memory_id)
                .ok_or(StorageError::MemoryNotFound { id: *memory_id })?;
            if memory.user_id != user_id {
                return Err(PolicyError::UserMismatch.into());
            }
            sources.push(memory);
        }

        let fused_content = self.fuse_content(&sources);
        let avg_strength =
            sources.iter().map(|m| m.strength).sum::<f64>() / sources.len() as f64;
        let total_access: i64 = sources.iter().map(|m| m.access_count).sum();
        let now = Utc::now();

        let mut fused = MemoryRecord::new(user_id, fused_content, now)
            .with_scope(sources[0].confidentiality_scope)
            .with_namespace(sources[0].namespace.clone())
            .with_strength((avg_strength * 1.2).min(1.0));
        fused.tier = MemoryTier::Lml;
        fused.access_count = total_access;
        fused.source_type = Some("fusion".to_string());
        fused.metadata.insert(
            "fused_from".to_string(),
            serde_json::Value::Array(
                sources
                    .iter()
                    .map(|m| serde_json::Value::String(m.memory_id.to_string()))
                    .collect(),
            ),
        );
        if self.config.traces.enable_multi_trace {
            fused.traces = Some(engram_decay::initialize_traces(
                fused.strength,
                false,
                &self.config.traces,
            ));
        }

        let fused_id = self.store.add_memory(&fused)?;
        let embedding = self
            .embedder
            .embed(&fused.content, engram_llm::EmbedAction::Add)?
            .data;
        let (vectors, payloads, ids) = self.rebuild_vectors(&fused, &embedding, None)?;
        self.vector.insert(&vectors, &payloads, &ids)?;

        for source in &sources {
            self.delete_memory_internal(source.memory_id, false)?;
        }
        info!(%fused_id, sources = sources.len(), "fused memories");

        self.store
            .get_memory(fused_id)?
            .ok_or_else(|| StorageError::MemoryNotFound { id: fused_id }.into())
    }

    fn fuse_content(&self, sources: &[&MemoryRecord]) -> String {
        let fallback = || {
            sources
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join(FUSION_SEPARATOR)
        };
        let Some(llm) = self.llm.as_deref() else {
            return fallback();
        };

        let listing = sources
            .iter()
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "Memory {} (strength={:.2}, accessed={}x):\n{}",
                    i + 1,
                    m.strength,
                    m.access_count,
                    m.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Consolidate these memories into one concise memory that preserves \
             every distinct fact.\n\n{}\n\nRespond with a JSON object: \
             {{\"consolidated_memory\": \"...\"}}.",
            listing
        );

        match llm.generate(&prompt) {
            Ok(response) => serde_json::from_str::<serde_json::Value>(response.trim())
                .ok()
                .and_then(|v| {
                    v.get("consolidated_memory")
                        .and_then(|c| c.as_str())
                        .map(str::to_string)
                })
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(fallback),
            Err(e) => {
                warn!(error = %e, "fusion LLM call failed");
                fallback()
            }
        }
    }

    fn rebuild_vectors(
        &self,
        memory: &MemoryRecord,
        embedding: &[f32],
        echo_result: Option<&engram_echo::EchoResult>,
    ) -> EngramResult<(
        Vec<Vec<f32>>,
        Vec<serde_json::Map<String, serde_json::Value>>,
        Vec<uuid::Uuid>,
    )> {
        // Same fan-out as the write path, reused by update and fusion.
        self.build_vectors_for(memory, embedding, echo_result)
    }

    // ========================================================================
    // DIGESTS / TRUST
    // ========================================================================

    /// Daily digest for (user, date); built and persisted on first request.
    pub fn get_daily_digest(
        &self,
        user_id: &str,
        date: chrono::NaiveDate,
        token: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<DailyDigest> {
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(user_id),
                agent_id,
                agent_id.is_some(),
                &[Capability::ReadDigest],
            )?;
        }
        if let Some(existing) = self.store.get_daily_digest(user_id, date)? {
            return Ok(existing);
        }
        let payload = self.build_digest_payload(user_id, date)?;
        self.store.upsert_daily_digest(user_id, date, &payload)?;
        self.store
            .get_daily_digest(user_id, date)?
            .ok_or_else(|| {
                StorageError::RowNotFound {
                    table: "daily_digests".to_string(),
                    key: format!("{}/{}", user_id, date),
                }
                .into()
            })
    }

    pub(crate) fn build_digest_payload(
        &self,
        user_id: &str,
        date: chrono::NaiveDate,
    ) -> EngramResult<DigestPayload> {
        let conflicts = self
            .store
            .list_conflict_stash(Some(user_id), Some(StashResolution::Unresolved), 10)?;
        let pending = self
            .staging
            .list_commits(Some(user_id), Some(CommitStatus::Pending), 10)?
            .into_iter()
            .map(|commit| DigestCommitEntry {
                commit_id: commit.commit_id,
                status: commit.status,
                summary: commit.preview.summary,
                created_at: commit.created_at,
            })
            .collect();

        let (day_start, day_end) = day_bounds(date);
        let scenes = self.store.get_scenes(&SceneFilters {
            user_id: Some(user_id.to_string()),
            start_after: Some(day_start),
            start_before: Some(day_end),
            limit: Some(20),
            ..SceneFilters::default()
        })?;
        let scene_highlights = scenes
            .into_iter()
            .take(10)
            .map(|scene| SceneHighlight {
                scene_id: scene.scene_id,
                summary: scene.summary,
                topic: scene.topic,
                start_time: scene.start_time,
                memory_count: scene.memory_ids.len(),
            })
            .collect();

        Ok(DigestPayload {
            top_conflicts: conflicts,
            top_proposed_consolidations: pending,
            scene_highlights,
        })
    }

    /// Trust counters for (user, agent).
    pub fn get_agent_trust(
        &self,
        user_id: &str,
        agent_id: &str,
        token: Option<&str>,
        requester_agent_id: Option<&str>,
    ) -> EngramResult<AgentTrust> {
        if token.is_some() || requester_agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(user_id),
                requester_agent_id,
                requester_agent_id.is_some(),
                &[Capability::ReadTrust],
            )?;
        }
        self.store.get_agent_trust(user_id, agent_id)
    }

    // ========================================================================
    // NAMESPACES / POLICIES
    // ========================================================================

    /// Declared namespaces, optionally for one user.
    pub fn list_namespaces(
        &self,
        user_id: Option<&str>,
        token: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<Vec<Namespace>> {
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                user_id,
                agent_id,
                agent_id.is_some(),
                &[Capability::ManageNamespaces],
            )?;
        }
        self.store.list_namespaces(user_id)
    }

    /// Declare (or fetch) a namespace.
    pub fn declare_namespace(
        &self,
        user_id: &str,
        namespace: &str,
        description: Option<&str>,
        token: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<Namespace> {
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(user_id),
                agent_id,
                agent_id.is_some(),
                &[Capability::ManageNamespaces],
            )?;
        }
        let name = normalize_namespace(Some(namespace));
        let namespace_id = self.store.ensure_namespace(user_id, &name, description)?;
        self.store
            .list_namespaces(Some(user_id))?
            .into_iter()
            .find(|ns| ns.namespace_id == namespace_id)
            .ok_or_else(|| {
                StorageError::RowNotFound {
                    table: "namespaces".to_string(),
                    key: name,
                }
                .into()
            })
    }

    /// Grant a read/write capability on a namespace to an agent.
    pub fn grant_namespace_permission(
        &self,
        user_id: &str,
        namespace: &str,
        agent_id: &str,
        capability: &str,
        expires_at: Option<engram_core::Timestamp>,
        token: Option<&str>,
        requester_agent_id: Option<&str>,
    ) -> EngramResult<engram_core::PermissionId> {
        if token.is_some() || requester_agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(user_id),
                requester_agent_id,
                requester_agent_id.is_some(),
                &[Capability::ManageNamespaces],
            )?;
        }
        self.store.grant_namespace_permission(
            user_id,
            agent_id,
            &normalize_namespace(Some(namespace)),
            capability,
            expires_at,
        )
    }

    /// Install or replace an agent policy.
    pub fn upsert_agent_policy(
        &self,
        policy: &AgentPolicy,
        token: Option<&str>,
        requester_agent_id: Option<&str>,
    ) -> EngramResult<()> {
        if token.is_some() || requester_agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(&policy.user_id),
                requester_agent_id,
                requester_agent_id.is_some(),
                &[Capability::ManageNamespaces],
            )?;
        }
        for namespace in &policy.allowed_namespaces {
            if namespace != engram_core::WILDCARD {
                self.store
                    .ensure_namespace(&policy.user_id, namespace, None)?;
            }
        }
        self.store.upsert_agent_policy(policy)
    }

    /// Fetch one agent policy, with wildcard fallback.
    pub fn get_agent_policy(
        &self,
        user_id: &str,
        agent_id: &str,
    ) -> EngramResult<Option<AgentPolicy>> {
        self.store.get_agent_policy(user_id, agent_id, true)
    }

    /// List policies, optionally for one user.
    pub fn list_agent_policies(&self, user_id: Option<&str>) -> EngramResult<Vec<AgentPolicy>> {
        self.store.list_agent_policies(user_id)
    }

    /// Delete an agent policy.
    pub fn delete_agent_policy(&self, user_id: &str, agent_id: &str) -> EngramResult<bool> {
        self.store.delete_agent_policy(user_id, agent_id)
    }

    // ========================================================================
    // HANDOFF
    // ========================================================================

    /// Save (upsert) a working-session digest.
    pub fn save_session_digest(
        &self,
        user_id: &str,
        agent_id: &str,
        digest: &SessionDigest,
        token: Option<&str>,
        requester_agent_id: Option<&str>,
    ) -> EngramResult<HandoffSession> {
        self.require_handoff()?;
        self.authenticate_handoff(
            token,
            user_id,
            requester_agent_id.or(Some(agent_id)),
            Capability::WriteHandoff,
        )?;
        self.handoff.save_session_digest(user_id, agent_id, digest)
    }

    /// Most recent handoff session matching the filters.
    pub fn get_last_session(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[HandoffStatus]>,
        token: Option<&str>,
        requester_agent_id: Option<&str>,
    ) -> EngramResult<Option<HandoffSession>> {
        self.require_handoff()?;
        self.authenticate_handoff(
            token,
            user_id,
            requester_agent_id.or(agent_id),
            Capability::ReadHandoff,
        )?;
        self.handoff.get_last_session(user_id, agent_id, repo, statuses)
    }

    /// Handoff sessions matching the filters, newest first.
    pub fn list_sessions(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[HandoffStatus]>,
        limit: usize,
        token: Option<&str>,
        requester_agent_id: Option<&str>,
    ) -> EngramResult<Vec<HandoffSession>> {
        self.require_handoff()?;
        self.authenticate_handoff(
            token,
            user_id,
            requester_agent_id.or(agent_id),
            Capability::ReadHandoff,
        )?;
        self.handoff
            .list_sessions(user_id, agent_id, repo, statuses, limit)
    }

    /// Resolve the lane for this scope and return its resume state.
    #[allow(clippy::too_many_arguments)]
    pub fn auto_resume_context(
        &self,
        user_id: &str,
        agent_id: &str,
        repo: Option<&str>,
        branch: Option<&str>,
        lane_type: &str,
        objective: Option<&str>,
        namespace: &str,
        auto_create: bool,
        token: Option<&str>,
    ) -> EngramResult<ResumeContext> {
        self.require_handoff()?;
        self.authenticate_handoff(token, user_id, Some(agent_id), Capability::ReadHandoff)?;
        self.handoff.auto_resume_context(
            user_id,
            agent_id,
            repo,
            branch,
            lane_type,
            objective,
            namespace,
            None,
            auto_create,
        )
    }

    /// Append a checkpoint on tool completion.
    pub fn auto_checkpoint(
        &self,
        request: &CheckpointRequest<'_>,
        token: Option<&str>,
    ) -> EngramResult<CheckpointOutcome> {
        self.require_handoff()?;
        self.authenticate_handoff(
            token,
            request.user_id,
            Some(request.agent_id),
            Capability::WriteHandoff,
        )?;
        self.handoff.auto_checkpoint(request)
    }

    /// Close a lane and stamp the session's final status.
    pub fn finalize_lane(
        &self,
        user_id: &str,
        agent_id: &str,
        lane_id: LaneId,
        status: HandoffStatus,
        payload: Option<serde_json::Value>,
        token: Option<&str>,
    ) -> EngramResult<HandoffLane> {
        self.require_handoff()?;
        self.authenticate_handoff(token, user_id, Some(agent_id), Capability::WriteHandoff)?;
        self.handoff
            .finalize_lane(user_id, agent_id, lane_id, status, payload)
    }

    /// Lanes of a user, newest activity first.
    pub fn list_handoff_lanes(
        &self,
        user_id: &str,
        repo: Option<&str>,
        statuses: Option<&[LaneStatus]>,
        limit: usize,
        token: Option<&str>,
        requester_agent_id: Option<&str>,
    ) -> EngramResult<Vec<HandoffLane>> {
        self.require_handoff()?;
        self.authenticate_handoff(token, user_id, requester_agent_id, Capability::ReadHandoff)?;
        self.handoff.list_lanes(user_id, repo, statuses, limit)
    }

    fn require_handoff(&self) -> EngramResult<()> {
        if self.config.handoff.enabled {
            Ok(())
        } else {
            Err(ValidationError::InvalidValue {
                field: "handoff".to_string(),
                reason: "handoff is disabled".to_string(),
            }
            .into())
        }
    }

    fn authenticate_handoff(
        &self,
        token: Option<&str>,
        user_id: &str,
        agent_id: Option<&str>,
        capability: Capability,
    ) -> EngramResult<()> {
        if token.is_some() || agent_id.is_some() {
            self.gateway.authenticate(
                token,
                Some(user_id),
                agent_id,
                agent_id.is_some(),
                &[capability],
            )?;
        }
        Ok(())
    }
}

fn build_provenance(request: &ProposeWriteRequest) -> Provenance {
    let mut provenance = Provenance::new(
        request.source_type.clone().unwrap_or_else(|| "mcp".to_string()),
        "propose_write",
    );
    if let Some(source_app) = &request.source_app {
        provenance = provenance.with_source_app(source_app.clone());
    }
    if let Some(source_event_id) = &request.source_event_id {
        provenance = provenance.with_source_event_id(source_event_id.clone());
    }
    if let Some(agent_id) = &request.agent_id {
        provenance = provenance.with_agent_id(agent_id.clone());
    }
    provenance
}

pub(crate) fn day_bounds(
    date: chrono::NaiveDate,
) -> (engram_core::Timestamp, engram_core::Timestamp) {
    let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    let end = date
        .and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_default()
        .and_utc();
    (start, end)
}
