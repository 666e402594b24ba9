//! Facade request and response types

use engram_core::{
    CommitChecks, CommitId, CommitPreview, CommitStatus, ConfidentialityScope, MemoryId,
    MemoryTier, QueryIntent, SceneId, SharingScope, StashId, StashResolution, Timestamp,
};
use engram_policy::MaskedItem;
use serde::{Deserialize, Serialize};

// ============================================================================
// SEARCH
// ============================================================================

/// Inputs for `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub token: Option<String>,
    pub limit: usize,
    pub categories: Vec<String>,
    pub agent_category: Option<String>,
    pub connector_ids: Vec<String>,
    pub scope_filter: Vec<SharingScope>,
    /// Enable BM25-style keyword blending.
    pub keyword_search: Option<bool>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            limit: 10,
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One visible search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: MemoryId,
    pub memory: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub categories: Vec<String>,
    pub namespace: String,
    pub confidentiality_scope: ConfidentialityScope,
    pub sharing_scope: SharingScope,
    pub tier: MemoryTier,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub score: f64,
    pub keyword_score: f64,
    pub strength: f64,
    pub access_count: i64,
    pub composite_score: f64,
    pub echo_boost: f64,
    pub category_boost: f64,
    pub graph_boost: f64,
    pub masked: bool,
}

/// A search result entry: the memory, or its masked shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchEntry {
    Hit(Box<MemoryHit>),
    Masked(MaskedItem),
}

impl SearchEntry {
    pub fn is_masked(&self) -> bool {
        matches!(self, SearchEntry::Masked(_))
    }

    pub fn composite_score(&self) -> f64 {
        match self {
            SearchEntry::Hit(hit) => hit.composite_score,
            SearchEntry::Masked(_) => 0.0,
        }
    }
}

/// Counters describing what masking removed from view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MaskingStats {
    pub masked_count: usize,
    pub total_candidates: usize,
}

/// Rough token accounting for the context packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub estimated_tokens: usize,
    pub budget: usize,
}

/// A snippet included in the context packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: MemoryId,
    pub text: String,
}

/// Assembly-ready context handed back with search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPacket {
    pub query: String,
    pub snippets: Vec<Snippet>,
    pub token_usage: TokenUsage,
    pub masking: MaskingStats,
}

/// A scene hit surfaced next to memory results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSummary {
    pub id: SceneId,
    pub title: String,
    pub topic: String,
    pub summary: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub participants: Vec<String>,
    pub memory_count: usize,
    pub score: f64,
    pub masked: bool,
}

/// A scene result entry: visible or masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SceneEntry {
    Scene(SceneSummary),
    Masked(MaskedItem),
}

impl SceneEntry {
    pub fn is_masked(&self) -> bool {
        matches!(self, SceneEntry::Masked(_))
    }
}

/// Response of `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchEntry>,
    pub count: usize,
    pub intent: QueryIntent,
    pub context_packet: ContextPacket,
    pub scene_hits: Vec<SceneEntry>,
    /// Set when the embedder was unavailable and results degraded.
    pub diagnostic: Option<String>,
}

/// Response of `search_scenes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSearchResponse {
    pub scenes: Vec<SceneEntry>,
    pub count: usize,
}

// ============================================================================
// WRITES
// ============================================================================

/// Write mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Staging,
    Direct,
}

/// Inputs for `propose_write`.
#[derive(Debug, Clone, Default)]
pub struct ProposeWriteRequest {
    pub content: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub token: Option<String>,
    pub categories: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub scope: Option<ConfidentialityScope>,
    pub namespace: Option<String>,
    pub mode: WriteMode,
    pub infer: bool,
    pub source_type: Option<String>,
    pub source_app: Option<String>,
    pub source_event_id: Option<String>,
    /// Host-level assertion that the caller is a trusted local client.
    pub trusted_direct: bool,
}

impl ProposeWriteRequest {
    pub fn new(content: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_scope(mut self, scope: ConfidentialityScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_source_event(mut self, source_event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(source_event_id.into());
        self
    }
}

/// What happened to one written memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteEvent {
    /// A fresh memory was created
    Add,
    /// The write superseded an existing memory
    Update,
    /// The content was already covered; the existing memory was boosted
    Noop,
    /// The idempotency key matched an identical prior write
    Existing,
}

/// One applied write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedWrite {
    pub id: MemoryId,
    pub event: WriteEvent,
    pub tier: MemoryTier,
    pub strength: f64,
    pub vector_nodes: usize,
}

/// Result of a direct (non-staged) write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectWriteResult {
    pub results: Vec<AppliedWrite>,
    pub created_ids: Vec<MemoryId>,
    pub idempotent: bool,
}

/// Response of `propose_write`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProposeWriteResponse {
    Staging {
        commit_id: CommitId,
        status: CommitStatus,
        checks: CommitChecks,
        preview: CommitPreview,
        auto_merged: bool,
    },
    Direct {
        result: DirectWriteResult,
    },
}

/// Response of `approve_commit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub commit_id: CommitId,
    pub status: CommitStatus,
    pub applied: Vec<AppliedWrite>,
}

/// Response of `reject_commit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectResponse {
    pub commit_id: CommitId,
    pub status: CommitStatus,
    pub reason: Option<String>,
}

/// Response of `resolve_conflict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConflictResponse {
    pub stash_id: StashId,
    pub resolution: StashResolution,
}

// ============================================================================
// SLEEP CYCLE
// ============================================================================

/// Per-user counters from one sleep cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserSleepStats {
    pub promoted: usize,
    pub digests_upserted: usize,
    pub scenes_considered: usize,
    pub views_ingested: usize,
    pub decayed: usize,
    pub forgotten: usize,
    pub decay_promoted: usize,
    pub trace_cascades: usize,
}

/// Response of `run_sleep_cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepCycleReport {
    pub date: chrono::NaiveDate,
    pub users: std::collections::BTreeMap<String, UserSleepStats>,
    pub stale_refs_removed: usize,
}

/// Options for `run_sleep_cycle`.
#[derive(Debug, Clone, Default)]
pub struct SleepCycleRequest {
    pub user_id: Option<String>,
    pub date: Option<chrono::NaiveDate>,
    pub apply_decay: bool,
    pub cleanup_stale_refs: bool,
    pub deep_sleep: bool,
    pub token: Option<String>,
    pub agent_id: Option<String>,
}

impl SleepCycleRequest {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            apply_decay: true,
            cleanup_stale_refs: true,
            deep_sleep: true,
            ..Self::default()
        }
    }
}
