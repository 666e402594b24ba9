//! Core entity structures

use crate::{
    Capability, ChangeId, ChangeOp, CharacterRole, CheckpointId, CommitId, CommitStatus,
    ConfidentialityScope, DigestId, EchoDepth, EmbeddingVector, EngramIdType, EntityNodeId,
    EventId, HandoffSessionId, HandoffStatus, LaneId, LaneStatus, MemoryEventKind, MemoryId,
    MemoryKind, MemoryTier, NamespaceId, PermissionId, RefType, SceneId, SessionId,
    SharingScope, StashId, StashResolution, Timestamp, ViewId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default namespace name used when the caller provides none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Wildcard token accepted in policy grants and session namespace lists.
pub const WILDCARD: &str = "*";

/// Normalize a namespace value: trimmed, `default` when empty.
pub fn normalize_namespace(value: Option<&str>) -> String {
    let ns = value.unwrap_or(DEFAULT_NAMESPACE).trim();
    if ns.is_empty() {
        DEFAULT_NAMESPACE.to_string()
    } else {
        ns.to_string()
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// Multi-timescale strength traces (fast / mid / slow).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MemoryTraces {
    pub s_fast: f64,
    pub s_mid: f64,
    pub s_slow: f64,
    /// Weighted combination of the three traces, kept in sync by the decay
    /// engine.
    pub effective: f64,
}

/// Echo encoding attached to a memory at apply time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoMetadata {
    pub depth: EchoDepth,
    pub paraphrases: Vec<String>,
    pub keywords: Vec<String>,
    pub implications: Vec<String>,
    pub questions: Vec<String>,
    pub question_form: Option<String>,
    pub category: Option<String>,
    pub importance: f64,
}

/// A single memory record - the unit of retention, decay, and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: MemoryId,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
    pub app_id: Option<String>,
    pub content: String,
    pub tier: MemoryTier,
    /// Retention strength in [0, 1]; 0 together with `tombstoned` is terminal.
    pub strength: f64,
    pub traces: Option<MemoryTraces>,
    pub access_count: i64,
    pub last_accessed: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub namespace: String,
    pub confidentiality_scope: ConfidentialityScope,
    pub memory_kind: Option<MemoryKind>,
    pub sharing_scope: SharingScope,
    pub immutable: bool,
    pub expiration_date: Option<NaiveDate>,
    pub source_type: Option<String>,
    pub source_app: Option<String>,
    /// Idempotency key: (source_event_id, namespace, source_app) is unique.
    pub source_event_id: Option<String>,
    pub categories: Vec<String>,
    pub echo: Option<EchoMetadata>,
    pub scene_id: Option<SceneId>,
    /// Opaque host-supplied metadata; never interpreted by the kernel.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub tombstoned: bool,
}

impl MemoryRecord {
    /// Create a new SML memory with full strength, owned by `user_id`.
    pub fn new(user_id: impl Into<String>, content: impl Into<String>, now: Timestamp) -> Self {
        Self {
            memory_id: MemoryId::new_v4(),
            user_id: user_id.into(),
            agent_id: None,
            run_id: None,
            app_id: None,
            content: content.into(),
            tier: MemoryTier::Sml,
            strength: 1.0,
            traces: None,
            access_count: 0,
            last_accessed: now,
            created_at: now,
            updated_at: now,
            namespace: DEFAULT_NAMESPACE.to_string(),
            confidentiality_scope: ConfidentialityScope::Work,
            memory_kind: None,
            sharing_scope: SharingScope::Global,
            immutable: false,
            expiration_date: None,
            source_type: None,
            source_app: None,
            source_event_id: None,
            categories: Vec::new(),
            echo: None,
            scene_id: None,
            metadata: serde_json::Map::new(),
            tombstoned: false,
        }
    }

    /// Set the writing agent.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the confidentiality scope.
    pub fn with_scope(mut self, scope: ConfidentialityScope) -> Self {
        self.confidentiality_scope = scope;
        self
    }

    /// Set the initial strength.
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Importance assigned by echo encoding, 0 when never echoed.
    pub fn importance(&self) -> f64 {
        self.echo.as_ref().map(|e| e.importance).unwrap_or(0.0)
    }

    /// Check whether the expiration date has passed relative to `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date.map(|d| today > d).unwrap_or(false)
    }
}

/// One row in the memory event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub event_id: EventId,
    pub memory_id: MemoryId,
    pub kind: MemoryEventKind,
    pub old_strength: Option<f64>,
    pub new_strength: Option<f64>,
    pub old_tier: Option<MemoryTier>,
    pub new_tier: Option<MemoryTier>,
    pub created_at: Timestamp,
}

// ============================================================================
// EPISODIC
// ============================================================================

/// A character observed in an episodic view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Character {
    pub entity_id: String,
    pub role: CharacterRole,
}

/// Perception signals attached to a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSignals {
    pub importance: f64,
    pub sentiment: String,
}

impl Default for ViewSignals {
    fn default() -> Self {
        Self {
            importance: 0.5,
            sentiment: "neutral".to_string(),
        }
    }
}

/// A single ephemeral perception feeding scene grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub view_id: ViewId,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub timestamp: Timestamp,
    pub place_type: String,
    pub place_value: Option<String>,
    pub topic_label: String,
    /// Memory whose embedding serves as this view's topic embedding.
    pub topic_ref: Option<MemoryId>,
    pub characters: Vec<Character>,
    pub raw_text: String,
    pub signals: ViewSignals,
    pub scene_id: SceneId,
}

/// A temporally and topically coherent cluster of views and memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: SceneId,
    pub user_id: String,
    pub title: String,
    pub topic: String,
    pub summary: String,
    pub location: Option<String>,
    pub participants: Vec<String>,
    pub memory_ids: Vec<MemoryId>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Rolling mean over member topic embeddings.
    pub embedding: Option<EmbeddingVector>,
    pub scene_strength: f64,
    pub tier: MemoryTier,
    pub namespace: String,
    pub confidentiality_scope: ConfidentialityScope,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// STAGING
// ============================================================================

/// A single invariant contradiction found during proposal checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantConflict {
    pub key: String,
    pub existing: String,
    pub proposed: String,
}

/// Check results recorded on a proposal commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitChecks {
    pub invariants_ok: bool,
    pub conflicts: Vec<InvariantConflict>,
    pub risk_score: f64,
    pub duplicate_of: Option<MemoryId>,
    pub pii_risk: bool,
    pub apply_error: Option<String>,
    pub rollback_deleted: Option<i64>,
    pub rejection_reason: Option<String>,
}

impl Default for CommitChecks {
    fn default() -> Self {
        Self {
            invariants_ok: true,
            conflicts: Vec::new(),
            risk_score: 0.0,
            duplicate_of: None,
            pii_risk: false,
            apply_error: None,
            rollback_deleted: None,
            rejection_reason: None,
        }
    }
}

impl CommitChecks {
    /// Whether the checks force the commit into AUTO_STASHED.
    pub fn requires_stash(&self) -> bool {
        !self.conflicts.is_empty() || self.pii_risk
    }
}

/// Human-readable preview of a staged proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPreview {
    pub summary: String,
    pub scope: ConfidentialityScope,
    pub namespace: String,
    pub category_count: usize,
}

/// Provenance of a staged write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_type: String,
    pub source_app: Option<String>,
    pub source_event_id: Option<String>,
    pub tool: String,
    pub agent_id: Option<String>,
}

impl Provenance {
    pub fn new(source_type: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_app: None,
            source_event_id: None,
            tool: tool.into(),
            agent_id: None,
        }
    }

    pub fn with_source_app(mut self, source_app: impl Into<String>) -> Self {
        self.source_app = Some(source_app.into());
        self
    }

    pub fn with_source_event_id(mut self, source_event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(source_event_id.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Payload of a staged ADD/UPDATE change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePatch {
    pub content: String,
    pub categories: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub infer: bool,
    pub source_app: Option<String>,
    pub confidentiality_scope: ConfidentialityScope,
    pub namespace: String,
}

/// One staged change inside a proposal commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalChange {
    pub change_id: ChangeId,
    pub commit_id: CommitId,
    pub op: ChangeOp,
    pub target_id: Option<MemoryId>,
    pub patch: ChangePatch,
    pub created_at: Timestamp,
}

/// A staged proposal commit held in the approval state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalCommit {
    pub commit_id: CommitId,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub scope: ConfidentialityScope,
    pub status: CommitStatus,
    pub checks: CommitChecks,
    pub preview: CommitPreview,
    pub provenance: Provenance,
    pub changes: Vec<ProposalChange>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An unresolved invariant conflict awaiting a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictStash {
    pub stash_id: StashId,
    pub user_id: String,
    pub conflict_key: String,
    pub existing: String,
    pub proposed: String,
    pub resolution: StashResolution,
    pub source_commit_id: Option<CommitId>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

/// A single-valued identity attribute proposals may contradict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantRecord {
    pub user_id: String,
    pub key: String,
    pub value: String,
    pub category: String,
    pub confidence: f64,
    pub source_memory_id: Option<MemoryId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Per-agent proposal outcome counters driving auto-merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrust {
    pub user_id: String,
    pub agent_id: String,
    pub total_proposals: i64,
    pub approved_proposals: i64,
    pub rejected_proposals: i64,
    pub auto_stashed_proposals: i64,
    pub last_proposed_at: Option<Timestamp>,
    pub last_approved_at: Option<Timestamp>,
    pub trust_score: f64,
    pub updated_at: Timestamp,
}

impl AgentTrust {
    /// Fraction of proposals rejected; 1.0 when nothing was ever proposed.
    pub fn rejection_rate(&self) -> f64 {
        if self.total_proposals <= 0 {
            return 1.0;
        }
        self.rejected_proposals as f64 / self.total_proposals as f64
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// A capability session row. The plaintext token is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub token_hash: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub allowed_scopes: Vec<ConfidentialityScope>,
    pub capabilities: Vec<Capability>,
    /// Namespace names, possibly containing the `*` wildcard.
    pub namespaces: Vec<String>,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
}

impl SessionRecord {
    /// A session is valid iff not revoked and not expired.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }

    /// Check whether the session grants a capability.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Check whether the session allows a namespace.
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|ns| ns == WILDCARD || ns == namespace)
    }
}

/// Per-(user, agent) grant lists. Entries may contain the `*` wildcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPolicy {
    pub user_id: String,
    pub agent_id: String,
    pub allowed_scopes: Vec<String>,
    pub allowed_capabilities: Vec<String>,
    pub allowed_namespaces: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AgentPolicy {
    pub fn allows_scope(&self, scope: ConfidentialityScope) -> bool {
        self.allowed_scopes
            .iter()
            .any(|s| s == WILDCARD || s == scope.as_db_str())
    }

    pub fn allows_capability(&self, capability: Capability) -> bool {
        self.allowed_capabilities
            .iter()
            .any(|c| c == WILDCARD || c == capability.as_db_str())
    }

    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.allowed_namespaces
            .iter()
            .any(|ns| ns == WILDCARD || ns == namespace)
    }
}

/// A declared namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub namespace_id: NamespaceId,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A capability grant on a namespace for one agent. Namespace capabilities
/// are coarse read/write verbs, not the session capability set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespacePermission {
    pub permission_id: PermissionId,
    pub namespace_id: NamespaceId,
    pub user_id: String,
    pub agent_id: String,
    pub capability: String,
    pub granted_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

// ============================================================================
// RETENTION
// ============================================================================

/// Aggregated reference counts protecting a memory from forgetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemoryRefCount {
    pub strong: i64,
    pub weak: i64,
}

/// One subscriber holding a reference on a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySubscriber {
    pub memory_id: MemoryId,
    pub subscriber: String,
    pub ref_type: RefType,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

// ============================================================================
// DIGESTS
// ============================================================================

/// Compact reference to a pending commit in a daily digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestCommitEntry {
    pub commit_id: CommitId,
    pub status: CommitStatus,
    pub summary: String,
    pub created_at: Timestamp,
}

/// One scene highlighted in a daily digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneHighlight {
    pub scene_id: SceneId,
    pub summary: String,
    pub topic: String,
    pub start_time: Timestamp,
    pub memory_count: usize,
}

/// Digest content for one (user, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DigestPayload {
    pub top_conflicts: Vec<ConflictStash>,
    pub top_proposed_consolidations: Vec<DigestCommitEntry>,
    pub scene_highlights: Vec<SceneHighlight>,
}

/// Stored daily digest row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDigest {
    pub digest_id: DigestId,
    pub user_id: String,
    pub digest_date: NaiveDate,
    pub payload: DigestPayload,
    pub generated_at: Timestamp,
}

// ============================================================================
// HANDOFF
// ============================================================================

/// Durable continuity bundle for one agent working a repo/task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffSession {
    pub session_id: HandoffSessionId,
    pub user_id: String,
    pub agent_id: String,
    pub repo: Option<String>,
    pub status: HandoffStatus,
    pub task_summary: Option<String>,
    pub decisions: Vec<String>,
    pub files_touched: Vec<String>,
    pub todos: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A communication lane between agents inside a handoff scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffLane {
    pub lane_id: LaneId,
    pub session_id: Option<HandoffSessionId>,
    pub user_id: String,
    pub from_agent: Option<String>,
    pub to_agent: Option<String>,
    pub lane_type: String,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub namespace: String,
    pub objective: Option<String>,
    pub status: LaneStatus,
    /// Monotonic version for optimistic checkpoint appends.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Append-only snapshot of agent state within a lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffCheckpoint {
    pub checkpoint_id: CheckpointId,
    pub lane_id: LaneId,
    pub session_id: Option<HandoffSessionId>,
    pub agent_id: String,
    pub event_type: String,
    pub snapshot: serde_json::Value,
    pub created_at: Timestamp,
}

// ============================================================================
// KNOWLEDGE GRAPH
// ============================================================================

/// A named entity extracted from memory content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub entity_id: EntityNodeId,
    pub user_id: String,
    pub name: String,
    pub kind: String,
    pub aliases: Vec<String>,
    pub created_at: Timestamp,
}

/// An edge between a memory and an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLink {
    pub entity_id: EntityNodeId,
    pub memory_id: MemoryId,
    pub link_type: String,
    pub weight: f64,
    pub created_at: Timestamp,
}

// ============================================================================
// CATEGORIES
// ============================================================================

/// A node in the hierarchical category graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub category_id: crate::CategoryId,
    pub name: String,
    pub parent: Option<crate::CategoryId>,
    pub keywords: Vec<String>,
    pub strength: f64,
    pub memory_count: i64,
    pub last_accessed: Option<Timestamp>,
    pub summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_memory_builder_defaults() {
        let mem = MemoryRecord::new("u1", "likes rust", Utc::now())
            .with_agent("a1")
            .with_namespace("work-ns")
            .with_strength(1.7);
        assert_eq!(mem.tier, MemoryTier::Sml);
        assert_eq!(mem.strength, 1.0);
        assert_eq!(mem.namespace, "work-ns");
        assert_eq!(mem.agent_id.as_deref(), Some("a1"));
        assert!(!mem.tombstoned);
    }

    #[test]
    fn test_checks_requires_stash() {
        let mut checks = CommitChecks::default();
        assert!(!checks.requires_stash());
        checks.pii_risk = true;
        assert!(checks.requires_stash());
        checks.pii_risk = false;
        checks.conflicts.push(InvariantConflict {
            key: "identity.name".to_string(),
            existing: "Alice".to_string(),
            proposed: "Bob".to_string(),
        });
        assert!(checks.requires_stash());
    }

    #[test]
    fn test_session_validity() {
        let now = Utc::now();
        let mut session = SessionRecord {
            session_id: SessionId::new_v4(),
            token_hash: "abc".to_string(),
            user_id: "u1".to_string(),
            agent_id: None,
            allowed_scopes: vec![ConfidentialityScope::Work],
            capabilities: vec![Capability::Search],
            namespaces: vec!["default".to_string()],
            expires_at: now + chrono::Duration::minutes(5),
            created_at: now,
            revoked_at: None,
        };
        assert!(session.is_valid_at(now));
        assert!(!session.is_valid_at(now + chrono::Duration::minutes(6)));
        session.revoked_at = Some(now);
        assert!(!session.is_valid_at(now));
    }

    #[test]
    fn test_policy_wildcards() {
        let now = Utc::now();
        let policy = AgentPolicy {
            user_id: "u1".to_string(),
            agent_id: "a1".to_string(),
            allowed_scopes: vec!["*".to_string()],
            allowed_capabilities: vec!["search".to_string()],
            allowed_namespaces: vec!["default".to_string()],
            created_at: now,
            updated_at: now,
        };
        assert!(policy.allows_scope(ConfidentialityScope::Private));
        assert!(policy.allows_capability(Capability::Search));
        assert!(!policy.allows_capability(Capability::WriteHandoff));
        assert!(!policy.allows_namespace("secret"));
    }

    #[test]
    fn test_namespace_normalization() {
        assert_eq!(normalize_namespace(None), "default");
        assert_eq!(normalize_namespace(Some("  ")), "default");
        assert_eq!(normalize_namespace(Some(" work ")), "work");
    }

    #[test]
    fn test_trust_rejection_rate() {
        let now = Utc::now();
        let trust = AgentTrust {
            user_id: "u1".to_string(),
            agent_id: "a1".to_string(),
            total_proposals: 10,
            approved_proposals: 8,
            rejected_proposals: 2,
            auto_stashed_proposals: 0,
            last_proposed_at: Some(now),
            last_approved_at: Some(now),
            trust_score: 0.8,
            updated_at: now,
        };
        assert!((trust.rejection_rate() - 0.2).abs() < f64::EPSILON);
    }
}
