//! Enum types for Engram entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// MEMORY ENUMS
// ============================================================================

/// Memory layer: short-lived (fast decay) or long-lived (slow decay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    /// Short memory layer - new memories land here and decay quickly
    #[default]
    Sml,
    /// Long memory layer - promoted memories decay slowly
    Lml,
}

impl MemoryTier {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemoryTier::Sml => "sml",
            MemoryTier::Lml => "lml",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "sml" | "short" => Ok(MemoryTier::Sml),
            "lml" | "long" => Ok(MemoryTier::Lml),
            _ => Err(format!("Invalid MemoryTier: {}", s)),
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MemoryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Confidentiality scope controlling result masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidentialityScope {
    #[default]
    Work,
    Personal,
    Finance,
    Health,
    Private,
}

impl ConfidentialityScope {
    /// All scopes, in canonical order.
    pub const ALL: [ConfidentialityScope; 5] = [
        ConfidentialityScope::Work,
        ConfidentialityScope::Personal,
        ConfidentialityScope::Finance,
        ConfidentialityScope::Health,
        ConfidentialityScope::Private,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConfidentialityScope::Work => "work",
            ConfidentialityScope::Personal => "personal",
            ConfidentialityScope::Finance => "finance",
            ConfidentialityScope::Health => "health",
            ConfidentialityScope::Private => "private",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "work" => Ok(ConfidentialityScope::Work),
            "personal" => Ok(ConfidentialityScope::Personal),
            "finance" => Ok(ConfidentialityScope::Finance),
            "health" => Ok(ConfidentialityScope::Health),
            "private" => Ok(ConfidentialityScope::Private),
            _ => Err(format!("Invalid ConfidentialityScope: {}", s)),
        }
    }
}

impl fmt::Display for ConfidentialityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ConfidentialityScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Episodic/semantic discriminator for a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Episodic,
    Semantic,
}

impl MemoryKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "episodic" => Ok(MemoryKind::Episodic),
            "semantic" => Ok(MemoryKind::Semantic),
            _ => Err(format!("Invalid MemoryKind: {}", s)),
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Sharing scope deciding which agents may read a memory and its re-rank
/// weight at retrieval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SharingScope {
    /// Visible only to the writing agent
    Agent,
    /// Visible to agents sharing the connector
    Connector,
    /// Visible to agents in the same category
    Category,
    /// Visible to every agent of the user
    #[default]
    Global,
}

impl SharingScope {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SharingScope::Agent => "agent",
            SharingScope::Connector => "connector",
            SharingScope::Category => "category",
            SharingScope::Global => "global",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "agent" => Ok(SharingScope::Agent),
            "connector" => Ok(SharingScope::Connector),
            "category" => Ok(SharingScope::Category),
            "global" => Ok(SharingScope::Global),
            _ => Err(format!("Invalid SharingScope: {}", s)),
        }
    }
}

impl fmt::Display for SharingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SharingScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// STAGING ENUMS
// ============================================================================

/// Status of a staged proposal commit.
///
/// ```text
/// PENDING ──┬─ approve ─→ APPLYING ──┬─ ok ──→ APPROVED (terminal)
///           │                        └─ err ─→ PENDING (with apply_error)
///           └─ reject ──→ REJECTED (terminal)
/// AUTO_STASHED follows the same approve/reject paths as PENDING.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitStatus {
    #[default]
    Pending,
    AutoStashed,
    Applying,
    Approved,
    Rejected,
}

impl CommitStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CommitStatus::Pending => "PENDING",
            CommitStatus::AutoStashed => "AUTO_STASHED",
            CommitStatus::Applying => "APPLYING",
            CommitStatus::Approved => "APPROVED",
            CommitStatus::Rejected => "REJECTED",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, CommitStatusParseError> {
        match normalize_token(s).as_str() {
            "pending" => Ok(CommitStatus::Pending),
            "autostashed" => Ok(CommitStatus::AutoStashed),
            "applying" => Ok(CommitStatus::Applying),
            "approved" => Ok(CommitStatus::Approved),
            "rejected" => Ok(CommitStatus::Rejected),
            _ => Err(CommitStatusParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommitStatus::Approved | CommitStatus::Rejected)
    }

    /// Check if an approve may start from this state.
    pub fn is_approvable(&self) -> bool {
        matches!(self, CommitStatus::Pending | CommitStatus::AutoStashed)
    }
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for CommitStatus {
    type Err = CommitStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid commit status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatusParseError(pub String);

impl fmt::Display for CommitStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid commit status: {}", self.0)
    }
}

impl std::error::Error for CommitStatusParseError {}

/// Operation carried by a staged change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Add,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ChangeOp::Add => "ADD",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "add" => Ok(ChangeOp::Add),
            "update" => Ok(ChangeOp::Update),
            "delete" => Ok(ChangeOp::Delete),
            _ => Err(format!("Invalid ChangeOp: {}", s)),
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ChangeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Resolution of a stashed invariant conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StashResolution {
    #[default]
    Unresolved,
    KeepExisting,
    AcceptProposed,
    KeepBoth,
}

impl StashResolution {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            StashResolution::Unresolved => "UNRESOLVED",
            StashResolution::KeepExisting => "KEEP_EXISTING",
            StashResolution::AcceptProposed => "ACCEPT_PROPOSED",
            StashResolution::KeepBoth => "KEEP_BOTH",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "unresolved" => Ok(StashResolution::Unresolved),
            "keepexisting" => Ok(StashResolution::KeepExisting),
            "acceptproposed" => Ok(StashResolution::AcceptProposed),
            "keepboth" => Ok(StashResolution::KeepBoth),
            _ => Err(format!("Invalid StashResolution: {}", s)),
        }
    }
}

impl fmt::Display for StashResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for StashResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Classification of a proposed write against its nearest existing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConflictClass {
    /// Both memories can coexist
    #[default]
    Compatible,
    /// The new content contradicts the existing memory
    Contradictory,
    /// The new content subsumes (replaces) the existing memory
    Subsumes,
    /// The new content is already covered by the existing memory
    Subsumed,
}

impl ConflictClass {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConflictClass::Compatible => "COMPATIBLE",
            ConflictClass::Contradictory => "CONTRADICTORY",
            ConflictClass::Subsumes => "SUBSUMES",
            ConflictClass::Subsumed => "SUBSUMED",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "compatible" => Ok(ConflictClass::Compatible),
            "contradictory" => Ok(ConflictClass::Contradictory),
            "subsumes" => Ok(ConflictClass::Subsumes),
            "subsumed" => Ok(ConflictClass::Subsumed),
            _ => Err(format!("Invalid ConflictClass: {}", s)),
        }
    }
}

impl fmt::Display for ConflictClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ConflictClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// ENCODING ENUMS
// ============================================================================

/// Echo processing depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoDepth {
    /// Keywords only - no LLM call
    Shallow,
    /// Keywords + paraphrases
    Medium,
    /// Full multi-modal echo (implications, questions)
    Deep,
}

impl EchoDepth {
    /// Strength multiplier applied to a memory encoded at this depth.
    pub fn strength_multiplier(&self) -> f64 {
        match self {
            EchoDepth::Shallow => 1.0,
            EchoDepth::Medium => 1.3,
            EchoDepth::Deep => 1.6,
        }
    }

    /// One level deeper, saturating at Deep.
    pub fn deeper(&self) -> EchoDepth {
        match self {
            EchoDepth::Shallow => EchoDepth::Medium,
            EchoDepth::Medium | EchoDepth::Deep => EchoDepth::Deep,
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            EchoDepth::Shallow => "shallow",
            EchoDepth::Medium => "medium",
            EchoDepth::Deep => "deep",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "shallow" => Ok(EchoDepth::Shallow),
            "medium" => Ok(EchoDepth::Medium),
            "deep" => Ok(EchoDepth::Deep),
            _ => Err(format!("Invalid EchoDepth: {}", s)),
        }
    }
}

impl fmt::Display for EchoDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for EchoDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Classified retrieval intent of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    /// Event/time-based query ("when did", "last time")
    Episodic,
    /// Fact/knowledge-based query ("what is", "prefer")
    Semantic,
    /// Ambiguous or both signals
    #[default]
    Mixed,
}

impl QueryIntent {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            QueryIntent::Episodic => "episodic",
            QueryIntent::Semantic => "semantic",
            QueryIntent::Mixed => "mixed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "episodic" => Ok(QueryIntent::Episodic),
            "semantic" => Ok(QueryIntent::Semantic),
            "mixed" => Ok(QueryIntent::Mixed),
            _ => Err(format!("Invalid QueryIntent: {}", s)),
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for QueryIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// POLICY ENUMS
// ============================================================================

/// Capabilities grantable to a session (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Search,
    ReadScene,
    ProposeWrite,
    ReviewCommits,
    ResolveConflicts,
    ReadDigest,
    ReadTrust,
    RunSleepCycle,
    ManageNamespaces,
    ReadHandoff,
    WriteHandoff,
}

impl Capability {
    /// Default capability set granted when a session requests none.
    pub const DEFAULTS: [Capability; 4] = [
        Capability::Search,
        Capability::ReadScene,
        Capability::ProposeWrite,
        Capability::ReadDigest,
    ];

    /// Capabilities that require an explicit agent policy.
    pub const HANDOFF: [Capability; 2] = [Capability::ReadHandoff, Capability::WriteHandoff];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            Capability::Search => "search",
            Capability::ReadScene => "read_scene",
            Capability::ProposeWrite => "propose_write",
            Capability::ReviewCommits => "review_commits",
            Capability::ResolveConflicts => "resolve_conflicts",
            Capability::ReadDigest => "read_digest",
            Capability::ReadTrust => "read_trust",
            Capability::RunSleepCycle => "run_sleep_cycle",
            Capability::ManageNamespaces => "manage_namespaces",
            Capability::ReadHandoff => "read_handoff",
            Capability::WriteHandoff => "write_handoff",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "search" => Ok(Capability::Search),
            "readscene" => Ok(Capability::ReadScene),
            "proposewrite" => Ok(Capability::ProposeWrite),
            "reviewcommits" => Ok(Capability::ReviewCommits),
            "resolveconflicts" => Ok(Capability::ResolveConflicts),
            "readdigest" => Ok(Capability::ReadDigest),
            "readtrust" => Ok(Capability::ReadTrust),
            "runsleepcycle" => Ok(Capability::RunSleepCycle),
            "managenamespaces" => Ok(Capability::ManageNamespaces),
            "readhandoff" => Ok(Capability::ReadHandoff),
            "writehandoff" => Ok(Capability::WriteHandoff),
            _ => Err(format!("Invalid Capability: {}", s)),
        }
    }

    /// Check whether this capability belongs to the handoff group.
    pub fn is_handoff(&self) -> bool {
        matches!(self, Capability::ReadHandoff | Capability::WriteHandoff)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Reference type held by a subscriber on a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    /// Protects the memory from forgetting entirely
    Strong,
    /// Slows forgetting multiplicatively
    Weak,
}

impl RefType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RefType::Strong => "strong",
            RefType::Weak => "weak",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "strong" => Ok(RefType::Strong),
            "weak" => Ok(RefType::Weak),
            _ => Err(format!("Invalid RefType: {}", s)),
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for RefType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// HANDOFF ENUMS
// ============================================================================

/// Status of a handoff session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandoffStatus {
    /// Session is live and receiving checkpoints
    #[default]
    Active,
    /// Session paused (idle gap or explicit pause)
    Paused,
    /// Session finished successfully
    Completed,
    /// Session abandoned without completion
    Abandoned,
}

impl HandoffStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            HandoffStatus::Active => "active",
            HandoffStatus::Paused => "paused",
            HandoffStatus::Completed => "completed",
            HandoffStatus::Abandoned => "abandoned",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, HandoffStatusParseError> {
        match normalize_token(s).as_str() {
            "active" => Ok(HandoffStatus::Active),
            "paused" => Ok(HandoffStatus::Paused),
            "completed" | "complete" => Ok(HandoffStatus::Completed),
            "abandoned" => Ok(HandoffStatus::Abandoned),
            _ => Err(HandoffStatusParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandoffStatus::Completed | HandoffStatus::Abandoned)
    }
}

impl fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for HandoffStatus {
    type Err = HandoffStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid handoff status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffStatusParseError(pub String);

impl fmt::Display for HandoffStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid handoff status: {}", self.0)
    }
}

impl std::error::Error for HandoffStatusParseError {}

/// Status of a handoff lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LaneStatus {
    #[default]
    Open,
    Closed,
}

impl LaneStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LaneStatus::Open => "open",
            LaneStatus::Closed => "closed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "open" => Ok(LaneStatus::Open),
            "closed" => Ok(LaneStatus::Closed),
            _ => Err(format!("Invalid LaneStatus: {}", s)),
        }
    }
}

impl fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for LaneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// EVENT ENUMS
// ============================================================================

/// Kind of mutation recorded in the memory event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryEventKind {
    Add,
    Update,
    Delete,
    Decay,
    Promote,
    Demote,
    Reecho,
    Forget,
}

impl MemoryEventKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemoryEventKind::Add => "ADD",
            MemoryEventKind::Update => "UPDATE",
            MemoryEventKind::Delete => "DELETE",
            MemoryEventKind::Decay => "DECAY",
            MemoryEventKind::Promote => "PROMOTE",
            MemoryEventKind::Demote => "DEMOTE",
            MemoryEventKind::Reecho => "REECHO",
            MemoryEventKind::Forget => "FORGET",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "add" => Ok(MemoryEventKind::Add),
            "update" => Ok(MemoryEventKind::Update),
            "delete" => Ok(MemoryEventKind::Delete),
            "decay" => Ok(MemoryEventKind::Decay),
            "promote" => Ok(MemoryEventKind::Promote),
            "demote" => Ok(MemoryEventKind::Demote),
            "reecho" => Ok(MemoryEventKind::Reecho),
            "forget" => Ok(MemoryEventKind::Forget),
            _ => Err(format!("Invalid MemoryEventKind: {}", s)),
        }
    }
}

impl fmt::Display for MemoryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MemoryEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Role of a character in an episodic view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterRole {
    /// The main character (actor/agent/self)
    Main,
    /// A supporting character (proper noun in content)
    Supporting,
}

impl CharacterRole {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CharacterRole::Main => "MC",
            CharacterRole::Supporting => "SC",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, String> {
        match normalize_token(s).as_str() {
            "mc" | "main" => Ok(CharacterRole::Main),
            "sc" | "supporting" => Ok(CharacterRole::Supporting),
            _ => Err(format!("Invalid CharacterRole: {}", s)),
        }
    }
}

impl fmt::Display for CharacterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for CharacterRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// STRING CONVERSIONS
// ============================================================================

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_status_roundtrip() {
        for status in [
            CommitStatus::Pending,
            CommitStatus::AutoStashed,
            CommitStatus::Applying,
            CommitStatus::Approved,
            CommitStatus::Rejected,
        ] {
            let parsed = CommitStatus::from_db_str(status.as_db_str()).unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_commit_status_terminality() {
        assert!(CommitStatus::Approved.is_terminal());
        assert!(CommitStatus::Rejected.is_terminal());
        assert!(!CommitStatus::Applying.is_terminal());
        assert!(CommitStatus::AutoStashed.is_approvable());
        assert!(!CommitStatus::Applying.is_approvable());
    }

    #[test]
    fn test_echo_depth_multiplier_and_deepening() {
        assert_eq!(EchoDepth::Shallow.strength_multiplier(), 1.0);
        assert_eq!(EchoDepth::Medium.strength_multiplier(), 1.3);
        assert_eq!(EchoDepth::Deep.strength_multiplier(), 1.6);
        assert_eq!(EchoDepth::Shallow.deeper(), EchoDepth::Medium);
        assert_eq!(EchoDepth::Deep.deeper(), EchoDepth::Deep);
    }

    #[test]
    fn test_capability_parsing_tolerates_separators() {
        assert_eq!(
            Capability::from_db_str("read_handoff").unwrap(),
            Capability::ReadHandoff
        );
        assert_eq!(
            Capability::from_db_str("Read-Handoff").unwrap(),
            Capability::ReadHandoff
        );
        assert!(Capability::from_db_str("teleport").is_err());
    }

    #[test]
    fn test_scope_roundtrip() {
        for scope in ConfidentialityScope::ALL {
            assert_eq!(
                ConfidentialityScope::from_db_str(scope.as_db_str()).unwrap(),
                scope
            );
        }
    }

    #[test]
    fn test_stash_resolution_accepts_db_form() {
        assert_eq!(
            StashResolution::from_db_str("ACCEPT_PROPOSED").unwrap(),
            StashResolution::AcceptProposed
        );
    }
}
