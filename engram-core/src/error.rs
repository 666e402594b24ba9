//! Error types for Engram operations

use crate::{CommitId, CommitStatus, MemoryId, SceneId, StashId};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StorageError {
    #[error("Memory not found: {id}")]
    MemoryNotFound { id: MemoryId },

    #[error("Scene not found: {id}")]
    SceneNotFound { id: SceneId },

    #[error("Commit not found: {id}")]
    CommitNotFound { id: CommitId },

    #[error("Conflict stash not found: {id}")]
    StashNotFound { id: StashId },

    #[error("Row not found in {table}: {key}")]
    RowNotFound { table: String, key: String },

    #[error("Insert failed in {table}: {reason}")]
    InsertFailed { table: String, reason: String },

    #[error("Update failed in {table}: {reason}")]
    UpdateFailed { table: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Migration {version} failed: {reason}")]
    MigrationFailed { version: String, reason: String },

    #[error("Database is busy: {reason}")]
    Busy { reason: String },

    #[error("Compare-and-set lost in {table} for {key}")]
    CasFailed { table: String, key: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Stored row in {table} failed to decode: {reason}")]
    Corrupt { table: String, reason: String },
}

/// Vector index errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector batch length mismatch: {vectors} vectors, {payloads} payloads, {ids} ids")]
    BatchLengthMismatch {
        vectors: usize,
        payloads: usize,
        ids: usize,
    },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Vector index operation failed: {reason}")]
    IndexFailed { reason: String },
}

/// Policy gateway errors. Every variant maps to a Permission failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyError {
    #[error("Capability token required for agent access")]
    TokenRequired,

    #[error("Invalid capability token")]
    InvalidToken,

    #[error("Session has been revoked")]
    SessionRevoked,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session user scope mismatch")]
    UserMismatch,

    #[error("Session agent scope mismatch")]
    AgentMismatch,

    #[error("Session missing required capability: {capability}")]
    MissingCapability { capability: String },

    #[error("Namespace access denied: {namespace}")]
    NamespaceDenied { namespace: String },

    #[error("Agent policy denies {what} for user={user_id} agent={agent_id}")]
    PolicyDenied {
        what: String,
        user_id: String,
        agent_id: String,
    },

    #[error("No agent policy configured for user={user_id} agent={agent_id}")]
    PolicyMissing { user_id: String, agent_id: String },

    #[error("Handoff capabilities require explicit agent policy for user={user_id} agent={agent_id}")]
    HandoffPolicyRequired { user_id: String, agent_id: String },

    #[error("Write quota exceeded ({window}): {count}/{limit} proposals in active window")]
    QuotaExceeded {
        window: String,
        count: i64,
        limit: i64,
    },

    #[error("Direct mode is allowed only for trusted local clients")]
    DirectModeDenied,
}

/// Staging pipeline errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StagingError {
    #[error("Commit {commit_id} not approvable from status {status}")]
    NotApprovable {
        commit_id: CommitId,
        status: CommitStatus,
    },

    #[error("Commit {commit_id} not rejectable from status {status}")]
    NotRejectable {
        commit_id: CommitId,
        status: CommitStatus,
    },

    #[error("Approved commits cannot be rejected: {commit_id}")]
    AlreadyApproved { commit_id: CommitId },

    #[error("Commit already rejected: {commit_id}")]
    AlreadyRejected { commit_id: CommitId },

    #[error("Commit apply failed for {commit_id}: {reason} ({rolled_back} rolled back)")]
    ApplyFailed {
        commit_id: CommitId,
        reason: String,
        rolled_back: i64,
    },

    #[error("Commit approval finalization failed: {commit_id}")]
    FinalizeFailed { commit_id: CommitId },

    #[error("source_event_id={source_event_id} already exists with different content")]
    IdempotencyConflict { source_event_id: String },

    #[error("Unsupported staged change: target={target}, op={op}")]
    UnsupportedChange { target: String, op: String },

    #[error("Invalid resolution: {value}")]
    InvalidResolution { value: String },
}

/// External provider (embedder / LLM) errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Embedding failed: {reason}")]
    EmbeddingFailed { reason: String },

    #[error("LLM generation failed: {reason}")]
    GenerationFailed { reason: String },

    #[error("Provider response failed to parse: {reason}")]
    InvalidResponse { reason: String },

    #[error("Provider unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration constraint violated: {constraint}")]
    ConfigConstraint { constraint: String },
}

/// Master error type for all Engram errors.
#[derive(Debug, Clone, Error)]
pub enum EngramError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Permission error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngramError {
    /// Stable machine-readable error code exposed to callers.
    pub fn code(&self) -> &'static str {
        match self {
            EngramError::Storage(
                StorageError::MemoryNotFound { .. }
                | StorageError::SceneNotFound { .. }
                | StorageError::CommitNotFound { .. }
                | StorageError::StashNotFound { .. }
                | StorageError::RowNotFound { .. },
            ) => "not_found",
            EngramError::Storage(StorageError::Busy { .. }) => "unavailable",
            EngramError::Storage(StorageError::CasFailed { .. }) => "conflict",
            EngramError::Storage(StorageError::Corrupt { .. }) => "corruption",
            EngramError::Storage(_) => "storage",
            EngramError::Vector(_) => "vector",
            EngramError::Policy(PolicyError::QuotaExceeded { .. }) => "rate_limited",
            EngramError::Policy(_) => "permission",
            EngramError::Staging(StagingError::IdempotencyConflict { .. }) => "conflict",
            EngramError::Staging(
                StagingError::NotApprovable { .. }
                | StagingError::NotRejectable { .. }
                | StagingError::AlreadyApproved { .. }
                | StagingError::AlreadyRejected { .. }
                | StagingError::FinalizeFailed { .. },
            ) => "conflict",
            EngramError::Staging(_) => "staging",
            EngramError::Provider(_) => "unavailable",
            EngramError::Validation(_) => "validation",
            EngramError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for Engram operations.
pub type EngramResult<T> = Result<T, EngramError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EngramIdType;

    #[test]
    fn test_error_codes() {
        let err: EngramError = PolicyError::SessionExpired.into();
        assert_eq!(err.code(), "permission");

        let err: EngramError = PolicyError::QuotaExceeded {
            window: "per-user hourly".to_string(),
            count: 10,
            limit: 10,
        }
        .into();
        assert_eq!(err.code(), "rate_limited");

        let err: EngramError = StorageError::MemoryNotFound {
            id: MemoryId::nil(),
        }
        .into();
        assert_eq!(err.code(), "not_found");

        let err: EngramError = StagingError::IdempotencyConflict {
            source_event_id: "evt-1".to_string(),
        }
        .into();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_error_messages_are_structured() {
        let err = PolicyError::MissingCapability {
            capability: "search".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Session missing required capability: search"
        );
    }
}
