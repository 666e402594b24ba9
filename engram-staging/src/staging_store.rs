//! Staging storage for untrusted agent writes

use chrono::Utc;
use engram_core::{
    ChangeId, ChangeOp, ChangePatch, CommitChecks, CommitId, CommitPreview, CommitStatus,
    ConfidentialityScope, ConflictStash, EngramIdType, EngramResult, InvariantConflict,
    ProposalChange, ProposalCommit, Provenance, StagingError, StashId, StashResolution,
    StorageError,
};
use engram_storage::{CommitFilter, Store};
use std::sync::Arc;
use tracing::{info, warn};

/// Commit lifecycle operations over the durable store.
///
/// Every status transition goes through the store's compare-and-set UPDATE;
/// this type adds the status-specific error reporting on CAS misses.
pub struct StagingStore {
    store: Arc<Store>,
}

impl StagingStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create a commit holding a single ADD change.
    ///
    /// The initial status is PENDING unless the checks carry conflicts or
    /// PII risk, which force AUTO_STASHED.
    #[allow(clippy::too_many_arguments)]
    pub fn create_add_commit(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        scope: ConfidentialityScope,
        patch: ChangePatch,
        checks: CommitChecks,
        provenance: Provenance,
    ) -> EngramResult<ProposalCommit> {
        let now = Utc::now();
        let commit_id = CommitId::new_v4();
        let status = if checks.requires_stash() {
            CommitStatus::AutoStashed
        } else {
            CommitStatus::Pending
        };
        let preview = CommitPreview {
            summary: patch.content.chars().take(140).collect(),
            scope,
            namespace: patch.namespace.clone(),
            category_count: patch.categories.len(),
        };

        let commit = ProposalCommit {
            commit_id,
            user_id: user_id.to_string(),
            agent_id: agent_id.map(str::to_string),
            scope,
            status,
            checks,
            preview,
            provenance,
            changes: vec![ProposalChange {
                change_id: ChangeId::new_v4(),
                commit_id,
                op: ChangeOp::Add,
                target_id: None,
                patch,
                created_at: now,
            }],
            created_at: now,
            updated_at: now,
        };
        self.store.add_proposal_commit(&commit)?;
        self.store
            .record_agent_proposal(user_id, agent_id.unwrap_or("local"), status)?;
        info!(%commit_id, status = status.as_db_str(), "created staged commit");
        Ok(commit)
    }

    /// Fetch a commit or fail with NotFound.
    pub fn get_commit(&self, commit_id: CommitId) -> EngramResult<ProposalCommit> {
        self.store
            .get_proposal_commit(commit_id)?
            .ok_or_else(|| StorageError::CommitNotFound { id: commit_id }.into())
    }

    /// List commits, changes included.
    pub fn list_commits(
        &self,
        user_id: Option<&str>,
        status: Option<CommitStatus>,
        limit: usize,
    ) -> EngramResult<Vec<ProposalCommit>> {
        self.store.list_proposal_commits(&CommitFilter {
            user_id: user_id.map(str::to_string),
            status,
            limit: Some(limit),
        })
    }

    /// CAS PENDING|AUTO_STASHED → APPLYING. On a miss, reports the current
    /// status (already approved wins idempotently upstream).
    pub fn begin_apply(&self, commit_id: CommitId) -> EngramResult<()> {
        let moved = self.store.transition_commit_status(
            commit_id,
            &[CommitStatus::Pending, CommitStatus::AutoStashed],
            CommitStatus::Applying,
            None,
        )?;
        if moved {
            return Ok(());
        }
        let latest = self.get_commit(commit_id)?;
        Err(StagingError::NotApprovable {
            commit_id,
            status: latest.status,
        }
        .into())
    }

    /// CAS APPLYING → APPROVED after all changes applied.
    pub fn finish_apply(&self, commit_id: CommitId) -> EngramResult<()> {
        let moved = self.store.transition_commit_status(
            commit_id,
            &[CommitStatus::Applying],
            CommitStatus::Approved,
            None,
        )?;
        if moved {
            return Ok(());
        }
        Err(StagingError::FinalizeFailed { commit_id }.into())
    }

    /// CAS APPLYING → PENDING after an apply failure, capturing the error and
    /// rollback count into checks.
    pub fn fail_apply(
        &self,
        commit_id: CommitId,
        error: &str,
        rolled_back: i64,
    ) -> EngramResult<()> {
        let mut checks = self.get_commit(commit_id)?.checks;
        checks.apply_error = Some(error.to_string());
        checks.rollback_deleted = Some(rolled_back);
        let moved = self.store.transition_commit_status(
            commit_id,
            &[CommitStatus::Applying],
            CommitStatus::Pending,
            Some(&checks),
        )?;
        if !moved {
            warn!(%commit_id, "apply failure could not return commit to PENDING");
        }
        Ok(())
    }

    /// CAS {PENDING, AUTO_STASHED, APPLYING} → REJECTED.
    pub fn reject(&self, commit_id: CommitId, reason: Option<&str>) -> EngramResult<()> {
        let commit = self.get_commit(commit_id)?;
        match commit.status {
            CommitStatus::Rejected => return Ok(()),
            CommitStatus::Approved => {
                return Err(StagingError::AlreadyApproved { commit_id }.into());
            }
            _ => {}
        }

        let mut checks = commit.checks;
        if let Some(reason) = reason {
            checks.rejection_reason = Some(reason.to_string());
        }
        let moved = self.store.transition_commit_status(
            commit_id,
            &[
                CommitStatus::Pending,
                CommitStatus::AutoStashed,
                CommitStatus::Applying,
            ],
            CommitStatus::Rejected,
            Some(&checks),
        )?;
        if moved {
            return Ok(());
        }
        let latest = self.get_commit(commit_id)?;
        Err(StagingError::NotRejectable {
            commit_id,
            status: latest.status,
        }
        .into())
    }

    /// Stash each invariant conflict from a commit's checks.
    pub fn stash_conflicts(
        &self,
        user_id: &str,
        commit_id: CommitId,
        conflicts: &[InvariantConflict],
    ) -> EngramResult<Vec<StashId>> {
        let mut stash_ids = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            let stash = ConflictStash {
                stash_id: StashId::new_v4(),
                user_id: user_id.to_string(),
                conflict_key: conflict.key.clone(),
                existing: conflict.existing.clone(),
                proposed: conflict.proposed.clone(),
                resolution: StashResolution::Unresolved,
                source_commit_id: Some(commit_id),
                created_at: Utc::now(),
                resolved_at: None,
            };
            stash_ids.push(self.store.add_conflict_stash(&stash)?);
        }
        Ok(stash_ids)
    }

    /// Sweep commits stuck in APPLYING back to PENDING (startup recovery).
    pub fn recover_interrupted(&self) -> EngramResult<usize> {
        let stuck = self.store.list_applying_commits()?;
        let mut recovered = 0;
        for commit_id in stuck {
            let mut checks = self.get_commit(commit_id)?.checks;
            checks.apply_error = Some("interrupted".to_string());
            if self.store.transition_commit_status(
                commit_id,
                &[CommitStatus::Applying],
                CommitStatus::Pending,
                Some(&checks),
            )? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "recovered interrupted commits");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging() -> (Arc<Store>, StagingStore) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let staging = StagingStore::new(Arc::clone(&store));
        (store, staging)
    }

    fn add_patch(content: &str) -> ChangePatch {
        ChangePatch {
            content: content.to_string(),
            categories: Vec::new(),
            metadata: serde_json::Map::new(),
            infer: false,
            source_app: None,
            confidentiality_scope: ConfidentialityScope::Work,
            namespace: "default".to_string(),
        }
    }

    fn create(staging: &StagingStore, checks: CommitChecks) -> ProposalCommit {
        staging
            .create_add_commit(
                "u1",
                Some("a1"),
                ConfidentialityScope::Work,
                add_patch("some content"),
                checks,
                Provenance::new("mcp", "propose_write"),
            )
            .unwrap()
    }

    #[test]
    fn test_clean_checks_create_pending() {
        let (_, staging) = staging();
        let commit = create(&staging, CommitChecks::default());
        assert_eq!(commit.status, CommitStatus::Pending);
        assert_eq!(commit.preview.summary, "some content");
    }

    #[test]
    fn test_risky_checks_create_auto_stashed() {
        let (_, staging) = staging();
        let mut checks = CommitChecks::default();
        checks.pii_risk = true;
        let commit = create(&staging, checks);
        assert_eq!(commit.status, CommitStatus::AutoStashed);
    }

    #[test]
    fn test_apply_lifecycle() {
        let (_, staging) = staging();
        let commit = create(&staging, CommitChecks::default());

        staging.begin_apply(commit.commit_id).unwrap();
        // Second apply attempt loses the CAS and reports the live status.
        let err = staging.begin_apply(commit.commit_id).unwrap_err();
        assert_eq!(err.code(), "conflict");

        staging.finish_apply(commit.commit_id).unwrap();
        let approved = staging.get_commit(commit.commit_id).unwrap();
        assert_eq!(approved.status, CommitStatus::Approved);
    }

    #[test]
    fn test_failed_apply_returns_to_pending_with_error() {
        let (_, staging) = staging();
        let commit = create(&staging, CommitChecks::default());
        staging.begin_apply(commit.commit_id).unwrap();
        staging
            .fail_apply(commit.commit_id, "embedder unavailable", 2)
            .unwrap();

        let restored = staging.get_commit(commit.commit_id).unwrap();
        assert_eq!(restored.status, CommitStatus::Pending);
        assert_eq!(
            restored.checks.apply_error.as_deref(),
            Some("embedder unavailable")
        );
        assert_eq!(restored.checks.rollback_deleted, Some(2));
    }

    #[test]
    fn test_reject_records_reason_and_is_idempotent() {
        let (_, staging) = staging();
        let commit = create(&staging, CommitChecks::default());

        staging.reject(commit.commit_id, Some("off-topic")).unwrap();
        let rejected = staging.get_commit(commit.commit_id).unwrap();
        assert_eq!(rejected.status, CommitStatus::Rejected);
        assert_eq!(
            rejected.checks.rejection_reason.as_deref(),
            Some("off-topic")
        );

        // Re-rejecting is a no-op success.
        staging.reject(commit.commit_id, None).unwrap();
    }

    #[test]
    fn test_approved_commits_cannot_be_rejected() {
        let (_, staging) = staging();
        let commit = create(&staging, CommitChecks::default());
        staging.begin_apply(commit.commit_id).unwrap();
        staging.finish_apply(commit.commit_id).unwrap();

        let err = staging.reject(commit.commit_id, None).unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_recover_interrupted() {
        let (_, staging) = staging();
        let commit = create(&staging, CommitChecks::default());
        staging.begin_apply(commit.commit_id).unwrap();

        assert_eq!(staging.recover_interrupted().unwrap(), 1);
        let recovered = staging.get_commit(commit.commit_id).unwrap();
        assert_eq!(recovered.status, CommitStatus::Pending);
        assert_eq!(recovered.checks.apply_error.as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_stash_conflicts() {
        let (store, staging) = staging();
        let commit = create(&staging, CommitChecks::default());
        let conflicts = vec![InvariantConflict {
            key: "identity.name".to_string(),
            existing: "Alice".to_string(),
            proposed: "Bob".to_string(),
        }];
        let stash_ids = staging
            .stash_conflicts("u1", commit.commit_id, &conflicts)
            .unwrap();
        assert_eq!(stash_ids.len(), 1);

        let stash = store.get_conflict_stash(stash_ids[0]).unwrap().unwrap();
        assert_eq!(stash.resolution, StashResolution::Unresolved);
        assert_eq!(stash.source_commit_id, Some(commit.commit_id));
    }
}
