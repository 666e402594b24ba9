//! Proposal commits, staged changes, conflict stash, and invariants

use crate::{
    db_err, from_json, id_from_db, opt_id_from_db, opt_ts_from_db, to_json, ts_from_db, ts_to_db,
    Store,
};
use engram_core::{
    ChangeOp, CommitChecks, CommitId, CommitStatus, ConfidentialityScope, ConflictStash,
    EngramIdType, EngramResult, InvariantRecord, MemoryId, ProposalChange, ProposalCommit,
    StashId, StashResolution, StorageError, Timestamp,
};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

/// Filter for commit listings.
#[derive(Debug, Clone, Default)]
pub struct CommitFilter {
    pub user_id: Option<String>,
    pub status: Option<CommitStatus>,
    pub limit: Option<usize>,
}

struct RawCommit {
    id: String,
    user_id: String,
    agent_id: Option<String>,
    scope: String,
    status: String,
    checks: String,
    preview: String,
    provenance: String,
    created_at: String,
    updated_at: String,
}

fn read_raw_commit(row: &Row<'_>) -> rusqlite::Result<RawCommit> {
    Ok(RawCommit {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        scope: row.get(3)?,
        status: row.get(4)?,
        checks: row.get(5)?,
        preview: row.get(6)?,
        provenance: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl Store {
    fn raw_to_commit(&self, raw: RawCommit) -> EngramResult<ProposalCommit> {
        let corrupt = |reason: String| StorageError::Corrupt {
            table: "proposal_commits".to_string(),
            reason,
        };
        let commit_id: CommitId = id_from_db("proposal_commits", &raw.id)?;
        Ok(ProposalCommit {
            commit_id,
            user_id: raw.user_id,
            agent_id: raw.agent_id,
            scope: ConfidentialityScope::from_db_str(&raw.scope).map_err(corrupt)?,
            status: CommitStatus::from_db_str(&raw.status)
                .map_err(|e| corrupt(e.to_string()))?,
            checks: from_json("proposal_commits", &raw.checks)?,
            preview: from_json("proposal_commits", &raw.preview)?,
            provenance: from_json("proposal_commits", &raw.provenance)?,
            changes: self.get_proposal_changes(commit_id)?,
            created_at: ts_from_db("proposal_commits", &raw.created_at)?,
            updated_at: ts_from_db("proposal_commits", &raw.updated_at)?,
        })
    }

    /// Insert a commit with its changes in one transaction.
    pub fn add_proposal_commit(&self, commit: &ProposalCommit) -> EngramResult<CommitId> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_err("add_proposal_commit", e))?;
        tx.execute(
            "INSERT INTO proposal_commits (id, user_id, agent_id, scope, status, checks, \
             preview, provenance, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                commit.commit_id.to_string(),
                commit.user_id,
                commit.agent_id,
                commit.scope.as_db_str(),
                commit.status.as_db_str(),
                to_json(&commit.checks),
                to_json(&commit.preview),
                to_json(&commit.provenance),
                ts_to_db(commit.created_at),
                ts_to_db(commit.updated_at),
            ],
        )
        .map_err(|e| db_err("add_proposal_commit", e))?;

        for change in &commit.changes {
            tx.execute(
                "INSERT INTO proposal_changes (id, commit_id, op, target_id, patch, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    change.change_id.to_string(),
                    commit.commit_id.to_string(),
                    change.op.as_db_str(),
                    change.target_id.map(|t| t.to_string()),
                    to_json(&change.patch),
                    ts_to_db(change.created_at),
                ],
            )
            .map_err(|e| db_err("add_proposal_change", e))?;
        }
        tx.commit().map_err(|e| db_err("add_proposal_commit", e))?;
        Ok(commit.commit_id)
    }

    /// Fetch one commit with its changes.
    pub fn get_proposal_commit(&self, id: CommitId) -> EngramResult<Option<ProposalCommit>> {
        let raw = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, user_id, agent_id, scope, status, checks, preview, provenance, \
                 created_at, updated_at FROM proposal_commits WHERE id = ?1",
                params![id.to_string()],
                read_raw_commit,
            )
            .optional()
            .map_err(|e| db_err("get_proposal_commit", e))?
        };
        raw.map(|r| self.raw_to_commit(r)).transpose()
    }

    /// List commits, newest first.
    pub fn list_proposal_commits(
        &self,
        filter: &CommitFilter,
    ) -> EngramResult<Vec<ProposalCommit>> {
        let limit = filter.limit.unwrap_or(100);
        let raws = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, agent_id, scope, status, checks, preview, provenance, \
                     created_at, updated_at FROM proposal_commits \
                     WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR status = ?2) \
                     ORDER BY created_at DESC LIMIT ?3",
                )
                .map_err(|e| db_err("list_proposal_commits", e))?;
            let rows = stmt
                .query_map(
                    params![
                        filter.user_id,
                        filter.status.map(|s| s.as_db_str()),
                        limit as i64
                    ],
                    read_raw_commit,
                )
                .map_err(|e| db_err("list_proposal_commits", e))?;
            let mut raws = Vec::new();
            for row in rows {
                raws.push(row.map_err(|e| db_err("list_proposal_commits", e))?);
            }
            raws
        };
        raws.into_iter().map(|r| self.raw_to_commit(r)).collect()
    }

    /// Changes of one commit, in insertion order.
    pub fn get_proposal_changes(&self, commit_id: CommitId) -> EngramResult<Vec<ProposalChange>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, op, target_id, patch, created_at FROM proposal_changes \
                 WHERE commit_id = ?1 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| db_err("get_proposal_changes", e))?;
        let rows = stmt
            .query_map(params![commit_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| db_err("get_proposal_changes", e))?;

        let corrupt = |reason: String| StorageError::Corrupt {
            table: "proposal_changes".to_string(),
            reason,
        };
        let mut out = Vec::new();
        for row in rows {
            let (id, op, target_id, patch, created_at) =
                row.map_err(|e| db_err("get_proposal_changes", e))?;
            out.push(ProposalChange {
                change_id: id_from_db("proposal_changes", &id)?,
                commit_id,
                op: ChangeOp::from_db_str(&op).map_err(corrupt)?,
                target_id: opt_id_from_db::<MemoryId>("proposal_changes", target_id)?,
                patch: from_json("proposal_changes", &patch)?,
                created_at: ts_from_db("proposal_changes", &created_at)?,
            });
        }
        Ok(out)
    }

    /// Atomic compare-and-set on the commit row.
    ///
    /// `UPDATE ... WHERE id = ? AND status IN (...)` in one statement; when
    /// zero rows are affected the caller re-reads and reports the latest
    /// status. This single invariant prevents double-apply under concurrency.
    pub fn transition_commit_status(
        &self,
        id: CommitId,
        from: &[CommitStatus],
        to: CommitStatus,
        checks: Option<&CommitChecks>,
    ) -> EngramResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let from_list = from
            .iter()
            .map(|s| format!("'{}'", s.as_db_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let conn = self.lock()?;
        let affected = match checks {
            Some(checks) => conn
                .execute(
                    &format!(
                        "UPDATE proposal_commits SET status = ?1, checks = ?2, updated_at = ?3 \
                         WHERE id = ?4 AND status IN ({})",
                        from_list
                    ),
                    params![
                        to.as_db_str(),
                        to_json(checks),
                        ts_to_db(chrono::Utc::now()),
                        id.to_string(),
                    ],
                )
                .map_err(|e| db_err("transition_commit_status", e))?,
            None => conn
                .execute(
                    &format!(
                        "UPDATE proposal_commits SET status = ?1, updated_at = ?2 \
                         WHERE id = ?3 AND status IN ({})",
                        from_list
                    ),
                    params![to.as_db_str(), ts_to_db(chrono::Utc::now()), id.to_string()],
                )
                .map_err(|e| db_err("transition_commit_status", e))?,
        };
        debug!(commit_id = %id, to = to.as_db_str(), moved = affected > 0, "commit transition");
        Ok(affected > 0)
    }

    /// Replace a commit's checks without touching its status.
    pub fn update_commit_checks(&self, id: CommitId, checks: &CommitChecks) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE proposal_commits SET checks = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_json(checks), ts_to_db(chrono::Utc::now()), id.to_string()],
            )
            .map_err(|e| db_err("update_commit_checks", e))?;
        Ok(affected > 0)
    }

    /// Count commits in a quota window.
    pub fn count_proposal_commits(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        since: Timestamp,
    ) -> EngramResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM proposal_commits \
                 WHERE user_id = ?1 AND (?2 IS NULL OR agent_id = ?2) AND created_at >= ?3",
                params![user_id, agent_id, ts_to_db(since)],
                |row| row.get(0),
            )
            .map_err(|e| db_err("count_proposal_commits", e))?;
        Ok(count)
    }

    /// Ids of commits stuck in APPLYING (used by startup recovery).
    pub fn list_applying_commits(&self) -> EngramResult<Vec<CommitId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id FROM proposal_commits WHERE status = 'APPLYING'")
            .map_err(|e| db_err("list_applying_commits", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("list_applying_commits", e))?;
        let mut out = Vec::new();
        for row in rows {
            let text = row.map_err(|e| db_err("list_applying_commits", e))?;
            out.push(id_from_db("proposal_commits", &text)?);
        }
        Ok(out)
    }

    // ========================================================================
    // CONFLICT STASH
    // ========================================================================

    /// Insert a conflict stash row.
    pub fn add_conflict_stash(&self, stash: &ConflictStash) -> EngramResult<StashId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conflict_stash (id, user_id, conflict_key, existing, proposed, \
             resolution, source_commit_id, created_at, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                stash.stash_id.to_string(),
                stash.user_id,
                stash.conflict_key,
                stash.existing,
                stash.proposed,
                stash.resolution.as_db_str(),
                stash.source_commit_id.map(|c| c.to_string()),
                ts_to_db(stash.created_at),
                stash.resolved_at.map(ts_to_db),
            ],
        )
        .map_err(|e| db_err("add_conflict_stash", e))?;
        Ok(stash.stash_id)
    }

    /// Fetch one stash row.
    pub fn get_conflict_stash(&self, id: StashId) -> EngramResult<Option<ConflictStash>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, conflict_key, existing, proposed, resolution, \
                 source_commit_id, created_at, resolved_at FROM conflict_stash WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err("get_conflict_stash", e))?;
        row.map(raw_to_stash).transpose().map_err(Into::into)
    }

    /// List stash rows, optionally by resolution.
    pub fn list_conflict_stash(
        &self,
        user_id: Option<&str>,
        resolution: Option<StashResolution>,
        limit: usize,
    ) -> EngramResult<Vec<ConflictStash>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, conflict_key, existing, proposed, resolution, \
                 source_commit_id, created_at, resolved_at FROM conflict_stash \
                 WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR resolution = ?2) \
                 ORDER BY created_at DESC LIMIT ?3",
            )
            .map_err(|e| db_err("list_conflict_stash", e))?;
        let rows = stmt
            .query_map(
                params![user_id, resolution.map(|r| r.as_db_str()), limit as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .map_err(|e| db_err("list_conflict_stash", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(raw_to_stash(
                row.map_err(|e| db_err("list_conflict_stash", e))?,
            )?);
        }
        Ok(out)
    }

    /// Set a stash row's resolution. Returns false when missing.
    pub fn resolve_conflict_stash(
        &self,
        id: StashId,
        resolution: StashResolution,
    ) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE conflict_stash SET resolution = ?1, resolved_at = ?2 WHERE id = ?3",
                params![
                    resolution.as_db_str(),
                    ts_to_db(chrono::Utc::now()),
                    id.to_string(),
                ],
            )
            .map_err(|e| db_err("resolve_conflict_stash", e))?;
        Ok(affected > 0)
    }

    // ========================================================================
    // INVARIANTS
    // ========================================================================

    /// Insert or replace a (user, key) invariant.
    pub fn upsert_invariant(&self, invariant: &InvariantRecord) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO invariants (id, user_id, invariant_key, invariant_value, category, \
             confidence, source_memory_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(user_id, invariant_key) DO UPDATE SET \
             invariant_value = excluded.invariant_value, category = excluded.category, \
             confidence = excluded.confidence, source_memory_id = excluded.source_memory_id, \
             updated_at = excluded.updated_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                invariant.user_id,
                invariant.key,
                invariant.value,
                invariant.category,
                invariant.confidence,
                invariant.source_memory_id.map(|m| m.to_string()),
                ts_to_db(invariant.created_at),
                ts_to_db(invariant.updated_at),
            ],
        )
        .map_err(|e| db_err("upsert_invariant", e))?;
        Ok(())
    }

    /// Fetch one invariant by (user, key).
    pub fn get_invariant(&self, user_id: &str, key: &str) -> EngramResult<Option<InvariantRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT user_id, invariant_key, invariant_value, category, confidence, \
                 source_memory_id, created_at, updated_at FROM invariants \
                 WHERE user_id = ?1 AND invariant_key = ?2",
                params![user_id, key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err("get_invariant", e))?;

        row.map(
            |(user_id, key, value, category, confidence, source, created_at, updated_at)| {
                Ok::<_, StorageError>(InvariantRecord {
                    user_id,
                    key,
                    value,
                    category,
                    confidence,
                    source_memory_id: opt_id_from_db("invariants", source)?,
                    created_at: ts_from_db("invariants", &created_at)?,
                    updated_at: ts_from_db("invariants", &updated_at)?,
                })
            },
        )
        .transpose()
        .map_err(Into::into)
    }
}

fn raw_to_stash(
    raw: (
        String,
        String,
        String,
        String,
        String,
        String,
        Option<String>,
        String,
        Option<String>,
    ),
) -> Result<ConflictStash, StorageError> {
    let (id, user_id, conflict_key, existing, proposed, resolution, source, created_at, resolved) =
        raw;
    let corrupt = |reason: String| StorageError::Corrupt {
        table: "conflict_stash".to_string(),
        reason,
    };
    Ok(ConflictStash {
        stash_id: id_from_db("conflict_stash", &id)?,
        user_id,
        conflict_key,
        existing,
        proposed,
        resolution: StashResolution::from_db_str(&resolution).map_err(corrupt)?,
        source_commit_id: opt_id_from_db("conflict_stash", source)?,
        created_at: ts_from_db("conflict_stash", &created_at)?,
        resolved_at: opt_ts_from_db("conflict_stash", resolved)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::{ChangeId, ChangePatch, CommitPreview, Provenance};

    fn make_commit(user: &str, status: CommitStatus) -> ProposalCommit {
        let now = Utc::now();
        let commit_id = CommitId::new_v4();
        ProposalCommit {
            commit_id,
            user_id: user.to_string(),
            agent_id: Some("a1".to_string()),
            scope: ConfidentialityScope::Work,
            status,
            checks: CommitChecks::default(),
            preview: CommitPreview {
                summary: "content".to_string(),
                scope: ConfidentialityScope::Work,
                namespace: "default".to_string(),
                category_count: 0,
            },
            provenance: Provenance::new("mcp", "propose_write"),
            changes: vec![ProposalChange {
                change_id: ChangeId::new_v4(),
                commit_id,
                op: ChangeOp::Add,
                target_id: None,
                patch: ChangePatch {
                    content: "content".to_string(),
                    categories: Vec::new(),
                    metadata: serde_json::Map::new(),
                    infer: false,
                    source_app: None,
                    confidentiality_scope: ConfidentialityScope::Work,
                    namespace: "default".to_string(),
                },
                created_at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_commit_roundtrip_with_changes() {
        let store = Store::open_in_memory().unwrap();
        let commit = make_commit("u1", CommitStatus::Pending);
        store.add_proposal_commit(&commit).unwrap();

        let loaded = store.get_proposal_commit(commit.commit_id).unwrap().unwrap();
        assert_eq!(loaded.status, CommitStatus::Pending);
        assert_eq!(loaded.changes.len(), 1);
        assert_eq!(loaded.changes[0].patch.content, "content");
    }

    #[test]
    fn test_cas_transition_single_winner() {
        let store = Store::open_in_memory().unwrap();
        let commit = make_commit("u1", CommitStatus::Pending);
        store.add_proposal_commit(&commit).unwrap();

        let from = [CommitStatus::Pending, CommitStatus::AutoStashed];
        let first = store
            .transition_commit_status(commit.commit_id, &from, CommitStatus::Applying, None)
            .unwrap();
        let second = store
            .transition_commit_status(commit.commit_id, &from, CommitStatus::Applying, None)
            .unwrap();
        assert!(first);
        assert!(!second);

        let loaded = store.get_proposal_commit(commit.commit_id).unwrap().unwrap();
        assert_eq!(loaded.status, CommitStatus::Applying);
    }

    #[test]
    fn test_cas_transition_writes_checks() {
        let store = Store::open_in_memory().unwrap();
        let commit = make_commit("u1", CommitStatus::Applying);
        store.add_proposal_commit(&commit).unwrap();

        let mut checks = CommitChecks::default();
        checks.apply_error = Some("boom".to_string());
        checks.rollback_deleted = Some(1);
        store
            .transition_commit_status(
                commit.commit_id,
                &[CommitStatus::Applying],
                CommitStatus::Pending,
                Some(&checks),
            )
            .unwrap();

        let loaded = store.get_proposal_commit(commit.commit_id).unwrap().unwrap();
        assert_eq!(loaded.status, CommitStatus::Pending);
        assert_eq!(loaded.checks.apply_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_list_and_count() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_proposal_commit(&make_commit("u1", CommitStatus::Pending))
            .unwrap();
        store
            .add_proposal_commit(&make_commit("u1", CommitStatus::Rejected))
            .unwrap();

        let pending = store
            .list_proposal_commits(&CommitFilter {
                user_id: Some("u1".to_string()),
                status: Some(CommitStatus::Pending),
                limit: None,
            })
            .unwrap();
        assert_eq!(pending.len(), 1);

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(
            store
                .count_proposal_commits("u1", Some("a1"), hour_ago)
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_stash_roundtrip_and_resolution() {
        let store = Store::open_in_memory().unwrap();
        let stash = ConflictStash {
            stash_id: StashId::new_v4(),
            user_id: "u1".to_string(),
            conflict_key: "identity.name".to_string(),
            existing: "Alice".to_string(),
            proposed: "Bob".to_string(),
            resolution: StashResolution::Unresolved,
            source_commit_id: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        store.add_conflict_stash(&stash).unwrap();

        let unresolved = store
            .list_conflict_stash(Some("u1"), Some(StashResolution::Unresolved), 10)
            .unwrap();
        assert_eq!(unresolved.len(), 1);

        store
            .resolve_conflict_stash(stash.stash_id, StashResolution::AcceptProposed)
            .unwrap();
        let loaded = store.get_conflict_stash(stash.stash_id).unwrap().unwrap();
        assert_eq!(loaded.resolution, StashResolution::AcceptProposed);
        assert!(loaded.resolved_at.is_some());
    }

    #[test]
    fn test_invariant_upsert_replaces() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut invariant = InvariantRecord {
            user_id: "u1".to_string(),
            key: "identity.name".to_string(),
            value: "Alice".to_string(),
            category: "identity".to_string(),
            confidence: 0.9,
            source_memory_id: None,
            created_at: now,
            updated_at: now,
        };
        store.upsert_invariant(&invariant).unwrap();

        invariant.value = "Alicia".to_string();
        invariant.confidence = 0.8;
        store.upsert_invariant(&invariant).unwrap();

        let loaded = store
            .get_invariant("u1", "identity.name")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.value, "Alicia");
        assert_eq!(loaded.confidence, 0.8);
    }
}
