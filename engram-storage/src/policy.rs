//! Sessions, namespaces, agent policies, and agent trust

use crate::{
    db_err, from_json, id_from_db, opt_ts_from_db, to_json, ts_from_db, ts_to_db, Store,
};
use engram_core::{
    AgentPolicy, AgentTrust, CommitStatus, EngramIdType, EngramResult, Namespace, NamespaceId,
    NamespacePermission, PermissionId, SessionId, SessionRecord, StorageError, Timestamp,
};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

struct RawSession {
    id: String,
    token_hash: String,
    user_id: String,
    agent_id: Option<String>,
    allowed_scopes: String,
    capabilities: String,
    namespaces: String,
    expires_at: String,
    created_at: String,
    revoked_at: Option<String>,
}

fn read_raw_session(row: &Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        user_id: row.get(2)?,
        agent_id: row.get(3)?,
        allowed_scopes: row.get(4)?,
        capabilities: row.get(5)?,
        namespaces: row.get(6)?,
        expires_at: row.get(7)?,
        created_at: row.get(8)?,
        revoked_at: row.get(9)?,
    })
}

fn raw_to_session(raw: RawSession) -> Result<SessionRecord, StorageError> {
    Ok(SessionRecord {
        session_id: id_from_db("sessions", &raw.id)?,
        token_hash: raw.token_hash,
        user_id: raw.user_id,
        agent_id: raw.agent_id,
        allowed_scopes: from_json("sessions", &raw.allowed_scopes)?,
        capabilities: from_json("sessions", &raw.capabilities)?,
        namespaces: from_json("sessions", &raw.namespaces)?,
        expires_at: ts_from_db("sessions", &raw.expires_at)?,
        created_at: ts_from_db("sessions", &raw.created_at)?,
        revoked_at: opt_ts_from_db("sessions", raw.revoked_at)?,
    })
}

impl Store {
    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// Insert a session row.
    pub fn create_session(&self, session: &SessionRecord) -> EngramResult<SessionId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (id, token_hash, user_id, agent_id, allowed_scopes, \
             capabilities, namespaces, expires_at, created_at, revoked_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.session_id.to_string(),
                session.token_hash,
                session.user_id,
                session.agent_id,
                to_json(&session.allowed_scopes),
                to_json(&session.capabilities),
                to_json(&session.namespaces),
                ts_to_db(session.expires_at),
                ts_to_db(session.created_at),
                session.revoked_at.map(ts_to_db),
            ],
        )
        .map_err(|e| db_err("create_session", e))?;
        Ok(session.session_id)
    }

    /// Look up a session by its token hash.
    pub fn get_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> EngramResult<Option<SessionRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, token_hash, user_id, agent_id, allowed_scopes, capabilities, \
                 namespaces, expires_at, created_at, revoked_at FROM sessions \
                 WHERE token_hash = ?1",
                params![token_hash],
                read_raw_session,
            )
            .optional()
            .map_err(|e| db_err("get_session_by_token_hash", e))?;
        raw.map(raw_to_session).transpose().map_err(Into::into)
    }

    /// Mark a session revoked. Returns false when missing.
    pub fn revoke_session(&self, id: SessionId) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE sessions SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
                params![ts_to_db(chrono::Utc::now()), id.to_string()],
            )
            .map_err(|e| db_err("revoke_session", e))?;
        Ok(affected > 0)
    }

    // ========================================================================
    // NAMESPACES
    // ========================================================================

    /// Get-or-create a namespace row for (user, name).
    pub fn ensure_namespace(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> EngramResult<NamespaceId> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM namespaces WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("ensure_namespace", e))?;
        if let Some(id) = existing {
            return id_from_db("namespaces", &id).map_err(Into::into);
        }

        let id = NamespaceId::new_v4();
        let now = ts_to_db(chrono::Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO namespaces (id, user_id, name, description, created_at, \
             updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id.to_string(), user_id, name, description, now, now],
        )
        .map_err(|e| db_err("ensure_namespace", e))?;

        // Another writer may have inserted concurrently; read back the winner.
        let winner: String = conn
            .query_row(
                "SELECT id FROM namespaces WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get(0),
            )
            .map_err(|e| db_err("ensure_namespace", e))?;
        id_from_db("namespaces", &winner).map_err(Into::into)
    }

    /// List namespaces, optionally for one user.
    pub fn list_namespaces(&self, user_id: Option<&str>) -> EngramResult<Vec<Namespace>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, description, created_at, updated_at FROM namespaces \
                 WHERE (?1 IS NULL OR user_id = ?1) ORDER BY name",
            )
            .map_err(|e| db_err("list_namespaces", e))?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| db_err("list_namespaces", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, user_id, name, description, created_at, updated_at) =
                row.map_err(|e| db_err("list_namespaces", e))?;
            out.push(Namespace {
                namespace_id: id_from_db("namespaces", &id)?,
                user_id,
                name,
                description,
                created_at: ts_from_db("namespaces", &created_at)?,
                updated_at: ts_from_db("namespaces", &updated_at)?,
            });
        }
        Ok(out)
    }

    /// Grant a namespace capability to an agent, creating the namespace if
    /// needed. Re-granting refreshes expiry.
    pub fn grant_namespace_permission(
        &self,
        user_id: &str,
        agent_id: &str,
        namespace: &str,
        capability: &str,
        expires_at: Option<Timestamp>,
    ) -> EngramResult<PermissionId> {
        let namespace_id = self.ensure_namespace(user_id, namespace, None)?;
        let permission_id = PermissionId::new_v4();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO namespace_permissions (id, namespace_id, user_id, agent_id, \
             capability, granted_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(namespace_id, user_id, agent_id, capability) DO UPDATE SET \
             expires_at = excluded.expires_at, granted_at = excluded.granted_at",
            params![
                permission_id.to_string(),
                namespace_id.to_string(),
                user_id,
                agent_id,
                capability,
                ts_to_db(chrono::Utc::now()),
                expires_at.map(ts_to_db),
            ],
        )
        .map_err(|e| db_err("grant_namespace_permission", e))?;
        debug!(user_id, agent_id, namespace, capability, "granted namespace permission");
        Ok(permission_id)
    }

    /// Namespace names an agent holds an unexpired grant for.
    pub fn get_agent_allowed_namespaces(
        &self,
        user_id: &str,
        agent_id: &str,
        capability: &str,
    ) -> EngramResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT n.name FROM namespace_permissions p \
                 JOIN namespaces n ON n.id = p.namespace_id \
                 WHERE p.user_id = ?1 AND p.agent_id = ?2 AND p.capability = ?3 \
                 AND (p.expires_at IS NULL OR p.expires_at > ?4) ORDER BY n.name",
            )
            .map_err(|e| db_err("get_agent_allowed_namespaces", e))?;
        let rows = stmt
            .query_map(
                params![user_id, agent_id, capability, ts_to_db(chrono::Utc::now())],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| db_err("get_agent_allowed_namespaces", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| db_err("get_agent_allowed_namespaces", e))?);
        }
        Ok(out)
    }

    /// List permissions for a namespace.
    pub fn list_namespace_permissions(
        &self,
        namespace_id: NamespaceId,
    ) -> EngramResult<Vec<NamespacePermission>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, namespace_id, user_id, agent_id, capability, granted_at, expires_at \
                 FROM namespace_permissions WHERE namespace_id = ?1",
            )
            .map_err(|e| db_err("list_namespace_permissions", e))?;
        let rows = stmt
            .query_map(params![namespace_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(|e| db_err("list_namespace_permissions", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ns, user_id, agent_id, capability, granted_at, expires_at) =
                row.map_err(|e| db_err("list_namespace_permissions", e))?;
            out.push(NamespacePermission {
                permission_id: id_from_db("namespace_permissions", &id)?,
                namespace_id: id_from_db("namespace_permissions", &ns)?,
                user_id,
                agent_id,
                capability,
                granted_at: ts_from_db("namespace_permissions", &granted_at)?,
                expires_at: opt_ts_from_db("namespace_permissions", expires_at)?,
            });
        }
        Ok(out)
    }

    // ========================================================================
    // AGENT POLICIES
    // ========================================================================

    /// Insert or replace the policy for (user, agent).
    pub fn upsert_agent_policy(&self, policy: &AgentPolicy) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_policies (id, user_id, agent_id, allowed_scopes, \
             allowed_capabilities, allowed_namespaces, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(user_id, agent_id) DO UPDATE SET \
             allowed_scopes = excluded.allowed_scopes, \
             allowed_capabilities = excluded.allowed_capabilities, \
             allowed_namespaces = excluded.allowed_namespaces, \
             updated_at = excluded.updated_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                policy.user_id,
                policy.agent_id,
                to_json(&policy.allowed_scopes),
                to_json(&policy.allowed_capabilities),
                to_json(&policy.allowed_namespaces),
                ts_to_db(policy.created_at),
                ts_to_db(policy.updated_at),
            ],
        )
        .map_err(|e| db_err("upsert_agent_policy", e))?;
        Ok(())
    }

    /// Fetch the policy for (user, agent); with `include_wildcard`, fall back
    /// to a policy registered for agent `*`.
    pub fn get_agent_policy(
        &self,
        user_id: &str,
        agent_id: &str,
        include_wildcard: bool,
    ) -> EngramResult<Option<AgentPolicy>> {
        if let Some(policy) = self.get_agent_policy_exact(user_id, agent_id)? {
            return Ok(Some(policy));
        }
        if include_wildcard && agent_id != "*" {
            return self.get_agent_policy_exact(user_id, "*");
        }
        Ok(None)
    }

    fn get_agent_policy_exact(
        &self,
        user_id: &str,
        agent_id: &str,
    ) -> EngramResult<Option<AgentPolicy>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT user_id, agent_id, allowed_scopes, allowed_capabilities, \
                 allowed_namespaces, created_at, updated_at FROM agent_policies \
                 WHERE user_id = ?1 AND agent_id = ?2",
                params![user_id, agent_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err("get_agent_policy", e))?;

        row.map(
            |(user_id, agent_id, scopes, capabilities, namespaces, created_at, updated_at)| {
                Ok::<_, StorageError>(AgentPolicy {
                    user_id,
                    agent_id,
                    allowed_scopes: from_json("agent_policies", &scopes)?,
                    allowed_capabilities: from_json("agent_policies", &capabilities)?,
                    allowed_namespaces: from_json("agent_policies", &namespaces)?,
                    created_at: ts_from_db("agent_policies", &created_at)?,
                    updated_at: ts_from_db("agent_policies", &updated_at)?,
                })
            },
        )
        .transpose()
        .map_err(Into::into)
    }

    /// List policies, optionally for one user.
    pub fn list_agent_policies(&self, user_id: Option<&str>) -> EngramResult<Vec<AgentPolicy>> {
        let pairs = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT user_id, agent_id FROM agent_policies \
                     WHERE (?1 IS NULL OR user_id = ?1) ORDER BY user_id, agent_id",
                )
                .map_err(|e| db_err("list_agent_policies", e))?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| db_err("list_agent_policies", e))?;
            let mut pairs = Vec::new();
            for row in rows {
                pairs.push(row.map_err(|e| db_err("list_agent_policies", e))?);
            }
            pairs
        };

        let mut out = Vec::new();
        for (user, agent) in pairs {
            if let Some(policy) = self.get_agent_policy_exact(&user, &agent)? {
                out.push(policy);
            }
        }
        Ok(out)
    }

    /// Delete a policy. Returns false when missing.
    pub fn delete_agent_policy(&self, user_id: &str, agent_id: &str) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "DELETE FROM agent_policies WHERE user_id = ?1 AND agent_id = ?2",
                params![user_id, agent_id],
            )
            .map_err(|e| db_err("delete_agent_policy", e))?;
        Ok(affected > 0)
    }

    // ========================================================================
    // AGENT TRUST
    // ========================================================================

    /// Fetch the trust row for (user, agent), zeroed when absent.
    pub fn get_agent_trust(&self, user_id: &str, agent_id: &str) -> EngramResult<AgentTrust> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT total_proposals, approved_proposals, rejected_proposals, \
                 auto_stashed_proposals, last_proposed_at, last_approved_at, trust_score, \
                 updated_at FROM agent_trust WHERE user_id = ?1 AND agent_id = ?2",
                params![user_id, agent_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err("get_agent_trust", e))?;

        match row {
            Some((total, approved, rejected, stashed, proposed_at, approved_at, score, updated)) => {
                Ok(AgentTrust {
                    user_id: user_id.to_string(),
                    agent_id: agent_id.to_string(),
                    total_proposals: total,
                    approved_proposals: approved,
                    rejected_proposals: rejected,
                    auto_stashed_proposals: stashed,
                    last_proposed_at: opt_ts_from_db("agent_trust", proposed_at)?,
                    last_approved_at: opt_ts_from_db("agent_trust", approved_at)?,
                    trust_score: score,
                    updated_at: ts_from_db("agent_trust", &updated)?,
                })
            }
            None => Ok(AgentTrust {
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                total_proposals: 0,
                approved_proposals: 0,
                rejected_proposals: 0,
                auto_stashed_proposals: 0,
                last_proposed_at: None,
                last_approved_at: None,
                trust_score: 0.0,
                updated_at: chrono::Utc::now(),
            }),
        }
    }

    /// Record a new proposal against the agent's trust counters.
    pub fn record_agent_proposal(
        &self,
        user_id: &str,
        agent_id: &str,
        status: CommitStatus,
    ) -> EngramResult<()> {
        let now = ts_to_db(chrono::Utc::now());
        let stashed = (status == CommitStatus::AutoStashed) as i64;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_trust (user_id, agent_id, total_proposals, \
             auto_stashed_proposals, last_proposed_at, updated_at) \
             VALUES (?1, ?2, 1, ?3, ?4, ?4) \
             ON CONFLICT(user_id, agent_id) DO UPDATE SET \
             total_proposals = total_proposals + 1, \
             auto_stashed_proposals = auto_stashed_proposals + ?3, \
             last_proposed_at = ?4, updated_at = ?4",
            params![user_id, agent_id, stashed, now],
        )
        .map_err(|e| db_err("record_agent_proposal", e))?;
        drop(conn);
        self.recompute_trust_score(user_id, agent_id)
    }

    /// Record an approval/rejection outcome against the agent's trust
    /// counters.
    pub fn record_agent_outcome(
        &self,
        user_id: &str,
        agent_id: &str,
        approved: bool,
    ) -> EngramResult<()> {
        let now = ts_to_db(chrono::Utc::now());
        let conn = self.lock()?;
        if approved {
            conn.execute(
                "INSERT INTO agent_trust (user_id, agent_id, total_proposals, \
                 approved_proposals, last_approved_at, updated_at) VALUES (?1, ?2, 0, 1, ?3, ?3) \
                 ON CONFLICT(user_id, agent_id) DO UPDATE SET \
                 approved_proposals = approved_proposals + 1, last_approved_at = ?3, \
                 updated_at = ?3",
                params![user_id, agent_id, now],
            )
            .map_err(|e| db_err("record_agent_outcome", e))?;
        } else {
            conn.execute(
                "INSERT INTO agent_trust (user_id, agent_id, total_proposals, \
                 rejected_proposals, updated_at) VALUES (?1, ?2, 0, 1, ?3) \
                 ON CONFLICT(user_id, agent_id) DO UPDATE SET \
                 rejected_proposals = rejected_proposals + 1, updated_at = ?3",
                params![user_id, agent_id, now],
            )
            .map_err(|e| db_err("record_agent_outcome", e))?;
        }
        drop(conn);
        self.recompute_trust_score(user_id, agent_id)
    }

    /// trust = (approved / total) × (1 − min(0.5, rejected / total)), in [0,1].
    fn recompute_trust_score(&self, user_id: &str, agent_id: &str) -> EngramResult<()> {
        let trust = self.get_agent_trust(user_id, agent_id)?;
        let score = if trust.total_proposals > 0 {
            let approval = trust.approved_proposals as f64 / trust.total_proposals as f64;
            let penalty =
                1.0 - (trust.rejected_proposals as f64 / trust.total_proposals as f64).min(0.5);
            (approval * penalty).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let conn = self.lock()?;
        conn.execute(
            "UPDATE agent_trust SET trust_score = ?1 WHERE user_id = ?2 AND agent_id = ?3",
            params![score, user_id, agent_id],
        )
        .map_err(|e| db_err("recompute_trust_score", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::{Capability, ConfidentialityScope};

    fn make_session() -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: SessionId::new_v4(),
            token_hash: format!("hash-{}", SessionId::new_v4()),
            user_id: "u1".to_string(),
            agent_id: Some("a1".to_string()),
            allowed_scopes: vec![ConfidentialityScope::Work],
            capabilities: vec![Capability::Search, Capability::ProposeWrite],
            namespaces: vec!["default".to_string()],
            expires_at: now + chrono::Duration::hours(24),
            created_at: now,
            revoked_at: None,
        }
    }

    #[test]
    fn test_session_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session();
        store.create_session(&session).unwrap();

        let loaded = store
            .get_session_by_token_hash(&session.token_hash)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.capabilities, session.capabilities);
        assert_eq!(loaded.allowed_scopes, vec![ConfidentialityScope::Work]);
    }

    #[test]
    fn test_revoke_session() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session();
        store.create_session(&session).unwrap();
        assert!(store.revoke_session(session.session_id).unwrap());
        assert!(!store.revoke_session(session.session_id).unwrap());

        let loaded = store
            .get_session_by_token_hash(&session.token_hash)
            .unwrap()
            .unwrap();
        assert!(loaded.revoked_at.is_some());
    }

    #[test]
    fn test_ensure_namespace_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store.ensure_namespace("u1", "work", None).unwrap();
        let b = store.ensure_namespace("u1", "work", Some("desc")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list_namespaces(Some("u1")).unwrap().len(), 1);
    }

    #[test]
    fn test_namespace_permission_grant_and_query() {
        let store = Store::open_in_memory().unwrap();
        store
            .grant_namespace_permission("u1", "a1", "work", "read", None)
            .unwrap();
        store
            .grant_namespace_permission("u1", "a1", "personal", "read", None)
            .unwrap();
        store
            .grant_namespace_permission("u1", "a1", "work", "write", None)
            .unwrap();

        let readable = store
            .get_agent_allowed_namespaces("u1", "a1", "read")
            .unwrap();
        assert_eq!(readable, vec!["personal".to_string(), "work".to_string()]);

        let writable = store
            .get_agent_allowed_namespaces("u1", "a1", "write")
            .unwrap();
        assert_eq!(writable, vec!["work".to_string()]);
    }

    #[test]
    fn test_expired_permission_is_excluded() {
        let store = Store::open_in_memory().unwrap();
        let past = Utc::now() - chrono::Duration::hours(1);
        store
            .grant_namespace_permission("u1", "a1", "work", "read", Some(past))
            .unwrap();
        assert!(store
            .get_agent_allowed_namespaces("u1", "a1", "read")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_agent_policy_wildcard_fallback() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .upsert_agent_policy(&AgentPolicy {
                user_id: "u1".to_string(),
                agent_id: "*".to_string(),
                allowed_scopes: vec!["work".to_string()],
                allowed_capabilities: vec!["search".to_string()],
                allowed_namespaces: vec!["default".to_string()],
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        let policy = store.get_agent_policy("u1", "a9", true).unwrap().unwrap();
        assert_eq!(policy.agent_id, "*");
        assert!(store.get_agent_policy("u1", "a9", false).unwrap().is_none());
    }

    #[test]
    fn test_trust_counters_and_score() {
        let store = Store::open_in_memory().unwrap();
        for _ in 0..10 {
            store
                .record_agent_proposal("u1", "a1", CommitStatus::Pending)
                .unwrap();
        }
        for _ in 0..8 {
            store.record_agent_outcome("u1", "a1", true).unwrap();
        }
        store.record_agent_outcome("u1", "a1", false).unwrap();

        let trust = store.get_agent_trust("u1", "a1").unwrap();
        assert_eq!(trust.total_proposals, 10);
        assert_eq!(trust.approved_proposals, 8);
        assert_eq!(trust.rejected_proposals, 1);
        // 0.8 × (1 − 0.1) = 0.72
        assert!((trust.trust_score - 0.72).abs() < 1e-9);
    }
}
