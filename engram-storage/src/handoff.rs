//! Handoff sessions, lanes, and checkpoints

use crate::{db_err, from_json, id_from_db, opt_id_from_db, to_json, ts_from_db, ts_to_db, Store};
use engram_core::{
    EngramResult, HandoffCheckpoint, HandoffLane, HandoffSession, HandoffSessionId,
    HandoffStatus, LaneId, LaneStatus, StorageError,
};
use rusqlite::{params, OptionalExtension, Row};

struct RawHandoffSession {
    id: String,
    user_id: String,
    agent_id: String,
    repo: Option<String>,
    status: String,
    task_summary: Option<String>,
    decisions: String,
    files_touched: String,
    todos: String,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_raw_handoff_session(row: &Row<'_>) -> rusqlite::Result<RawHandoffSession> {
    Ok(RawHandoffSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        repo: row.get(3)?,
        status: row.get(4)?,
        task_summary: row.get(5)?,
        decisions: row.get(6)?,
        files_touched: row.get(7)?,
        todos: row.get(8)?,
        metadata: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn raw_to_handoff_session(raw: RawHandoffSession) -> Result<HandoffSession, StorageError> {
    let corrupt = |reason: String| StorageError::Corrupt {
        table: "handoff_sessions".to_string(),
        reason,
    };
    Ok(HandoffSession {
        session_id: id_from_db("handoff_sessions", &raw.id)?,
        user_id: raw.user_id,
        agent_id: raw.agent_id,
        repo: raw.repo,
        status: HandoffStatus::from_db_str(&raw.status).map_err(|e| corrupt(e.to_string()))?,
        task_summary: raw.task_summary,
        decisions: from_json("handoff_sessions", &raw.decisions)?,
        files_touched: from_json("handoff_sessions", &raw.files_touched)?,
        todos: from_json("handoff_sessions", &raw.todos)?,
        metadata: raw
            .metadata
            .map(|m| from_json("handoff_sessions", &m))
            .transpose()?,
        created_at: ts_from_db("handoff_sessions", &raw.created_at)?,
        updated_at: ts_from_db("handoff_sessions", &raw.updated_at)?,
    })
}

const HANDOFF_SESSION_COLUMNS: &str = "id, user_id, agent_id, repo, status, task_summary, \
     decisions, files_touched, todos, metadata, created_at, updated_at";

impl Store {
    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// Insert or replace a handoff session row.
    pub fn upsert_handoff_session(&self, session: &HandoffSession) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO handoff_sessions (id, user_id, agent_id, repo, status, task_summary, \
             decisions, files_touched, todos, metadata, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(id) DO UPDATE SET repo = excluded.repo, status = excluded.status, \
             task_summary = excluded.task_summary, decisions = excluded.decisions, \
             files_touched = excluded.files_touched, todos = excluded.todos, \
             metadata = excluded.metadata, updated_at = excluded.updated_at",
            params![
                session.session_id.to_string(),
                session.user_id,
                session.agent_id,
                session.repo,
                session.status.as_db_str(),
                session.task_summary,
                to_json(&session.decisions),
                to_json(&session.files_touched),
                to_json(&session.todos),
                session.metadata.as_ref().map(to_json),
                ts_to_db(session.created_at),
                ts_to_db(session.updated_at),
            ],
        )
        .map_err(|e| db_err("upsert_handoff_session", e))?;
        Ok(())
    }

    /// Fetch one handoff session.
    pub fn get_handoff_session(
        &self,
        id: HandoffSessionId,
    ) -> EngramResult<Option<HandoffSession>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM handoff_sessions WHERE id = ?1",
                    HANDOFF_SESSION_COLUMNS
                ),
                params![id.to_string()],
                read_raw_handoff_session,
            )
            .optional()
            .map_err(|e| db_err("get_handoff_session", e))?;
        raw.map(raw_to_handoff_session)
            .transpose()
            .map_err(Into::into)
    }

    /// List handoff sessions, most recently updated first.
    pub fn list_handoff_sessions(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[HandoffStatus]>,
        limit: usize,
    ) -> EngramResult<Vec<HandoffSession>> {
        let status_clause = match statuses {
            Some(statuses) if !statuses.is_empty() => {
                let list = statuses
                    .iter()
                    .map(|s| format!("'{}'", s.as_db_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" AND status IN ({})", list)
            }
            _ => String::new(),
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM handoff_sessions WHERE user_id = ?1 \
                 AND (?2 IS NULL OR agent_id = ?2) AND (?3 IS NULL OR repo = ?3){} \
                 ORDER BY updated_at DESC LIMIT ?4",
                HANDOFF_SESSION_COLUMNS, status_clause
            ))
            .map_err(|e| db_err("list_handoff_sessions", e))?;
        let rows = stmt
            .query_map(
                params![user_id, agent_id, repo, limit as i64],
                read_raw_handoff_session,
            )
            .map_err(|e| db_err("list_handoff_sessions", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(raw_to_handoff_session(
                row.map_err(|e| db_err("list_handoff_sessions", e))?,
            )?);
        }
        Ok(out)
    }

    /// Most recently updated session matching the filters.
    pub fn find_latest_handoff_session(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[HandoffStatus]>,
    ) -> EngramResult<Option<HandoffSession>> {
        Ok(self
            .list_handoff_sessions(user_id, agent_id, repo, statuses, 1)?
            .into_iter()
            .next())
    }

    /// Set a handoff session's status. Returns false when missing.
    pub fn update_handoff_session_status(
        &self,
        id: HandoffSessionId,
        status: HandoffStatus,
    ) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE handoff_sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    status.as_db_str(),
                    ts_to_db(chrono::Utc::now()),
                    id.to_string(),
                ],
            )
            .map_err(|e| db_err("update_handoff_session_status", e))?;
        Ok(affected > 0)
    }

    // ========================================================================
    // LANES
    // ========================================================================

    /// Insert a lane if absent (lanes have deterministic ids).
    pub fn ensure_lane(&self, lane: &HandoffLane) -> EngramResult<HandoffLane> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO handoff_lanes (id, session_id, user_id, from_agent, \
                 to_agent, lane_type, repo, branch, namespace, objective, status, version, \
                 created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    lane.lane_id.to_string(),
                    lane.session_id.map(|s| s.to_string()),
                    lane.user_id,
                    lane.from_agent,
                    lane.to_agent,
                    lane.lane_type,
                    lane.repo,
                    lane.branch,
                    lane.namespace,
                    lane.objective,
                    lane.status.as_db_str(),
                    lane.version,
                    ts_to_db(lane.created_at),
                    ts_to_db(lane.updated_at),
                ],
            )
            .map_err(|e| db_err("ensure_lane", e))?;
        }
        self.get_lane(lane.lane_id)?
            .ok_or_else(|| {
                StorageError::RowNotFound {
                    table: "handoff_lanes".to_string(),
                    key: lane.lane_id.to_string(),
                }
                .into()
            })
    }

    /// Fetch one lane.
    pub fn get_lane(&self, id: LaneId) -> EngramResult<Option<HandoffLane>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, session_id, user_id, from_agent, to_agent, lane_type, repo, branch, \
                 namespace, objective, status, version, created_at, updated_at \
                 FROM handoff_lanes WHERE id = ?1",
                params![id.to_string()],
                read_raw_lane,
            )
            .optional()
            .map_err(|e| db_err("get_lane", e))?;
        row.map(raw_to_lane).transpose().map_err(Into::into)
    }

    /// List lanes for a user, most recently updated first.
    pub fn list_lanes(
        &self,
        user_id: &str,
        repo: Option<&str>,
        statuses: Option<&[LaneStatus]>,
        limit: usize,
    ) -> EngramResult<Vec<HandoffLane>> {
        let status_clause = match statuses {
            Some(statuses) if !statuses.is_empty() => {
                let list = statuses
                    .iter()
                    .map(|s| format!("'{}'", s.as_db_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" AND status IN ({})", list)
            }
            _ => String::new(),
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, session_id, user_id, from_agent, to_agent, lane_type, repo, branch, \
                 namespace, objective, status, version, created_at, updated_at \
                 FROM handoff_lanes WHERE user_id = ?1 AND (?2 IS NULL OR repo = ?2){} \
                 ORDER BY updated_at DESC LIMIT ?3",
                status_clause
            ))
            .map_err(|e| db_err("list_lanes", e))?;
        let rows = stmt
            .query_map(params![user_id, repo, limit as i64], read_raw_lane)
            .map_err(|e| db_err("list_lanes", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(raw_to_lane(row.map_err(|e| db_err("list_lanes", e))?)?);
        }
        Ok(out)
    }

    /// Bump a lane's version; with `expected_version` this is a CAS append
    /// guard. Returns the new version, or None when the guard failed.
    pub fn advance_lane_version(
        &self,
        id: LaneId,
        expected_version: Option<i64>,
    ) -> EngramResult<Option<i64>> {
        let conn = self.lock()?;
        let affected = match expected_version {
            Some(expected) => conn
                .execute(
                    "UPDATE handoff_lanes SET version = version + 1, updated_at = ?1 \
                     WHERE id = ?2 AND version = ?3",
                    params![ts_to_db(chrono::Utc::now()), id.to_string(), expected],
                )
                .map_err(|e| db_err("advance_lane_version", e))?,
            None => conn
                .execute(
                    "UPDATE handoff_lanes SET version = version + 1, updated_at = ?1 \
                     WHERE id = ?2",
                    params![ts_to_db(chrono::Utc::now()), id.to_string()],
                )
                .map_err(|e| db_err("advance_lane_version", e))?,
        };
        if affected == 0 {
            return Ok(None);
        }
        let version: i64 = conn
            .query_row(
                "SELECT version FROM handoff_lanes WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| db_err("advance_lane_version", e))?;
        Ok(Some(version))
    }

    /// Close a lane and optionally re-point its session.
    pub fn update_lane_status(
        &self,
        id: LaneId,
        status: LaneStatus,
        session_id: Option<HandoffSessionId>,
    ) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = match session_id {
            Some(session_id) => conn
                .execute(
                    "UPDATE handoff_lanes SET status = ?1, session_id = ?2, updated_at = ?3 \
                     WHERE id = ?4",
                    params![
                        status.as_db_str(),
                        session_id.to_string(),
                        ts_to_db(chrono::Utc::now()),
                        id.to_string(),
                    ],
                )
                .map_err(|e| db_err("update_lane_status", e))?,
            None => conn
                .execute(
                    "UPDATE handoff_lanes SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![
                        status.as_db_str(),
                        ts_to_db(chrono::Utc::now()),
                        id.to_string(),
                    ],
                )
                .map_err(|e| db_err("update_lane_status", e))?,
        };
        Ok(affected > 0)
    }

    // ========================================================================
    // CHECKPOINTS
    // ========================================================================

    /// Append a checkpoint. Checkpoints are immutable once written.
    pub fn add_checkpoint(&self, checkpoint: &HandoffCheckpoint) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO handoff_checkpoints (id, lane_id, session_id, agent_id, event_type, \
             snapshot, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                checkpoint.checkpoint_id.to_string(),
                checkpoint.lane_id.to_string(),
                checkpoint.session_id.map(|s| s.to_string()),
                checkpoint.agent_id,
                checkpoint.event_type,
                to_json(&checkpoint.snapshot),
                ts_to_db(checkpoint.created_at),
            ],
        )
        .map_err(|e| db_err("add_checkpoint", e))?;
        Ok(())
    }

    /// Most recent checkpoints of a lane, newest first.
    pub fn list_checkpoints(
        &self,
        lane_id: LaneId,
        limit: usize,
    ) -> EngramResult<Vec<HandoffCheckpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, lane_id, session_id, agent_id, event_type, snapshot, created_at \
                 FROM handoff_checkpoints WHERE lane_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| db_err("list_checkpoints", e))?;
        let rows = stmt
            .query_map(params![lane_id.to_string(), limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| db_err("list_checkpoints", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, lane, session, agent_id, event_type, snapshot, created_at) =
                row.map_err(|e| db_err("list_checkpoints", e))?;
            out.push(HandoffCheckpoint {
                checkpoint_id: id_from_db("handoff_checkpoints", &id)?,
                lane_id: id_from_db("handoff_checkpoints", &lane)?,
                session_id: opt_id_from_db("handoff_checkpoints", session)?,
                agent_id,
                event_type,
                snapshot: from_json("handoff_checkpoints", &snapshot)?,
                created_at: ts_from_db("handoff_checkpoints", &created_at)?,
            });
        }
        Ok(out)
    }

    /// Latest checkpoint of a lane.
    pub fn latest_checkpoint(&self, lane_id: LaneId) -> EngramResult<Option<HandoffCheckpoint>> {
        Ok(self.list_checkpoints(lane_id, 1)?.into_iter().next())
    }
}

type RawLane = (
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
    i64,
    String,
    String,
);

fn read_raw_lane(row: &Row<'_>) -> rusqlite::Result<RawLane> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn raw_to_lane(raw: RawLane) -> Result<HandoffLane, StorageError> {
    let (
        id,
        session_id,
        user_id,
        from_agent,
        to_agent,
        lane_type,
        repo,
        branch,
        namespace,
        objective,
        status,
        version,
        created_at,
        updated_at,
    ) = raw;
    let corrupt = |reason: String| StorageError::Corrupt {
        table: "handoff_lanes".to_string(),
        reason,
    };
    Ok(HandoffLane {
        lane_id: id_from_db("handoff_lanes", &id)?,
        session_id: opt_id_from_db("handoff_lanes", session_id)?,
        user_id,
        from_agent,
        to_agent,
        lane_type,
        repo,
        branch,
        namespace,
        objective,
        status: LaneStatus::from_db_str(&status).map_err(corrupt)?,
        version,
        created_at: ts_from_db("handoff_lanes", &created_at)?,
        updated_at: ts_from_db("handoff_lanes", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::EngramIdType;

    fn make_handoff_session(user: &str, agent: &str) -> HandoffSession {
        let now = Utc::now();
        HandoffSession {
            session_id: HandoffSessionId::new_v4(),
            user_id: user.to_string(),
            agent_id: agent.to_string(),
            repo: Some("repo:/x".to_string()),
            status: HandoffStatus::Active,
            task_summary: Some("wire the parser".to_string()),
            decisions: vec!["use nom".to_string()],
            files_touched: vec!["src/parse.rs".to_string()],
            todos: vec!["add tests".to_string()],
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn make_lane(user: &str) -> HandoffLane {
        let now = Utc::now();
        HandoffLane {
            lane_id: LaneId::new_v4(),
            session_id: None,
            user_id: user.to_string(),
            from_agent: Some("a1".to_string()),
            to_agent: None,
            lane_type: "general".to_string(),
            repo: Some("repo:/x".to_string()),
            branch: Some("main".to_string()),
            namespace: "default".to_string(),
            objective: None,
            status: LaneStatus::Open,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_handoff_session_upsert_and_latest() {
        let store = Store::open_in_memory().unwrap();
        let mut session = make_handoff_session("u1", "a1");
        store.upsert_handoff_session(&session).unwrap();

        session.todos.push("run ci".to_string());
        session.updated_at = Utc::now();
        store.upsert_handoff_session(&session).unwrap();

        let latest = store
            .find_latest_handoff_session("u1", Some("a1"), Some("repo:/x"), None)
            .unwrap()
            .unwrap();
        assert_eq!(latest.todos.len(), 2);

        let active = store
            .list_handoff_sessions("u1", None, None, Some(&[HandoffStatus::Active]), 10)
            .unwrap();
        assert_eq!(active.len(), 1);
        let done = store
            .list_handoff_sessions("u1", None, None, Some(&[HandoffStatus::Completed]), 10)
            .unwrap();
        assert!(done.is_empty());
    }

    #[test]
    fn test_lane_version_cas() {
        let store = Store::open_in_memory().unwrap();
        let lane = store.ensure_lane(&make_lane("u1")).unwrap();
        assert_eq!(lane.version, 0);

        assert_eq!(
            store.advance_lane_version(lane.lane_id, Some(0)).unwrap(),
            Some(1)
        );
        // Stale expected version fails the guard.
        assert_eq!(
            store.advance_lane_version(lane.lane_id, Some(0)).unwrap(),
            None
        );
        assert_eq!(
            store.advance_lane_version(lane.lane_id, None).unwrap(),
            Some(2)
        );
    }

    #[test]
    fn test_checkpoints_append_only() {
        let store = Store::open_in_memory().unwrap();
        let lane = store.ensure_lane(&make_lane("u1")).unwrap();

        for i in 0..3 {
            store
                .add_checkpoint(&HandoffCheckpoint {
                    checkpoint_id: engram_core::CheckpointId::new_v4(),
                    lane_id: lane.lane_id,
                    session_id: None,
                    agent_id: "a1".to_string(),
                    event_type: "tool_complete".to_string(),
                    snapshot: serde_json::json!({ "step": i }),
                    created_at: Utc::now() + chrono::Duration::milliseconds(i),
                })
                .unwrap();
        }

        let latest = store.latest_checkpoint(lane.lane_id).unwrap().unwrap();
        assert_eq!(latest.snapshot["step"], 2);
        assert_eq!(store.list_checkpoints(lane.lane_id, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_ensure_lane_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let lane = make_lane("u1");
        store.ensure_lane(&lane).unwrap();
        let again = store.ensure_lane(&lane).unwrap();
        assert_eq!(again.lane_id, lane.lane_id);
        assert_eq!(store.list_lanes("u1", None, None, 10).unwrap().len(), 1);
    }
}
