//! Engram Handoff - cross-agent continuity bus
//!
//! Durable session digests, lanes, and append-only checkpoints let one agent
//! resume where another (or its own previous run) stopped. Lane identity is
//! deterministic over (user, agent, namespace, repo) so concurrent agents
//! converge on the same lane without coordination.

use chrono::Utc;
use engram_core::{
    normalize_namespace, CheckpointId, EngramIdType, EngramResult, HandoffCheckpoint,
    HandoffConfig, HandoffLane, HandoffSession, HandoffSessionId, HandoffStatus, LaneId,
    LaneStatus, StorageError,
};
use engram_storage::Store;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Digest of a working session, written at natural stopping points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionDigest {
    pub repo: Option<String>,
    pub task_summary: Option<String>,
    pub decisions: Vec<String>,
    pub files_touched: Vec<String>,
    pub todos: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Everything an agent needs to resume a lane.
#[derive(Debug, Clone)]
pub struct ResumeContext {
    pub lane: HandoffLane,
    pub last_checkpoint: Option<HandoffCheckpoint>,
    pub last_session: Option<HandoffSession>,
    /// True when the lane was created by this call.
    pub created: bool,
}

/// Outcome of an auto-checkpoint append.
#[derive(Debug, Clone)]
pub struct CheckpointOutcome {
    pub checkpoint_id: CheckpointId,
    pub lane_id: LaneId,
    pub version: i64,
    /// True when an idle gap was detected and the session was paused.
    pub idle_paused: bool,
}

/// Inputs for `auto_checkpoint`.
#[derive(Debug, Clone)]
pub struct CheckpointRequest<'a> {
    pub user_id: &'a str,
    pub agent_id: &'a str,
    pub payload: serde_json::Value,
    pub event_type: &'a str,
    pub repo: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub lane_id: Option<LaneId>,
    pub lane_type: &'a str,
    pub objective: Option<&'a str>,
    pub namespace: &'a str,
    pub expected_version: Option<i64>,
}

/// The handoff session bus.
pub struct HandoffBus {
    store: Arc<Store>,
    config: HandoffConfig,
}

impl HandoffBus {
    pub fn new(store: Arc<Store>, config: HandoffConfig) -> Self {
        Self { store, config }
    }

    /// Deterministic lane id for a (user, agent, namespace, repo) scope.
    pub fn lane_id_for(
        user_id: &str,
        agent_id: &str,
        namespace: &str,
        repo: Option<&str>,
    ) -> LaneId {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update([0]);
        hasher.update(agent_id.as_bytes());
        hasher.update([0]);
        hasher.update(normalize_namespace(Some(namespace)).as_bytes());
        hasher.update([0]);
        hasher.update(repo.unwrap_or("").as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        LaneId::new(Uuid::from_bytes(bytes))
    }

    /// Upsert the active session record for (user, agent, repo).
    pub fn save_session_digest(
        &self,
        user_id: &str,
        agent_id: &str,
        digest: &SessionDigest,
    ) -> EngramResult<HandoffSession> {
        let now = Utc::now();
        let existing = self.store.find_latest_handoff_session(
            user_id,
            Some(agent_id),
            digest.repo.as_deref(),
            Some(&[HandoffStatus::Active, HandoffStatus::Paused]),
        )?;

        let session = match existing {
            Some(mut session) => {
                session.status = HandoffStatus::Active;
                session.task_summary = digest
                    .task_summary
                    .clone()
                    .or(session.task_summary);
                merge_distinct(&mut session.decisions, &digest.decisions);
                merge_distinct(&mut session.files_touched, &digest.files_touched);
                session.todos = if digest.todos.is_empty() {
                    session.todos
                } else {
                    digest.todos.clone()
                };
                if digest.metadata.is_some() {
                    session.metadata = digest.metadata.clone();
                }
                session.updated_at = now;
                session
            }
            None => HandoffSession {
                session_id: HandoffSessionId::new_v4(),
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                repo: digest.repo.clone(),
                status: HandoffStatus::Active,
                task_summary: digest.task_summary.clone(),
                decisions: digest.decisions.clone(),
                files_touched: digest.files_touched.clone(),
                todos: digest.todos.clone(),
                metadata: digest.metadata.clone(),
                created_at: now,
                updated_at: now,
            },
        };
        self.store.upsert_handoff_session(&session)?;
        debug!(session_id = %session.session_id, user_id, agent_id, "saved session digest");
        Ok(session)
    }

    /// Most recent session matching the filters.
    pub fn get_last_session(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[HandoffStatus]>,
    ) -> EngramResult<Option<HandoffSession>> {
        self.store
            .find_latest_handoff_session(user_id, agent_id, repo, statuses)
    }

    /// Sessions matching the filters, newest first.
    pub fn list_sessions(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[HandoffStatus]>,
        limit: usize,
    ) -> EngramResult<Vec<HandoffSession>> {
        self.store
            .list_handoff_sessions(user_id, agent_id, repo, statuses, limit)
    }

    /// Lanes of a user, newest activity first.
    pub fn list_lanes(
        &self,
        user_id: &str,
        repo: Option<&str>,
        statuses: Option<&[LaneStatus]>,
        limit: usize,
    ) -> EngramResult<Vec<HandoffLane>> {
        self.store.list_lanes(user_id, repo, statuses, limit)
    }

    /// Resolve (or create) the lane for this scope and return resume state.
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
        statuses: Option<&[HandoffStatus]>,
        auto_create: bool,
    ) -> EngramResult<ResumeContext> {
        let lane_id = Self::lane_id_for(user_id, agent_id, namespace, repo);
        let existing = self.store.get_lane(lane_id)?;
        let created = existing.is_none();
        let lane = match existing {
            Some(lane) => lane,
            None if auto_create => {
                let now = Utc::now();
                self.store.ensure_lane(&HandoffLane {
                    lane_id,
                    session_id: None,
                    user_id: user_id.to_string(),
                    from_agent: Some(agent_id.to_string()),
                    to_agent: None,
                    lane_type: lane_type.to_string(),
                    repo: repo.map(str::to_string),
                    branch: branch.map(str::to_string),
                    namespace: normalize_namespace(Some(namespace)),
                    objective: objective.map(str::to_string),
                    status: LaneStatus::Open,
                    version: 0,
                    created_at: now,
                    updated_at: now,
                })?
            }
            None => {
                return Err(StorageError::RowNotFound {
                    table: "handoff_lanes".to_string(),
                    key: lane_id.to_string(),
                }
                .into());
            }
        };

        let last_checkpoint = self.store.latest_checkpoint(lane_id)?;
        let last_session = self.get_last_session(user_id, Some(agent_id), repo, statuses)?;
        info!(%lane_id, created, "resumed handoff context");

        Ok(ResumeContext {
            lane,
            last_checkpoint,
            last_session,
            created,
        })
    }

    /// Append a checkpoint on tool completion.
    ///
    /// When the gap since the previous checkpoint exceeds the idle threshold,
    /// an `idle_pause` marker is appended first and the bound session is
    /// paused.
    pub fn auto_checkpoint(
        &self,
        request: &CheckpointRequest<'_>,
    ) -> EngramResult<CheckpointOutcome> {
        let lane_id = request.lane_id.unwrap_or_else(|| {
            Self::lane_id_for(
                request.user_id,
                request.agent_id,
                request.namespace,
                request.repo,
            )
        });
        let lane = match self.store.get_lane(lane_id)? {
            Some(lane) => lane,
            None => {
                let now = Utc::now();
                self.store.ensure_lane(&HandoffLane {
                    lane_id,
                    session_id: None,
                    user_id: request.user_id.to_string(),
                    from_agent: Some(request.agent_id.to_string()),
                    to_agent: None,
                    lane_type: request.lane_type.to_string(),
                    repo: request.repo.map(str::to_string),
                    branch: request.branch.map(str::to_string),
                    namespace: normalize_namespace(Some(request.namespace)),
                    objective: request.objective.map(str::to_string),
                    status: LaneStatus::Open,
                    version: 0,
                    created_at: now,
                    updated_at: now,
                })?
            }
        };

        let version = self
            .store
            .advance_lane_version(lane_id, request.expected_version)?
            .ok_or_else(|| StorageError::CasFailed {
                table: "handoff_lanes".to_string(),
                key: lane_id.to_string(),
            })?;

        let now = Utc::now();
        let mut idle_paused = false;
        if let Some(previous) = self.store.latest_checkpoint(lane_id)? {
            let gap = now - previous.created_at;
            if gap > chrono::Duration::minutes(self.config.idle_pause_minutes) {
                idle_paused = true;
                self.store.add_checkpoint(&HandoffCheckpoint {
                    checkpoint_id: CheckpointId::new_v4(),
                    lane_id,
                    session_id: lane.session_id,
                    agent_id: request.agent_id.to_string(),
                    event_type: "idle_pause".to_string(),
                    snapshot: serde_json::json!({
                        "idle_minutes": gap.num_minutes(),
                    }),
                    created_at: now,
                })?;
                if let Some(session_id) = lane.session_id {
                    self.store
                        .update_handoff_session_status(session_id, HandoffStatus::Paused)?;
                }
            }
        }

        let checkpoint = HandoffCheckpoint {
            checkpoint_id: CheckpointId::new_v4(),
            lane_id,
            session_id: lane.session_id,
            agent_id: request.agent_id.to_string(),
            event_type: request.event_type.to_string(),
            snapshot: request.payload.clone(),
            created_at: now,
        };
        self.store.add_checkpoint(&checkpoint)?;
        debug!(%lane_id, version, event_type = request.event_type, "appended checkpoint");

        Ok(CheckpointOutcome {
            checkpoint_id: checkpoint.checkpoint_id,
            lane_id,
            version,
            idle_paused,
        })
    }

    /// Close a lane and stamp the final session status, flushing an
    /// `agent_end` checkpoint.
    pub fn finalize_lane(
        &self,
        user_id: &str,
        agent_id: &str,
        lane_id: LaneId,
        status: HandoffStatus,
        payload: Option<serde_json::Value>,
    ) -> EngramResult<HandoffLane> {
        let lane = self.store.get_lane(lane_id)?.ok_or(StorageError::RowNotFound {
            table: "handoff_lanes".to_string(),
            key: lane_id.to_string(),
        })?;

        self.store.add_checkpoint(&HandoffCheckpoint {
            checkpoint_id: CheckpointId::new_v4(),
            lane_id,
            session_id: lane.session_id,
            agent_id: agent_id.to_string(),
            event_type: "agent_end".to_string(),
            snapshot: payload.unwrap_or_else(|| serde_json::json!({})),
            created_at: Utc::now(),
        })?;
        self.store
            .update_lane_status(lane_id, LaneStatus::Closed, None)?;

        let session = self.store.find_latest_handoff_session(
            user_id,
            Some(agent_id),
            lane.repo.as_deref(),
            Some(&[HandoffStatus::Active, HandoffStatus::Paused]),
        )?;
        if let Some(session) = session {
            self.store
                .update_handoff_session_status(session.session_id, status)?;
        }
        info!(%lane_id, status = status.as_db_str(), "finalized lane");

        self.store
            .get_lane(lane_id)?
            .ok_or_else(|| {
                StorageError::RowNotFound {
                    table: "handoff_lanes".to_string(),
                    key: lane_id.to_string(),
                }
                .into()
            })
    }
}

fn merge_distinct(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}
