//! The sleep cycle

use crate::facade::day_bounds;
use crate::{MemoryKernel, SleepCycleRequest, SleepCycleReport, UserSleepStats};
use chrono::Utc;
use engram_core::{Capability, EngramResult, MemoryEventKind, MemoryTier};
use engram_episodic::ViewIngest;
use engram_storage::{MemoryFilters, MemoryPatch, SceneFilters};
use std::collections::BTreeMap;
use tracing::{info, warn};

impl MemoryKernel {
    /// One sleep cycle: episodic backfill, importance promotion, digest
    /// build, decay + trace cascade, and stale-ref cleanup.
    ///
    /// The host schedules this; the kernel never spawns a thread for it.
    pub fn run_sleep_cycle(&self, request: &SleepCycleRequest) -> EngramResult<SleepCycleReport> {
        if request.token.is_some() || request.agent_id.is_some() {
            self.gateway.authenticate(
                request.token.as_deref(),
                request.user_id.as_deref(),
                request.agent_id.as_deref(),
                request.agent_id.is_some(),
                &[Capability::RunSleepCycle],
            )?;
        }

        let date = request
            .date
            .unwrap_or_else(|| (Utc::now() - chrono::Duration::days(1)).date_naive());
        let users = match &request.user_id {
            Some(user_id) => vec![user_id.clone()],
            None => {
                let mut users = self.store.list_user_ids()?;
                if users.is_empty() {
                    users.push("default".to_string());
                }
                users
            }
        };

        let (day_start, day_end) = day_bounds(date);
        let mut report = SleepCycleReport {
            date,
            users: BTreeMap::new(),
            stale_refs_removed: 0,
        };

        for user_id in users {
            let mut stats = UserSleepStats::default();
            let day_memories = self.store.get_all_memories(&MemoryFilters {
                user_id: Some(user_id.clone()),
                created_after: Some(day_start),
                created_before: Some(day_end),
                ..MemoryFilters::default()
            })?;

            // Backfill CAST views for memories that never joined a scene.
            for memory in &day_memories {
                if memory.scene_id.is_some() {
                    continue;
                }
                let outcome = self.episodic.ingest_memory_as_view(&ViewIngest {
                    user_id: &user_id,
                    agent_id: memory.agent_id.as_deref(),
                    memory_id: memory.memory_id,
                    content: &memory.content,
                    metadata: &memory.metadata,
                    namespace: &memory.namespace,
                    timestamp: memory.created_at,
                    importance: memory.importance(),
                    scope: memory.confidentiality_scope,
                });
                match outcome {
                    Ok(_) => stats.views_ingested += 1,
                    // Non-fatal: keep the sleep cycle robust.
                    Err(e) => warn!(memory_id = %memory.memory_id, error = %e, "view backfill failed"),
                }
            }

            // Promote important or strong day memories to the long tier.
            for memory in &day_memories {
                if memory.tier == MemoryTier::Lml {
                    continue;
                }
                if memory.importance() >= 0.8 || memory.strength >= 0.85 {
                    let promoted = self.store.update_memory(
                        memory.memory_id,
                        &MemoryPatch {
                            tier: Some(MemoryTier::Lml),
                            ..MemoryPatch::default()
                        },
                    )?;
                    if promoted {
                        self.store.record_event(
                            memory.memory_id,
                            MemoryEventKind::Promote,
                            None,
                            None,
                            Some(MemoryTier::Sml),
                            Some(MemoryTier::Lml),
                        )?;
                        stats.promoted += 1;
                    }
                }
            }

            let payload = self.build_digest_payload(&user_id, date)?;
            self.store.upsert_daily_digest(&user_id, date, &payload)?;
            stats.digests_upserted += 1;
            stats.scenes_considered = self
                .store
                .get_scenes(&SceneFilters {
                    user_id: Some(user_id.clone()),
                    start_after: Some(day_start),
                    start_before: Some(day_end),
                    limit: Some(100),
                    ..SceneFilters::default()
                })?
                .len();

            if request.apply_decay {
                let decay = self.decay.apply_decay(Some(&user_id))?;
                stats.decayed = decay.decayed;
                stats.forgotten = decay.forgotten;
                stats.decay_promoted = decay.promoted;
            }
            stats.trace_cascades = self.decay.cascade_all(Some(&user_id), request.deep_sleep)?;

            report.users.insert(user_id, stats);
        }

        if request.cleanup_stale_refs {
            report.stale_refs_removed = self.decay.refs().cleanup_stale_refs()?;
        }

        info!(
            date = %date,
            users = report.users.len(),
            stale_refs_removed = report.stale_refs_removed,
            "sleep cycle complete"
        );
        Ok(report)
    }

    /// Standalone decay sweep, outside the full sleep cycle.
    pub fn apply_decay(&self, user_id: Option<&str>) -> EngramResult<engram_decay::DecayStats> {
        self.decay.apply_decay(user_id)
    }
}
