//! Decay sweep over the durable store

use crate::{
    cascade_traces, decay_traces, decayed_strength, should_forget, should_promote, RefCountManager,
};
use engram_core::{
    DecayConfig, EngramResult, MemoryEventKind, MemoryTier, StorageConfig, TraceConfig,
};
use engram_storage::{MemoryFilters, MemoryPatch, Store};
use std::sync::Arc;
use tracing::{debug, info};

/// Counters from one decay sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecayStats {
    pub decayed: usize,
    pub forgotten: usize,
    pub promoted: usize,
    pub cascaded: usize,
}

/// Applies decay, forgetting, promotion, and the trace cascade.
pub struct DecayEngine {
    store: Arc<Store>,
    refs: RefCountManager,
    decay: DecayConfig,
    traces: TraceConfig,
    use_tombstone: bool,
}

impl DecayEngine {
    pub fn new(
        store: Arc<Store>,
        decay: DecayConfig,
        traces: TraceConfig,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            refs: RefCountManager::new(Arc::clone(&store)),
            store,
            decay,
            traces,
            use_tombstone: storage.use_tombstone_deletion,
        }
    }

    /// One decay sweep over a user's (or everyone's) memories.
    ///
    /// Immutable memories are skipped entirely; memories holding strong
    /// references survive even below the forgetting threshold.
    pub fn apply_decay(&self, user_id: Option<&str>) -> EngramResult<DecayStats> {
        if !self.decay.enable_forgetting {
            return Ok(DecayStats::default());
        }

        let now = chrono::Utc::now();
        let filters = MemoryFilters {
            user_id: user_id.map(str::to_string),
            ..MemoryFilters::default()
        };

        let mut stats = DecayStats::default();
        for memory in self.store.get_all_memories(&filters)? {
            if memory.immutable {
                continue;
            }

            let elapsed_days =
                (now - memory.last_accessed).num_seconds().max(0) as f64 / 86_400.0;
            let refcount = self.refs.get_refcount(memory.memory_id)?;
            let new_strength = decayed_strength(
                memory.strength,
                elapsed_days,
                memory.tier,
                memory.access_count,
                refcount.weak,
                &self.decay,
            );

            if should_forget(new_strength, &self.decay) && refcount.strong == 0 {
                self.store
                    .delete_memory(memory.memory_id, self.use_tombstone)?;
                self.store.record_event(
                    memory.memory_id,
                    MemoryEventKind::Forget,
                    Some(memory.strength),
                    Some(0.0),
                    None,
                    None,
                )?;
                stats.forgotten += 1;
                continue;
            }

            let mut patch = MemoryPatch::default();
            if (new_strength - memory.strength).abs() > f64::EPSILON {
                patch.strength = Some(new_strength);
                stats.decayed += 1;
            }
            if self.traces.enable_multi_trace {
                if let Some(traces) = memory.traces {
                    patch.traces = Some(decay_traces(
                        traces,
                        elapsed_days,
                        memory.access_count,
                        &self.traces,
                    ));
                }
            }
            if patch.strength.is_some() || patch.traces.is_some() {
                self.store.update_memory(memory.memory_id, &patch)?;
                if patch.strength.is_some() {
                    self.store.record_event(
                        memory.memory_id,
                        MemoryEventKind::Decay,
                        Some(memory.strength),
                        Some(new_strength),
                        None,
                        None,
                    )?;
                }
            }

            if should_promote(memory.tier, memory.access_count, new_strength, &self.decay) {
                self.store.update_memory(
                    memory.memory_id,
                    &MemoryPatch {
                        tier: Some(MemoryTier::Lml),
                        ..MemoryPatch::default()
                    },
                )?;
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

        if self.use_tombstone {
            self.store.purge_tombstoned()?;
        }
        self.store
            .log_decay(stats.decayed, stats.forgotten, stats.promoted)?;
        info!(
            decayed = stats.decayed,
            forgotten = stats.forgotten,
            promoted = stats.promoted,
            "decay sweep complete"
        );
        Ok(stats)
    }

    /// Cascade traces for every traced memory of a user (sleep cycle step).
    pub fn cascade_all(&self, user_id: Option<&str>, deep_sleep: bool) -> EngramResult<usize> {
        if !self.traces.enable_multi_trace {
            return Ok(0);
        }
        let filters = MemoryFilters {
            user_id: user_id.map(str::to_string),
            ..MemoryFilters::default()
        };

        let mut cascaded = 0;
        for memory in self.store.get_all_memories(&filters)? {
            let Some(traces) = memory.traces else {
                continue;
            };
            let next = cascade_traces(traces, deep_sleep, &self.traces);
            self.store.update_memory(
                memory.memory_id,
                &MemoryPatch {
                    traces: Some(next),
                    ..MemoryPatch::default()
                },
            )?;
            cascaded += 1;
        }
        debug!(cascaded, deep_sleep, "trace cascade complete");
        Ok(cascaded)
    }

    /// Shared access to the refcount manager.
    pub fn refs(&self) -> &RefCountManager {
        &self.refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{MemoryRecord, MemoryTraces, RefType};

    fn engine(store: Arc<Store>) -> DecayEngine {
        DecayEngine::new(
            store,
            DecayConfig::default(),
            TraceConfig::default(),
            &StorageConfig::default(),
        )
    }

    fn aged_memory(user: &str, strength: f64, days_ago: i64) -> MemoryRecord {
        let past = chrono::Utc::now() - chrono::Duration::days(days_ago);
        let mut memory = MemoryRecord::new(user, "some fact", past).with_strength(strength);
        memory.last_accessed = past;
        memory
    }

    #[test]
    fn test_sweep_decays_and_forgets() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = engine(Arc::clone(&store));

        let fresh = store.add_memory(&aged_memory("u1", 1.0, 2)).unwrap();
        // 0.06 strength decays below the 0.05 threshold after a year.
        let stale = store.add_memory(&aged_memory("u1", 0.06, 365)).unwrap();

        let stats = engine.apply_decay(Some("u1")).unwrap();
        assert_eq!(stats.forgotten, 1);
        assert!(stats.decayed >= 1);

        let fresh_row = store.get_memory(fresh).unwrap().unwrap();
        assert!(fresh_row.strength < 1.0);
        assert!(!fresh_row.tombstoned);

        let stale_row = store.get_memory(stale).unwrap().unwrap();
        assert!(stale_row.tombstoned);
    }

    #[test]
    fn test_immutable_memories_never_decay() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = engine(Arc::clone(&store));

        let mut memory = aged_memory("u1", 1.0, 100);
        memory.immutable = true;
        let id = store.add_memory(&memory).unwrap();

        engine.apply_decay(Some("u1")).unwrap();
        assert_eq!(store.get_memory(id).unwrap().unwrap().strength, 1.0);
    }

    #[test]
    fn test_strong_ref_protects_from_forgetting() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = engine(Arc::clone(&store));

        let id = store.add_memory(&aged_memory("u1", 0.06, 365)).unwrap();
        store
            .add_memory_subscriber(id, "agent:keeper", RefType::Strong, None)
            .unwrap();

        let stats = engine.apply_decay(Some("u1")).unwrap();
        assert_eq!(stats.forgotten, 0);
        assert!(!store.get_memory(id).unwrap().unwrap().tombstoned);
    }

    #[test]
    fn test_promotion_during_sweep() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = engine(Arc::clone(&store));

        let mut memory = aged_memory("u1", 0.9, 0);
        memory.access_count = 12;
        let id = store.add_memory(&memory).unwrap();

        let stats = engine.apply_decay(Some("u1")).unwrap();
        assert_eq!(stats.promoted, 1);
        assert_eq!(
            store.get_memory(id).unwrap().unwrap().tier,
            MemoryTier::Lml
        );
    }

    #[test]
    fn test_cascade_all() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = engine(Arc::clone(&store));

        let mut memory = aged_memory("u1", 1.0, 0);
        memory.traces = Some(MemoryTraces {
            s_fast: 1.0,
            s_mid: 0.0,
            s_slow: 0.0,
            effective: 0.5,
        });
        let id = store.add_memory(&memory).unwrap();

        assert_eq!(engine.cascade_all(Some("u1"), true).unwrap(), 1);
        let traces = store.get_memory(id).unwrap().unwrap().traces.unwrap();
        assert!(traces.s_fast < 1.0);
        assert!(traces.s_mid > 0.0);
        assert!(traces.s_slow > 0.0);
    }
}
