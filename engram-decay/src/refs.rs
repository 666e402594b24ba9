//! Reference-aware retention

use crate::weak_dampening_factor;
use engram_core::{EngramResult, MemoryId, MemoryRefCount, RefType};
use engram_storage::Store;
use std::sync::Arc;

/// Default weak-reference TTL: two weeks.
const WEAK_REF_TTL_HOURS: i64 = 24 * 14;

/// Tracks which agents hold references on which memories.
///
/// Strong references protect a memory from forgetting entirely; weak
/// references slow its decay. Weak references expire, strong ones do not.
pub struct RefCountManager {
    store: Arc<Store>,
}

impl RefCountManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Register references for memories an agent just retrieved.
    pub fn record_retrieval_refs(
        &self,
        memory_ids: &[MemoryId],
        agent_id: &str,
        strong: bool,
    ) -> EngramResult<()> {
        let subscriber = format!("agent:{}", agent_id);
        let (ref_type, expires_at) = if strong {
            (RefType::Strong, None)
        } else {
            (
                RefType::Weak,
                Some(chrono::Utc::now() + chrono::Duration::hours(WEAK_REF_TTL_HOURS)),
            )
        };
        for memory_id in memory_ids {
            self.store
                .add_memory_subscriber(*memory_id, &subscriber, ref_type, expires_at)?;
        }
        Ok(())
    }

    /// Current counts for a memory.
    pub fn get_refcount(&self, memory_id: MemoryId) -> EngramResult<MemoryRefCount> {
        self.store.get_memory_refcount(memory_id)
    }

    /// Memories with strong references never get forgotten.
    pub fn should_protect_from_forgetting(&self, memory_id: MemoryId) -> EngramResult<bool> {
        Ok(self.get_refcount(memory_id)?.strong > 0)
    }

    /// Multiplicative decay dampening from weak references.
    pub fn weak_dampening(&self, memory_id: MemoryId) -> EngramResult<f64> {
        Ok(weak_dampening_factor(self.get_refcount(memory_id)?.weak))
    }

    /// Drop expired weak references.
    pub fn cleanup_stale_refs(&self) -> EngramResult<usize> {
        self.store.cleanup_stale_subscribers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::EngramIdType;

    #[test]
    fn test_retrieval_refs_and_protection() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = RefCountManager::new(store);
        let a = MemoryId::new_v4();
        let b = MemoryId::new_v4();

        manager.record_retrieval_refs(&[a, b], "a1", false).unwrap();
        manager.record_retrieval_refs(&[a], "a2", true).unwrap();

        assert!(manager.should_protect_from_forgetting(a).unwrap());
        assert!(!manager.should_protect_from_forgetting(b).unwrap());
        assert!(manager.weak_dampening(a).unwrap() > 1.0);
    }
}
