//! Knowledge-graph and category accessors

use crate::{MemoryKernel, SearchEntry, SearchRequest, SearchResponse};
use engram_core::{CategoryNode, EngramResult, MemoryId, MemoryRecord};
use std::collections::BTreeSet;

/// A memory related to another through shared entities.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedMemory {
    pub memory: MemoryRecord,
    pub shared_entities: Vec<String>,
}

impl MemoryKernel {
    /// Entity names mentioned by a memory.
    pub fn get_memory_entities(&self, memory_id: MemoryId) -> EngramResult<Vec<String>> {
        self.store.get_memory_entities(memory_id)
    }

    /// Memories mentioning an entity.
    pub fn get_entity_memories(
        &self,
        user_id: &str,
        entity_name: &str,
    ) -> EngramResult<Vec<MemoryRecord>> {
        let ids = self.store.get_entity_memories(user_id, entity_name)?;
        let mut loaded = self.store.get_memories_bulk(&ids)?;
        Ok(ids
            .iter()
            .filter_map(|id| loaded.remove(id))
            .filter(|memory| !memory.tombstoned)
            .collect())
    }

    /// Memories linked to this one through shared entities, ranked by how
    /// many entities they share.
    pub fn get_related_memories(
        &self,
        memory_id: MemoryId,
        limit: usize,
    ) -> EngramResult<Vec<RelatedMemory>> {
        let memory = match self.store.get_memory(memory_id)? {
            Some(memory) => memory,
            None => return Ok(Vec::new()),
        };
        let own_entities: BTreeSet<String> =
            self.store.get_memory_entities(memory_id)?.into_iter().collect();
        if own_entities.is_empty() {
            return Ok(Vec::new());
        }

        let mut related: Vec<RelatedMemory> = Vec::new();
        let mut visited: BTreeSet<MemoryId> = BTreeSet::new();
        visited.insert(memory_id);

        for entity in &own_entities {
            for candidate_id in self.store.get_entity_memories(&memory.user_id, entity)? {
                if !visited.insert(candidate_id) {
                    continue;
                }
                let Some(candidate) = self.store.get_memory(candidate_id)? else {
                    continue;
                };
                if candidate.tombstoned {
                    continue;
                }
                let candidate_entities: BTreeSet<String> = self
                    .store
                    .get_memory_entities(candidate_id)?
                    .into_iter()
                    .collect();
                let shared: Vec<String> = own_entities
                    .intersection(&candidate_entities)
                    .cloned()
                    .collect();
                if !shared.is_empty() {
                    related.push(RelatedMemory {
                        memory: candidate,
                        shared_entities: shared,
                    });
                }
            }
        }

        related.sort_by(|a, b| b.shared_entities.len().cmp(&a.shared_entities.len()));
        related.truncate(limit);
        Ok(related)
    }

    /// The current category graph.
    pub fn get_categories(&self) -> Vec<CategoryNode> {
        self.categories.snapshot()
    }

    /// Summary text for one category, regenerating on demand.
    pub fn get_category_summary(&self, name: &str, regenerate: bool) -> Option<String> {
        self.categories.category_summary(name, regenerate)
    }

    /// Decay unused categories and merge near-duplicates; persists the graph.
    pub fn apply_category_decay(&self) -> EngramResult<usize> {
        let touched = self.categories.apply_decay(chrono::Utc::now());
        self.persist_categories()?;
        Ok(touched)
    }

    /// Search constrained to memories carrying one of the given categories.
    pub fn search_by_category(
        &self,
        query: &str,
        user_id: &str,
        categories: &[String],
        limit: usize,
    ) -> EngramResult<SearchResponse> {
        let mut request = SearchRequest::new(query, user_id).with_limit(limit);
        request.categories = categories.to_vec();
        self.search(&request)
    }

    /// Count of visible (unmasked) results a category search yields; handy
    /// for category statistics surfaces.
    pub fn category_hit_count(
        &self,
        query: &str,
        user_id: &str,
        category: &str,
    ) -> EngramResult<usize> {
        let response =
            self.search_by_category(query, user_id, &[category.to_string()], 50)?;
        Ok(response
            .results
            .iter()
            .filter(|entry| !matches!(entry, SearchEntry::Masked(_)))
            .count())
    }

    /// Drop every memory, vector node, and derived row. Irreversible; meant
    /// for host-driven "forget everything" flows and test teardown.
    pub fn reset(&self) -> EngramResult<usize> {
        let memories = self
            .store
            .get_all_memories(&engram_storage::MemoryFilters {
                include_tombstoned: true,
                ..engram_storage::MemoryFilters::default()
            })?;
        let mut removed = 0;
        for memory in memories {
            if self.delete_memory_internal(memory.memory_id, true)? {
                removed += 1;
            }
        }
        self.vector.reset()?;
        Ok(removed)
    }
}
