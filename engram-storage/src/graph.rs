//! Knowledge-graph entity and link tables

use crate::{db_err, from_json, id_from_db, to_json, ts_from_db, ts_to_db, Store};
use engram_core::{
    EngramIdType, EngramResult, EntityLink, EntityNodeId, GraphEntity, MemoryId,
};
use rusqlite::{params, OptionalExtension};

impl Store {
    /// Get-or-create an entity by (user, name).
    pub fn ensure_entity(
        &self,
        user_id: &str,
        name: &str,
        kind: &str,
    ) -> EngramResult<EntityNodeId> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM entities WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("ensure_entity", e))?;
        if let Some(id) = existing {
            return id_from_db("entities", &id).map_err(Into::into);
        }

        let id = EntityNodeId::new_v4();
        conn.execute(
            "INSERT OR IGNORE INTO entities (id, user_id, name, kind, aliases, created_at) \
             VALUES (?1, ?2, ?3, ?4, '[]', ?5)",
            params![
                id.to_string(),
                user_id,
                name,
                kind,
                ts_to_db(chrono::Utc::now()),
            ],
        )
        .map_err(|e| db_err("ensure_entity", e))?;

        let winner: String = conn
            .query_row(
                "SELECT id FROM entities WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get(0),
            )
            .map_err(|e| db_err("ensure_entity", e))?;
        id_from_db("entities", &winner).map_err(Into::into)
    }

    /// Link an entity to a memory. Duplicate links are ignored.
    pub fn add_entity_link(
        &self,
        entity_id: EntityNodeId,
        memory_id: MemoryId,
        link_type: &str,
        weight: f64,
    ) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO entity_links (entity_id, memory_id, link_type, weight, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entity_id.to_string(),
                memory_id.to_string(),
                link_type,
                weight,
                ts_to_db(chrono::Utc::now()),
            ],
        )
        .map_err(|e| db_err("add_entity_link", e))?;
        Ok(())
    }

    /// Entity names linked to a memory.
    pub fn get_memory_entities(&self, memory_id: MemoryId) -> EngramResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT e.name FROM entity_links l JOIN entities e ON e.id = l.entity_id \
                 WHERE l.memory_id = ?1 ORDER BY e.name",
            )
            .map_err(|e| db_err("get_memory_entities", e))?;
        let rows = stmt
            .query_map(params![memory_id.to_string()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| db_err("get_memory_entities", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| db_err("get_memory_entities", e))?);
        }
        Ok(out)
    }

    /// Memory ids linked to an entity name.
    pub fn get_entity_memories(&self, user_id: &str, name: &str) -> EngramResult<Vec<MemoryId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT l.memory_id FROM entity_links l JOIN entities e ON e.id = l.entity_id \
                 WHERE e.user_id = ?1 AND e.name = ?2",
            )
            .map_err(|e| db_err("get_entity_memories", e))?;
        let rows = stmt
            .query_map(params![user_id, name], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("get_entity_memories", e))?;
        let mut out = Vec::new();
        for row in rows {
            let text = row.map_err(|e| db_err("get_entity_memories", e))?;
            out.push(id_from_db("entity_links", &text)?);
        }
        Ok(out)
    }

    /// Full entity rows for a user.
    pub fn list_entities(&self, user_id: &str) -> EngramResult<Vec<GraphEntity>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, kind, aliases, created_at FROM entities \
                 WHERE user_id = ?1 ORDER BY name",
            )
            .map_err(|e| db_err("list_entities", e))?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| db_err("list_entities", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, user_id, name, kind, aliases, created_at) =
                row.map_err(|e| db_err("list_entities", e))?;
            out.push(GraphEntity {
                entity_id: id_from_db("entities", &id)?,
                user_id,
                name,
                kind,
                aliases: from_json("entities", &aliases)?,
                created_at: ts_from_db("entities", &created_at)?,
            });
        }
        Ok(out)
    }

    /// All links of one memory.
    pub fn get_entity_links_for_memory(
        &self,
        memory_id: MemoryId,
    ) -> EngramResult<Vec<EntityLink>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity_id, link_type, weight, created_at FROM entity_links \
                 WHERE memory_id = ?1",
            )
            .map_err(|e| db_err("get_entity_links_for_memory", e))?;
        let rows = stmt
            .query_map(params![memory_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| db_err("get_entity_links_for_memory", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (entity_id, link_type, weight, created_at) =
                row.map_err(|e| db_err("get_entity_links_for_memory", e))?;
            out.push(EntityLink {
                entity_id: id_from_db("entity_links", &entity_id)?,
                memory_id,
                link_type,
                weight,
                created_at: ts_from_db("entity_links", &created_at)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_dedup_and_links() {
        let store = Store::open_in_memory().unwrap();
        let memory = MemoryId::new_v4();
        let other = MemoryId::new_v4();

        let bob = store.ensure_entity("u1", "Bob", "person").unwrap();
        let again = store.ensure_entity("u1", "Bob", "person").unwrap();
        assert_eq!(bob, again);

        store
            .add_entity_link(bob, memory, "mentioned_in", 1.0)
            .unwrap();
        store
            .add_entity_link(bob, memory, "mentioned_in", 1.0)
            .unwrap();
        store
            .add_entity_link(bob, other, "mentioned_in", 1.0)
            .unwrap();

        assert_eq!(store.get_memory_entities(memory).unwrap(), vec!["Bob"]);
        assert_eq!(store.get_entity_memories("u1", "Bob").unwrap().len(), 2);
        assert_eq!(store.get_entity_links_for_memory(memory).unwrap().len(), 1);
    }
}
