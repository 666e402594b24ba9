//! Category graph persistence

use crate::{db_err, from_json, id_from_db, opt_id_from_db, opt_ts_from_db, to_json, ts_to_db, Store};
use engram_core::{CategoryId, CategoryNode, EngramResult};
use rusqlite::params;

impl Store {
    /// Insert or replace a category node.
    pub fn upsert_category(&self, node: &CategoryNode) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO categories (id, name, parent, keywords, strength, memory_count, \
             last_accessed, summary) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(name) DO UPDATE SET parent = excluded.parent, \
             keywords = excluded.keywords, strength = excluded.strength, \
             memory_count = excluded.memory_count, last_accessed = excluded.last_accessed, \
             summary = excluded.summary",
            params![
                node.category_id.to_string(),
                node.name,
                node.parent.map(|p| p.to_string()),
                to_json(&node.keywords),
                node.strength,
                node.memory_count,
                node.last_accessed.map(ts_to_db),
                node.summary,
            ],
        )
        .map_err(|e| db_err("upsert_category", e))?;
        Ok(())
    }

    /// Load the whole category graph.
    pub fn list_categories(&self) -> EngramResult<Vec<CategoryNode>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, parent, keywords, strength, memory_count, last_accessed, \
                 summary FROM categories ORDER BY name",
            )
            .map_err(|e| db_err("list_categories", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .map_err(|e| db_err("list_categories", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, parent, keywords, strength, memory_count, last_accessed, summary) =
                row.map_err(|e| db_err("list_categories", e))?;
            out.push(CategoryNode {
                category_id: id_from_db("categories", &id)?,
                name,
                parent: opt_id_from_db::<CategoryId>("categories", parent)?,
                keywords: from_json("categories", &keywords)?,
                strength,
                memory_count,
                last_accessed: opt_ts_from_db("categories", last_accessed)?,
                summary,
            });
        }
        Ok(out)
    }

    /// Delete a category node by name (used by merges).
    pub fn delete_category(&self, name: &str) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM categories WHERE name = ?1", params![name])
            .map_err(|e| db_err("delete_category", e))?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::EngramIdType;

    #[test]
    fn test_category_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let node = CategoryNode {
            category_id: CategoryId::new_v4(),
            name: "preference".to_string(),
            parent: None,
            keywords: vec!["prefer".to_string(), "favorite".to_string()],
            strength: 1.0,
            memory_count: 0,
            last_accessed: None,
            summary: None,
        };
        store.upsert_category(&node).unwrap();

        let mut updated = node.clone();
        updated.memory_count = 3;
        store.upsert_category(&updated).unwrap();

        let loaded = store.list_categories().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].memory_count, 3);
        assert!(store.delete_category("preference").unwrap());
    }
}
