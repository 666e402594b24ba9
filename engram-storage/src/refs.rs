//! Refcounts and subscribers

use crate::{db_err, opt_ts_from_db, ts_from_db, ts_to_db, Store};
use engram_core::{EngramResult, MemoryId, MemoryRefCount, MemorySubscriber, RefType, StorageError};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

impl Store {
    /// Register (or refresh) a subscriber reference on a memory.
    pub fn add_memory_subscriber(
        &self,
        memory_id: MemoryId,
        subscriber: &str,
        ref_type: RefType,
        expires_at: Option<engram_core::Timestamp>,
    ) -> EngramResult<()> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO memory_subscribers (id, memory_id, subscriber, ref_type, \
                 created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(memory_id, subscriber, ref_type) DO UPDATE SET \
                 expires_at = excluded.expires_at",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    memory_id.to_string(),
                    subscriber,
                    ref_type.as_db_str(),
                    ts_to_db(chrono::Utc::now()),
                    expires_at.map(ts_to_db),
                ],
            )
            .map_err(|e| db_err("add_memory_subscriber", e))?;
        }
        self.recompute_refcount(memory_id)
    }

    /// Current strong/weak counts for a memory (unexpired subscribers only).
    pub fn get_memory_refcount(&self, memory_id: MemoryId) -> EngramResult<MemoryRefCount> {
        let conn = self.lock()?;
        let refcount = conn
            .query_row(
                "SELECT strong_count, weak_count FROM memory_refcounts WHERE memory_id = ?1",
                params![memory_id.to_string()],
                |row| {
                    Ok(MemoryRefCount {
                        strong: row.get(0)?,
                        weak: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| db_err("get_memory_refcount", e))?;
        Ok(refcount.unwrap_or_default())
    }

    /// Subscribers of one memory.
    pub fn list_memory_subscribers(
        &self,
        memory_id: MemoryId,
    ) -> EngramResult<Vec<MemorySubscriber>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT subscriber, ref_type, created_at, expires_at FROM memory_subscribers \
                 WHERE memory_id = ?1 ORDER BY created_at",
            )
            .map_err(|e| db_err("list_memory_subscribers", e))?;
        let rows = stmt
            .query_map(params![memory_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(|e| db_err("list_memory_subscribers", e))?;

        let corrupt = |reason: String| StorageError::Corrupt {
            table: "memory_subscribers".to_string(),
            reason,
        };
        let mut out = Vec::new();
        for row in rows {
            let (subscriber, ref_type, created_at, expires_at) =
                row.map_err(|e| db_err("list_memory_subscribers", e))?;
            out.push(MemorySubscriber {
                memory_id,
                subscriber,
                ref_type: RefType::from_db_str(&ref_type).map_err(corrupt)?,
                created_at: ts_from_db("memory_subscribers", &created_at)?,
                expires_at: opt_ts_from_db("memory_subscribers", expires_at)?,
            });
        }
        Ok(out)
    }

    /// Drop expired subscriber rows and refresh affected refcounts.
    pub fn cleanup_stale_subscribers(&self) -> EngramResult<usize> {
        let now = ts_to_db(chrono::Utc::now());
        let affected_memories: Vec<String> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT memory_id FROM memory_subscribers \
                     WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                )
                .map_err(|e| db_err("cleanup_stale_subscribers", e))?;
            let rows = stmt
                .query_map(params![now], |row| row.get::<_, String>(0))
                .map_err(|e| db_err("cleanup_stale_subscribers", e))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| db_err("cleanup_stale_subscribers", e))?);
            }
            out
        };

        let removed = {
            let conn = self.lock()?;
            conn.execute(
                "DELETE FROM memory_subscribers WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )
            .map_err(|e| db_err("cleanup_stale_subscribers", e))?
        };

        for memory in affected_memories {
            let memory_id = crate::id_from_db("memory_subscribers", &memory)?;
            self.recompute_refcount(memory_id)?;
        }
        if removed > 0 {
            debug!(removed, "cleaned up stale subscribers");
        }
        Ok(removed)
    }

    fn recompute_refcount(&self, memory_id: MemoryId) -> EngramResult<()> {
        let conn = self.lock()?;
        let now = ts_to_db(chrono::Utc::now());
        let (strong, weak): (i64, i64) = conn
            .query_row(
                "SELECT \
                 COALESCE(SUM(CASE WHEN ref_type = 'strong' THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(CASE WHEN ref_type = 'weak' THEN 1 ELSE 0 END), 0) \
                 FROM memory_subscribers WHERE memory_id = ?1 \
                 AND (expires_at IS NULL OR expires_at > ?2)",
                params![memory_id.to_string(), now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| db_err("recompute_refcount", e))?;

        conn.execute(
            "INSERT INTO memory_refcounts (memory_id, strong_count, weak_count, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(memory_id) DO UPDATE SET strong_count = ?2, weak_count = ?3, \
             updated_at = ?4",
            params![memory_id.to_string(), strong, weak, now],
        )
        .map_err(|e| db_err("recompute_refcount", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::EngramIdType;

    #[test]
    fn test_subscriber_counts() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = MemoryId::new_v4();

        store
            .add_memory_subscriber(memory_id, "agent:a1", RefType::Weak, None)
            .unwrap();
        store
            .add_memory_subscriber(memory_id, "agent:a2", RefType::Weak, None)
            .unwrap();
        store
            .add_memory_subscriber(memory_id, "agent:a1", RefType::Strong, None)
            .unwrap();

        let refcount = store.get_memory_refcount(memory_id).unwrap();
        assert_eq!(refcount.strong, 1);
        assert_eq!(refcount.weak, 2);

        // Re-registering the same (memory, subscriber, type) does not double.
        store
            .add_memory_subscriber(memory_id, "agent:a1", RefType::Weak, None)
            .unwrap();
        assert_eq!(store.get_memory_refcount(memory_id).unwrap().weak, 2);
    }

    #[test]
    fn test_stale_cleanup() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = MemoryId::new_v4();
        let past = Utc::now() - chrono::Duration::hours(1);

        store
            .add_memory_subscriber(memory_id, "agent:a1", RefType::Weak, Some(past))
            .unwrap();
        store
            .add_memory_subscriber(memory_id, "agent:a2", RefType::Weak, None)
            .unwrap();

        // Expired subscriber is already excluded from the aggregate.
        assert_eq!(store.get_memory_refcount(memory_id).unwrap().weak, 1);
        assert_eq!(store.cleanup_stale_subscribers().unwrap(), 1);
        assert_eq!(store.get_memory_refcount(memory_id).unwrap().weak, 1);
        assert_eq!(store.list_memory_subscribers(memory_id).unwrap().len(), 1);
    }
}
