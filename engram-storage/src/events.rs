//! Memory event log and decay log

use crate::{db_err, id_from_db, ts_from_db, ts_to_db, Store};
use engram_core::{
    EngramIdType, EngramResult, EventId, MemoryEvent, MemoryEventKind, MemoryId, MemoryTier,
    StorageError,
};
use rusqlite::params;

impl Store {
    /// Append one row to the memory event log.
    pub fn log_event(&self, event: &MemoryEvent) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO memory_events (id, memory_id, kind, old_strength, new_strength, \
             old_tier, new_tier, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.event_id.to_string(),
                event.memory_id.to_string(),
                event.kind.as_db_str(),
                event.old_strength,
                event.new_strength,
                event.old_tier.map(|t| t.as_db_str()),
                event.new_tier.map(|t| t.as_db_str()),
                ts_to_db(event.created_at),
            ],
        )
        .map_err(|e| db_err("log_event", e))?;
        Ok(())
    }

    /// Record one decay sweep's counters.
    pub fn log_decay(&self, decayed: usize, forgotten: usize, promoted: usize) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO decay_log (decayed, forgotten, promoted, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                decayed as i64,
                forgotten as i64,
                promoted as i64,
                ts_to_db(chrono::Utc::now()),
            ],
        )
        .map_err(|e| db_err("log_decay", e))?;
        Ok(())
    }

    /// Events for one memory, oldest first.
    pub fn get_history(&self, memory_id: MemoryId) -> EngramResult<Vec<MemoryEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, memory_id, kind, old_strength, new_strength, old_tier, new_tier, \
                 created_at FROM memory_events WHERE memory_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(|e| db_err("get_history", e))?;
        let rows = stmt
            .query_map(params![memory_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(|e| db_err("get_history", e))?;

        let corrupt = |reason: String| StorageError::Corrupt {
            table: "memory_events".to_string(),
            reason,
        };
        let mut out = Vec::new();
        for row in rows {
            let (id, memory_id, kind, old_strength, new_strength, old_tier, new_tier, created_at) =
                row.map_err(|e| db_err("get_history", e))?;
            out.push(MemoryEvent {
                event_id: id_from_db::<EventId>("memory_events", &id)?,
                memory_id: id_from_db("memory_events", &memory_id)?,
                kind: MemoryEventKind::from_db_str(&kind).map_err(corrupt)?,
                old_strength,
                new_strength,
                old_tier: old_tier
                    .map(|t| MemoryTier::from_db_str(&t).map_err(corrupt))
                    .transpose()?,
                new_tier: new_tier
                    .map(|t| MemoryTier::from_db_str(&t).map_err(corrupt))
                    .transpose()?,
                created_at: ts_from_db("memory_events", &created_at)?,
            });
        }
        Ok(out)
    }

    /// Convenience constructor + append for the common case.
    pub fn record_event(
        &self,
        memory_id: MemoryId,
        kind: MemoryEventKind,
        old_strength: Option<f64>,
        new_strength: Option<f64>,
        old_tier: Option<MemoryTier>,
        new_tier: Option<MemoryTier>,
    ) -> EngramResult<()> {
        self.log_event(&MemoryEvent {
            event_id: EventId::new_v4(),
            memory_id,
            kind,
            old_strength,
            new_strength,
            old_tier,
            new_tier,
            created_at: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::MemoryRecord;

    #[test]
    fn test_event_log_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .add_memory(&MemoryRecord::new("u1", "text", chrono::Utc::now()))
            .unwrap();

        store
            .record_event(id, MemoryEventKind::Add, None, Some(1.0), None, None)
            .unwrap();
        store
            .record_event(
                id,
                MemoryEventKind::Promote,
                None,
                None,
                Some(MemoryTier::Sml),
                Some(MemoryTier::Lml),
            )
            .unwrap();

        let history = store.get_history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, MemoryEventKind::Add);
        assert_eq!(history[1].new_tier, Some(MemoryTier::Lml));
    }

    #[test]
    fn test_decay_log() {
        let store = Store::open_in_memory().unwrap();
        store.log_decay(5, 1, 2).unwrap();
    }
}
