//! Memory table operations

use crate::{
    db_err, from_json, id_from_db, is_unique_violation, opt_id_from_db, opt_ts_from_db, to_json,
    ts_from_db, ts_to_db, Store,
};
use engram_core::{
    ConfidentialityScope, EchoMetadata, EngramIdType, EngramResult, MemoryId, MemoryKind,
    MemoryRecord, MemoryTier, MemoryTraces, SceneId, SharingScope, StorageError, Timestamp,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::debug;

const MEMORY_COLUMNS: &str = "id, user_id, agent_id, run_id, app_id, content, tier, strength, \
     s_fast, s_mid, s_slow, effective_strength, access_count, last_accessed, created_at, \
     updated_at, namespace, confidentiality_scope, memory_kind, sharing_scope, immutable, \
     expiration_date, source_type, source_app, source_event_id, categories, echo, scene_id, \
     metadata, tombstoned";

/// Filters for bulk memory queries.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilters {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
    pub app_id: Option<String>,
    pub tier: Option<MemoryTier>,
    pub namespace: Option<String>,
    pub created_after: Option<Timestamp>,
    pub created_before: Option<Timestamp>,
    pub include_tombstoned: bool,
}

/// Update payload for memories. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub tier: Option<MemoryTier>,
    pub strength: Option<f64>,
    pub traces: Option<MemoryTraces>,
    pub categories: Option<Vec<String>>,
    pub echo: Option<EchoMetadata>,
    /// `Some(None)` detaches the memory from its scene.
    pub scene_id: Option<Option<SceneId>>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub namespace: Option<String>,
    pub confidentiality_scope: Option<ConfidentialityScope>,
    pub sharing_scope: Option<SharingScope>,
    pub memory_kind: Option<MemoryKind>,
    pub source_type: Option<String>,
    pub source_app: Option<String>,
    pub source_event_id: Option<String>,
    pub last_accessed: Option<Timestamp>,
    pub tombstoned: Option<bool>,
}

/// Aggregate counts for `get_stats`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryStats {
    pub total: i64,
    pub sml_count: i64,
    pub lml_count: i64,
    pub tombstoned: i64,
    pub avg_strength: f64,
}

struct RawMemory {
    id: String,
    user_id: String,
    agent_id: Option<String>,
    run_id: Option<String>,
    app_id: Option<String>,
    content: String,
    tier: String,
    strength: f64,
    s_fast: Option<f64>,
    s_mid: Option<f64>,
    s_slow: Option<f64>,
    effective_strength: Option<f64>,
    access_count: i64,
    last_accessed: String,
    created_at: String,
    updated_at: String,
    namespace: String,
    confidentiality_scope: String,
    memory_kind: Option<String>,
    sharing_scope: String,
    immutable: bool,
    expiration_date: Option<String>,
    source_type: Option<String>,
    source_app: Option<String>,
    source_event_id: Option<String>,
    categories: String,
    echo: Option<String>,
    scene_id: Option<String>,
    metadata: String,
    tombstoned: bool,
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawMemory> {
    Ok(RawMemory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        run_id: row.get(3)?,
        app_id: row.get(4)?,
        content: row.get(5)?,
        tier: row.get(6)?,
        strength: row.get(7)?,
        s_fast: row.get(8)?,
        s_mid: row.get(9)?,
        s_slow: row.get(10)?,
        effective_strength: row.get(11)?,
        access_count: row.get(12)?,
        last_accessed: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        namespace: row.get(16)?,
        confidentiality_scope: row.get(17)?,
        memory_kind: row.get(18)?,
        sharing_scope: row.get(19)?,
        immutable: row.get(20)?,
        expiration_date: row.get(21)?,
        source_type: row.get(22)?,
        source_app: row.get(23)?,
        source_event_id: row.get(24)?,
        categories: row.get(25)?,
        echo: row.get(26)?,
        scene_id: row.get(27)?,
        metadata: row.get(28)?,
        tombstoned: row.get(29)?,
    })
}

fn raw_to_memory(raw: RawMemory) -> Result<MemoryRecord, StorageError> {
    let corrupt = |reason: String| StorageError::Corrupt {
        table: "memories".to_string(),
        reason,
    };

    let traces = match (raw.s_fast, raw.s_mid, raw.s_slow) {
        (Some(s_fast), Some(s_mid), Some(s_slow)) => Some(MemoryTraces {
            s_fast,
            s_mid,
            s_slow,
            effective: raw.effective_strength.unwrap_or(s_fast),
        }),
        _ => None,
    };

    Ok(MemoryRecord {
        memory_id: id_from_db("memories", &raw.id)?,
        user_id: raw.user_id,
        agent_id: raw.agent_id,
        run_id: raw.run_id,
        app_id: raw.app_id,
        content: raw.content,
        tier: MemoryTier::from_db_str(&raw.tier).map_err(corrupt)?,
        strength: raw.strength,
        traces,
        access_count: raw.access_count,
        last_accessed: ts_from_db("memories", &raw.last_accessed)?,
        created_at: ts_from_db("memories", &raw.created_at)?,
        updated_at: ts_from_db("memories", &raw.updated_at)?,
        namespace: raw.namespace,
        confidentiality_scope: ConfidentialityScope::from_db_str(&raw.confidentiality_scope)
            .map_err(corrupt)?,
        memory_kind: raw
            .memory_kind
            .map(|k| MemoryKind::from_db_str(&k).map_err(corrupt))
            .transpose()?,
        sharing_scope: SharingScope::from_db_str(&raw.sharing_scope).map_err(corrupt)?,
        immutable: raw.immutable,
        expiration_date: raw
            .expiration_date
            .map(|d| {
                d.parse::<chrono::NaiveDate>()
                    .map_err(|e| corrupt(format!("bad expiration_date: {}", e)))
            })
            .transpose()?,
        source_type: raw.source_type,
        source_app: raw.source_app,
        source_event_id: raw.source_event_id,
        categories: from_json("memories", &raw.categories)?,
        echo: raw
            .echo
            .map(|e| from_json("memories", &e))
            .transpose()?,
        scene_id: opt_id_from_db("memories", raw.scene_id)?,
        metadata: from_json("memories", &raw.metadata)?,
        tombstoned: raw.tombstoned,
    })
}

impl Store {
    /// Insert a memory row and return its id.
    ///
    /// The (source_event_id, namespace, source_app) uniqueness is enforced by
    /// a partial index; a violation maps to `InsertFailed`.
    pub fn add_memory(&self, memory: &MemoryRecord) -> EngramResult<MemoryId> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO memories (id, user_id, agent_id, run_id, app_id, content, tier, \
             strength, s_fast, s_mid, s_slow, effective_strength, access_count, last_accessed, \
             created_at, updated_at, namespace, confidentiality_scope, memory_kind, \
             sharing_scope, immutable, expiration_date, source_type, source_app, \
             source_event_id, categories, echo, scene_id, metadata, tombstoned) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
             ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
            params![
                memory.memory_id.to_string(),
                memory.user_id,
                memory.agent_id,
                memory.run_id,
                memory.app_id,
                memory.content,
                memory.tier.as_db_str(),
                memory.strength,
                memory.traces.map(|t| t.s_fast),
                memory.traces.map(|t| t.s_mid),
                memory.traces.map(|t| t.s_slow),
                memory.traces.map(|t| t.effective),
                memory.access_count,
                ts_to_db(memory.last_accessed),
                ts_to_db(memory.created_at),
                ts_to_db(memory.updated_at),
                memory.namespace,
                memory.confidentiality_scope.as_db_str(),
                memory.memory_kind.map(|k| k.as_db_str()),
                memory.sharing_scope.as_db_str(),
                memory.immutable,
                memory.expiration_date.map(|d| d.to_string()),
                memory.source_type,
                memory.source_app,
                memory.source_event_id,
                to_json(&memory.categories),
                memory.echo.as_ref().map(to_json),
                memory.scene_id.map(|s| s.to_string()),
                to_json(&memory.metadata),
                memory.tombstoned,
            ],
        );
        match result {
            Ok(_) => Ok(memory.memory_id),
            Err(e) if is_unique_violation(&e) => Err(StorageError::InsertFailed {
                table: "memories".to_string(),
                reason: format!("unique constraint: {}", e),
            }
            .into()),
            Err(e) => Err(db_err("add_memory", e).into()),
        }
    }

    /// Fetch one memory by id.
    pub fn get_memory(&self, id: MemoryId) -> EngramResult<Option<MemoryRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS),
                params![id.to_string()],
                read_raw,
            )
            .optional()
            .map_err(|e| db_err("get_memory", e))?;
        raw.map(raw_to_memory).transpose().map_err(Into::into)
    }

    /// Batch-fetch memories by id.
    pub fn get_memories_bulk(
        &self,
        ids: &[MemoryId],
    ) -> EngramResult<HashMap<MemoryId, MemoryRecord>> {
        let mut out = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(out);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM memories WHERE id IN ({})",
                MEMORY_COLUMNS, placeholders
            ))
            .map_err(|e| db_err("get_memories_bulk", e))?;
        let rows = stmt
            .query_map(
                params_from_iter(ids.iter().map(|id| id.to_string())),
                read_raw,
            )
            .map_err(|e| db_err("get_memories_bulk", e))?;
        for row in rows {
            let memory = raw_to_memory(row.map_err(|e| db_err("get_memories_bulk", e))?)?;
            out.insert(memory.memory_id, memory);
        }
        Ok(out)
    }

    /// List memories matching the filters, newest first.
    pub fn get_all_memories(&self, filters: &MemoryFilters) -> EngramResult<Vec<MemoryRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(user_id) = &filters.user_id {
            clauses.push("user_id = ?");
            values.push(Value::Text(user_id.clone()));
        }
        if let Some(agent_id) = &filters.agent_id {
            clauses.push("agent_id = ?");
            values.push(Value::Text(agent_id.clone()));
        }
        if let Some(run_id) = &filters.run_id {
            clauses.push("run_id = ?");
            values.push(Value::Text(run_id.clone()));
        }
        if let Some(app_id) = &filters.app_id {
            clauses.push("app_id = ?");
            values.push(Value::Text(app_id.clone()));
        }
        if let Some(tier) = filters.tier {
            clauses.push("tier = ?");
            values.push(Value::Text(tier.as_db_str().to_string()));
        }
        if let Some(namespace) = &filters.namespace {
            clauses.push("namespace = ?");
            values.push(Value::Text(namespace.clone()));
        }
        if let Some(after) = filters.created_after {
            clauses.push("created_at >= ?");
            values.push(Value::Text(ts_to_db(after)));
        }
        if let Some(before) = filters.created_before {
            clauses.push("created_at <= ?");
            values.push(Value::Text(ts_to_db(before)));
        }
        if !filters.include_tombstoned {
            clauses.push("tombstoned = 0");
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM memories{} ORDER BY created_at DESC",
                MEMORY_COLUMNS, where_clause
            ))
            .map_err(|e| db_err("get_all_memories", e))?;
        let rows = stmt
            .query_map(params_from_iter(values), read_raw)
            .map_err(|e| db_err("get_all_memories", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(raw_to_memory(
                row.map_err(|e| db_err("get_all_memories", e))?,
            )?);
        }
        Ok(out)
    }

    /// Look up a memory by its idempotency key.
    pub fn get_memory_by_source_event(
        &self,
        user_id: &str,
        source_event_id: &str,
        namespace: &str,
        source_app: Option<&str>,
    ) -> EngramResult<Option<MemoryRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM memories WHERE user_id = ?1 AND source_event_id = ?2 \
                     AND namespace = ?3 AND COALESCE(source_app, '') = ?4 AND tombstoned = 0",
                    MEMORY_COLUMNS
                ),
                params![user_id, source_event_id, namespace, source_app.unwrap_or("")],
                read_raw,
            )
            .optional()
            .map_err(|e| db_err("get_memory_by_source_event", e))?;
        raw.map(raw_to_memory).transpose().map_err(Into::into)
    }

    /// Find an active memory with exactly this content (case/space folded).
    pub fn find_exact_content(
        &self,
        user_id: &str,
        content: &str,
    ) -> EngramResult<Option<MemoryRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM memories WHERE user_id = ?1 AND tombstoned = 0 \
                     AND lower(trim(content)) = lower(trim(?2)) LIMIT 1",
                    MEMORY_COLUMNS
                ),
                params![user_id, content],
                read_raw,
            )
            .optional()
            .map_err(|e| db_err("find_exact_content", e))?;
        raw.map(raw_to_memory).transpose().map_err(Into::into)
    }

    /// Apply a patch. Returns false when the row does not exist.
    pub fn update_memory(&self, id: MemoryId, patch: &MemoryPatch) -> EngramResult<bool> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(content) = &patch.content {
            sets.push("content = ?");
            values.push(Value::Text(content.clone()));
        }
        if let Some(tier) = patch.tier {
            sets.push("tier = ?");
            values.push(Value::Text(tier.as_db_str().to_string()));
        }
        if let Some(strength) = patch.strength {
            sets.push("strength = ?");
            values.push(Value::Real(strength));
        }
        if let Some(traces) = patch.traces {
            sets.push("s_fast = ?");
            values.push(Value::Real(traces.s_fast));
            sets.push("s_mid = ?");
            values.push(Value::Real(traces.s_mid));
            sets.push("s_slow = ?");
            values.push(Value::Real(traces.s_slow));
            sets.push("effective_strength = ?");
            values.push(Value::Real(traces.effective));
        }
        if let Some(categories) = &patch.categories {
            sets.push("categories = ?");
            values.push(Value::Text(to_json(categories)));
        }
        if let Some(echo) = &patch.echo {
            sets.push("echo = ?");
            values.push(Value::Text(to_json(echo)));
        }
        if let Some(scene_id) = &patch.scene_id {
            sets.push("scene_id = ?");
            values.push(match scene_id {
                Some(id) => Value::Text(id.to_string()),
                None => Value::Null,
            });
        }
        if let Some(metadata) = &patch.metadata {
            sets.push("metadata = ?");
            values.push(Value::Text(to_json(metadata)));
        }
        if let Some(namespace) = &patch.namespace {
            sets.push("namespace = ?");
            values.push(Value::Text(namespace.clone()));
        }
        if let Some(scope) = patch.confidentiality_scope {
            sets.push("confidentiality_scope = ?");
            values.push(Value::Text(scope.as_db_str().to_string()));
        }
        if let Some(scope) = patch.sharing_scope {
            sets.push("sharing_scope = ?");
            values.push(Value::Text(scope.as_db_str().to_string()));
        }
        if let Some(kind) = patch.memory_kind {
            sets.push("memory_kind = ?");
            values.push(Value::Text(kind.as_db_str().to_string()));
        }
        if let Some(source_type) = &patch.source_type {
            sets.push("source_type = ?");
            values.push(Value::Text(source_type.clone()));
        }
        if let Some(source_app) = &patch.source_app {
            sets.push("source_app = ?");
            values.push(Value::Text(source_app.clone()));
        }
        if let Some(source_event_id) = &patch.source_event_id {
            sets.push("source_event_id = ?");
            values.push(Value::Text(source_event_id.clone()));
        }
        if let Some(last_accessed) = patch.last_accessed {
            sets.push("last_accessed = ?");
            values.push(Value::Text(ts_to_db(last_accessed)));
        }
        if let Some(tombstoned) = patch.tombstoned {
            sets.push("tombstoned = ?");
            values.push(Value::Integer(tombstoned as i64));
        }

        if sets.is_empty() {
            return Ok(self.get_memory(id)?.is_some());
        }

        sets.push("updated_at = ?");
        values.push(Value::Text(ts_to_db(chrono::Utc::now())));
        values.push(Value::Text(id.to_string()));

        let conn = self.lock()?;
        let affected = conn
            .execute(
                &format!("UPDATE memories SET {} WHERE id = ?", sets.join(", ")),
                params_from_iter(values),
            )
            .map_err(|e| db_err("update_memory", e))?;
        Ok(affected > 0)
    }

    /// Atomically bump access_count and refresh last_accessed.
    pub fn increment_access(&self, id: MemoryId) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 \
             WHERE id = ?2",
            params![ts_to_db(chrono::Utc::now()), id.to_string()],
        )
        .map_err(|e| db_err("increment_access", e))?;
        Ok(())
    }

    /// Delete a memory. With `use_tombstone` the row stays with strength 0
    /// and the tombstoned flag set (terminal); otherwise the row is removed.
    pub fn delete_memory(&self, id: MemoryId, use_tombstone: bool) -> EngramResult<bool> {
        let conn = self.lock()?;
        let affected = if use_tombstone {
            conn.execute(
                "UPDATE memories SET tombstoned = 1, strength = 0.0, updated_at = ?1 \
                 WHERE id = ?2",
                params![ts_to_db(chrono::Utc::now()), id.to_string()],
            )
            .map_err(|e| db_err("delete_memory", e))?
        } else {
            conn.execute(
                "DELETE FROM memories WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| db_err("delete_memory", e))?
        };
        Ok(affected > 0)
    }

    /// Remove tombstoned rows older than the configured threshold.
    pub fn purge_tombstoned(&self) -> EngramResult<usize> {
        let cutoff =
            chrono::Utc::now() - chrono::Duration::days(self.config().purge_tombstoned_after_days);
        let conn = self.lock()?;
        let purged = conn
            .execute(
                "DELETE FROM memories WHERE tombstoned = 1 AND updated_at < ?1",
                params![ts_to_db(cutoff)],
            )
            .map_err(|e| db_err("purge_tombstoned", e))?;
        if purged > 0 {
            debug!(purged, "purged tombstoned memories");
        }
        Ok(purged)
    }

    /// Distinct users owning at least one memory.
    pub fn list_user_ids(&self) -> EngramResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM memories ORDER BY user_id")
            .map_err(|e| db_err("list_user_ids", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("list_user_ids", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| db_err("list_user_ids", e))?);
        }
        Ok(out)
    }

    /// Aggregate counts by tier for stats reporting.
    pub fn memory_stats(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> EngramResult<MemoryStats> {
        let conn = self.lock()?;
        let stats = conn
            .query_row(
                "SELECT COUNT(*), \
                    COALESCE(SUM(CASE WHEN tier = 'sml' AND tombstoned = 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN tier = 'lml' AND tombstoned = 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(tombstoned), 0), \
                    COALESCE(AVG(CASE WHEN tombstoned = 0 THEN strength END), 0.0) \
                 FROM memories \
                 WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR agent_id = ?2)",
                params![user_id, agent_id],
                |row| {
                    Ok(MemoryStats {
                        total: row.get(0)?,
                        sml_count: row.get(1)?,
                        lml_count: row.get(2)?,
                        tombstoned: row.get(3)?,
                        avg_strength: row.get(4)?,
                    })
                },
            )
            .map_err(|e| db_err("memory_stats", e))?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_memory(user: &str, content: &str) -> MemoryRecord {
        MemoryRecord::new(user, content, Utc::now())
    }

    #[test]
    fn test_add_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let mut memory = make_memory("u1", "likes espresso");
        memory.categories = vec!["preference".to_string()];
        memory.traces = Some(MemoryTraces {
            s_fast: 1.0,
            s_mid: 0.0,
            s_slow: 0.0,
            effective: 0.5,
        });
        let id = store.add_memory(&memory).unwrap();

        let loaded = store.get_memory(id).unwrap().unwrap();
        assert_eq!(loaded.content, "likes espresso");
        assert_eq!(loaded.categories, vec!["preference"]);
        assert_eq!(loaded.traces.unwrap().s_fast, 1.0);
        assert_eq!(loaded.tier, MemoryTier::Sml);
    }

    #[test]
    fn test_update_patch() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_memory(&make_memory("u1", "text")).unwrap();

        let patch = MemoryPatch {
            strength: Some(0.4),
            tier: Some(MemoryTier::Lml),
            ..MemoryPatch::default()
        };
        assert!(store.update_memory(id, &patch).unwrap());

        let loaded = store.get_memory(id).unwrap().unwrap();
        assert_eq!(loaded.strength, 0.4);
        assert_eq!(loaded.tier, MemoryTier::Lml);

        let missing = MemoryId::new_v4();
        assert!(!store.update_memory(missing, &patch).unwrap());
    }

    #[test]
    fn test_increment_access() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_memory(&make_memory("u1", "text")).unwrap();
        store.increment_access(id).unwrap();
        store.increment_access(id).unwrap();
        assert_eq!(store.get_memory(id).unwrap().unwrap().access_count, 2);
    }

    #[test]
    fn test_tombstone_then_purge() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_memory(&make_memory("u1", "text")).unwrap();
        assert!(store.delete_memory(id, true).unwrap());

        let loaded = store.get_memory(id).unwrap().unwrap();
        assert!(loaded.tombstoned);
        assert_eq!(loaded.strength, 0.0);

        // Too fresh to purge with the default 30-day threshold.
        assert_eq!(store.purge_tombstoned().unwrap(), 0);
    }

    #[test]
    fn test_source_event_uniqueness() {
        let store = Store::open_in_memory().unwrap();
        let mut first = make_memory("u1", "event body");
        first.source_event_id = Some("evt-1".to_string());
        store.add_memory(&first).unwrap();

        let mut duplicate = make_memory("u1", "different body");
        duplicate.source_event_id = Some("evt-1".to_string());
        let err = store.add_memory(&duplicate).unwrap_err();
        assert_eq!(err.code(), "storage");

        let found = store
            .get_memory_by_source_event("u1", "evt-1", "default", None)
            .unwrap()
            .unwrap();
        assert_eq!(found.content, "event body");
    }

    #[test]
    fn test_filters() {
        let store = Store::open_in_memory().unwrap();
        store.add_memory(&make_memory("u1", "a")).unwrap();
        store
            .add_memory(&make_memory("u1", "b").with_namespace("ns2"))
            .unwrap();
        store.add_memory(&make_memory("u2", "c")).unwrap();

        let filters = MemoryFilters {
            user_id: Some("u1".to_string()),
            ..MemoryFilters::default()
        };
        assert_eq!(store.get_all_memories(&filters).unwrap().len(), 2);

        let filters = MemoryFilters {
            user_id: Some("u1".to_string()),
            namespace: Some("ns2".to_string()),
            ..MemoryFilters::default()
        };
        let hits = store.get_all_memories(&filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "b");
    }

    #[test]
    fn test_exact_content_duplicate_lookup() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_memory(&make_memory("u1", "My name is Alice"))
            .unwrap();
        assert!(store
            .find_exact_content("u1", "  my name is alice ")
            .unwrap()
            .is_some());
        assert!(store
            .find_exact_content("u1", "my name is Bob")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_stats() {
        let store = Store::open_in_memory().unwrap();
        store.add_memory(&make_memory("u1", "a")).unwrap();
        let id = store.add_memory(&make_memory("u1", "b")).unwrap();
        store
            .update_memory(
                id,
                &MemoryPatch {
                    tier: Some(MemoryTier::Lml),
                    ..MemoryPatch::default()
                },
            )
            .unwrap();

        let stats = store.memory_stats(Some("u1"), None).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.sml_count, 1);
        assert_eq!(stats.lml_count, 1);
    }
}
