//! Scene, scene-membership, and view tables

use crate::{
    db_err, from_json, id_from_db, opt_id_from_db, to_json, ts_from_db, ts_to_db, Store,
};
use engram_core::{
    ConfidentialityScope, EmbeddingVector, EngramResult, MemoryTier, Scene, SceneId,
    StorageError, Timestamp, View, ViewId,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

const SCENE_COLUMNS: &str = "id, user_id, title, topic, summary, location, participants, \
     start_time, end_time, embedding, scene_strength, tier, namespace, confidentiality_scope, \
     created_at, updated_at";

/// Filters for scene listings.
#[derive(Debug, Clone, Default)]
pub struct SceneFilters {
    pub user_id: Option<String>,
    pub namespace: Option<String>,
    pub start_after: Option<Timestamp>,
    pub start_before: Option<Timestamp>,
    pub limit: Option<usize>,
}

/// Update payload for scenes. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ScenePatch {
    pub title: Option<String>,
    pub topic: Option<String>,
    pub summary: Option<String>,
    pub location: Option<String>,
    pub participants: Option<Vec<String>>,
    pub end_time: Option<Timestamp>,
    pub embedding: Option<EmbeddingVector>,
    pub scene_strength: Option<f64>,
    pub namespace: Option<String>,
}

struct RawScene {
    id: String,
    user_id: String,
    title: String,
    topic: String,
    summary: String,
    location: Option<String>,
    participants: String,
    start_time: String,
    end_time: String,
    embedding: Option<String>,
    scene_strength: f64,
    tier: String,
    namespace: String,
    confidentiality_scope: String,
    created_at: String,
    updated_at: String,
}

fn read_raw_scene(row: &Row<'_>) -> rusqlite::Result<RawScene> {
    Ok(RawScene {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        topic: row.get(3)?,
        summary: row.get(4)?,
        location: row.get(5)?,
        participants: row.get(6)?,
        start_time: row.get(7)?,
        end_time: row.get(8)?,
        embedding: row.get(9)?,
        scene_strength: row.get(10)?,
        tier: row.get(11)?,
        namespace: row.get(12)?,
        confidentiality_scope: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

impl Store {
    fn raw_to_scene(&self, raw: RawScene) -> EngramResult<Scene> {
        let corrupt = |reason: String| StorageError::Corrupt {
            table: "scenes".to_string(),
            reason,
        };
        let scene_id: SceneId = id_from_db("scenes", &raw.id)?;
        Ok(Scene {
            scene_id,
            user_id: raw.user_id,
            title: raw.title,
            topic: raw.topic,
            summary: raw.summary,
            location: raw.location,
            participants: from_json("scenes", &raw.participants)?,
            memory_ids: self.scene_memory_ids(scene_id)?,
            start_time: ts_from_db("scenes", &raw.start_time)?,
            end_time: ts_from_db("scenes", &raw.end_time)?,
            embedding: raw
                .embedding
                .map(|e| from_json("scenes", &e))
                .transpose()?,
            scene_strength: raw.scene_strength,
            tier: MemoryTier::from_db_str(&raw.tier).map_err(corrupt)?,
            namespace: raw.namespace,
            confidentiality_scope: ConfidentialityScope::from_db_str(&raw.confidentiality_scope)
                .map_err(corrupt)?,
            created_at: ts_from_db("scenes", &raw.created_at)?,
            updated_at: ts_from_db("scenes", &raw.updated_at)?,
        })
    }

    /// Insert a scene row. Membership rows are managed separately via
    /// `add_scene_memory`.
    pub fn add_scene(&self, scene: &Scene) -> EngramResult<SceneId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scenes (id, user_id, title, topic, summary, location, participants, \
             start_time, end_time, embedding, scene_strength, tier, namespace, \
             confidentiality_scope, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                scene.scene_id.to_string(),
                scene.user_id,
                scene.title,
                scene.topic,
                scene.summary,
                scene.location,
                to_json(&scene.participants),
                ts_to_db(scene.start_time),
                ts_to_db(scene.end_time),
                scene.embedding.as_ref().map(to_json),
                scene.scene_strength,
                scene.tier.as_db_str(),
                scene.namespace,
                scene.confidentiality_scope.as_db_str(),
                ts_to_db(scene.created_at),
                ts_to_db(scene.updated_at),
            ],
        )
        .map_err(|e| db_err("add_scene", e))?;
        Ok(scene.scene_id)
    }

    /// Fetch one scene, including its ordered member memory ids.
    pub fn get_scene(&self, id: SceneId) -> EngramResult<Option<Scene>> {
        let raw = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {} FROM scenes WHERE id = ?1", SCENE_COLUMNS),
                params![id.to_string()],
                read_raw_scene,
            )
            .optional()
            .map_err(|e| db_err("get_scene", e))?
        };
        raw.map(|r| self.raw_to_scene(r)).transpose()
    }

    /// List scenes matching the filters, newest start_time first.
    pub fn get_scenes(&self, filters: &SceneFilters) -> EngramResult<Vec<Scene>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(user_id) = &filters.user_id {
            clauses.push("user_id = ?");
            values.push(Value::Text(user_id.clone()));
        }
        if let Some(namespace) = &filters.namespace {
            clauses.push("namespace = ?");
            values.push(Value::Text(namespace.clone()));
        }
        if let Some(after) = filters.start_after {
            clauses.push("start_time >= ?");
            values.push(Value::Text(ts_to_db(after)));
        }
        if let Some(before) = filters.start_before {
            clauses.push("start_time <= ?");
            values.push(Value::Text(ts_to_db(before)));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let limit = filters.limit.unwrap_or(100);

        let raws = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM scenes{} ORDER BY start_time DESC LIMIT {}",
                    SCENE_COLUMNS, where_clause, limit
                ))
                .map_err(|e| db_err("get_scenes", e))?;
            let rows = stmt
                .query_map(params_from_iter(values), read_raw_scene)
                .map_err(|e| db_err("get_scenes", e))?;
            let mut raws = Vec::new();
            for row in rows {
                raws.push(row.map_err(|e| db_err("get_scenes", e))?);
            }
            raws
        };

        raws.into_iter().map(|r| self.raw_to_scene(r)).collect()
    }

    /// Apply a scene patch. Returns false when the scene does not exist.
    pub fn update_scene(&self, id: SceneId, patch: &ScenePatch) -> EngramResult<bool> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(title) = &patch.title {
            sets.push("title = ?");
            values.push(Value::Text(title.clone()));
        }
        if let Some(topic) = &patch.topic {
            sets.push("topic = ?");
            values.push(Value::Text(topic.clone()));
        }
        if let Some(summary) = &patch.summary {
            sets.push("summary = ?");
            values.push(Value::Text(summary.clone()));
        }
        if let Some(location) = &patch.location {
            sets.push("location = ?");
            values.push(Value::Text(location.clone()));
        }
        if let Some(participants) = &patch.participants {
            sets.push("participants = ?");
            values.push(Value::Text(to_json(participants)));
        }
        if let Some(end_time) = patch.end_time {
            sets.push("end_time = ?");
            values.push(Value::Text(ts_to_db(end_time)));
        }
        if let Some(embedding) = &patch.embedding {
            sets.push("embedding = ?");
            values.push(Value::Text(to_json(embedding)));
        }
        if let Some(strength) = patch.scene_strength {
            sets.push("scene_strength = ?");
            values.push(Value::Real(strength));
        }
        if let Some(namespace) = &patch.namespace {
            sets.push("namespace = ?");
            values.push(Value::Text(namespace.clone()));
        }
        if sets.is_empty() {
            return Ok(self.get_scene(id)?.is_some());
        }

        sets.push("updated_at = ?");
        values.push(Value::Text(ts_to_db(chrono::Utc::now())));
        values.push(Value::Text(id.to_string()));

        let conn = self.lock()?;
        let affected = conn
            .execute(
                &format!("UPDATE scenes SET {} WHERE id = ?", sets.join(", ")),
                params_from_iter(values),
            )
            .map_err(|e| db_err("update_scene", e))?;
        Ok(affected > 0)
    }

    /// Attach a memory to a scene at a position. Duplicate membership is a
    /// no-op.
    pub fn add_scene_memory(
        &self,
        scene_id: SceneId,
        memory_id: engram_core::MemoryId,
        position: usize,
    ) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO scene_memories (scene_id, memory_id, position) \
             VALUES (?1, ?2, ?3)",
            params![scene_id.to_string(), memory_id.to_string(), position as i64],
        )
        .map_err(|e| db_err("add_scene_memory", e))?;
        Ok(())
    }

    /// Ordered member memory ids of a scene.
    pub fn scene_memory_ids(&self, scene_id: SceneId) -> EngramResult<Vec<engram_core::MemoryId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT memory_id FROM scene_memories WHERE scene_id = ?1 ORDER BY position ASC",
            )
            .map_err(|e| db_err("scene_memory_ids", e))?;
        let rows = stmt
            .query_map(params![scene_id.to_string()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| db_err("scene_memory_ids", e))?;
        let mut out = Vec::new();
        for row in rows {
            let text = row.map_err(|e| db_err("scene_memory_ids", e))?;
            out.push(id_from_db("scene_memories", &text)?);
        }
        Ok(out)
    }

    /// Insert a view row.
    pub fn add_view(&self, view: &View) -> EngramResult<ViewId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO views (id, user_id, agent_id, timestamp, place_type, place_value, \
             topic_label, topic_ref, characters, raw_text, signals, scene_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                view.view_id.to_string(),
                view.user_id,
                view.agent_id,
                ts_to_db(view.timestamp),
                view.place_type,
                view.place_value,
                view.topic_label,
                view.topic_ref.map(|m| m.to_string()),
                to_json(&view.characters),
                view.raw_text,
                to_json(&view.signals),
                view.scene_id.to_string(),
                ts_to_db(chrono::Utc::now()),
            ],
        )
        .map_err(|e| db_err("add_view", e))?;
        Ok(view.view_id)
    }

    /// Views attached to a scene, oldest first.
    pub fn get_views_for_scene(&self, scene_id: SceneId) -> EngramResult<Vec<View>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, agent_id, timestamp, place_type, place_value, topic_label, \
                 topic_ref, characters, raw_text, signals, scene_id FROM views \
                 WHERE scene_id = ?1 ORDER BY timestamp ASC",
            )
            .map_err(|e| db_err("get_views_for_scene", e))?;
        let rows = stmt
            .query_map(params![scene_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                ))
            })
            .map_err(|e| db_err("get_views_for_scene", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (
                id,
                user_id,
                agent_id,
                timestamp,
                place_type,
                place_value,
                topic_label,
                topic_ref,
                characters,
                raw_text,
                signals,
                scene,
            ) = row.map_err(|e| db_err("get_views_for_scene", e))?;
            out.push(View {
                view_id: id_from_db("views", &id)?,
                user_id,
                agent_id,
                timestamp: ts_from_db("views", &timestamp)?,
                place_type,
                place_value,
                topic_label,
                topic_ref: opt_id_from_db("views", topic_ref)?,
                characters: from_json("views", &characters)?,
                raw_text,
                signals: from_json("views", &signals)?,
                scene_id: id_from_db("views", &scene)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::{Character, CharacterRole, EngramIdType, MemoryId, ViewSignals};

    fn make_scene(user: &str) -> Scene {
        let now = Utc::now();
        Scene {
            scene_id: SceneId::new_v4(),
            user_id: user.to_string(),
            title: "standup".to_string(),
            topic: "standup notes".to_string(),
            summary: "standup notes".to_string(),
            location: Some("repo:/x".to_string()),
            participants: vec!["a1".to_string()],
            memory_ids: Vec::new(),
            start_time: now,
            end_time: now,
            embedding: None,
            scene_strength: 1.0,
            tier: MemoryTier::Sml,
            namespace: "default".to_string(),
            confidentiality_scope: ConfidentialityScope::Work,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_scene_roundtrip_with_members() {
        let store = Store::open_in_memory().unwrap();
        let scene = make_scene("u1");
        let scene_id = store.add_scene(&scene).unwrap();

        let m1 = MemoryId::new_v4();
        let m2 = MemoryId::new_v4();
        store.add_scene_memory(scene_id, m1, 0).unwrap();
        store.add_scene_memory(scene_id, m2, 1).unwrap();
        // Duplicate attachment is ignored.
        store.add_scene_memory(scene_id, m1, 5).unwrap();

        let loaded = store.get_scene(scene_id).unwrap().unwrap();
        assert_eq!(loaded.memory_ids, vec![m1, m2]);
        assert_eq!(loaded.location.as_deref(), Some("repo:/x"));
    }

    #[test]
    fn test_scene_patch() {
        let store = Store::open_in_memory().unwrap();
        let scene_id = store.add_scene(&make_scene("u1")).unwrap();
        let later = Utc::now() + chrono::Duration::minutes(10);

        store
            .update_scene(
                scene_id,
                &ScenePatch {
                    end_time: Some(later),
                    participants: Some(vec!["a1".to_string(), "Bob".to_string()]),
                    ..ScenePatch::default()
                },
            )
            .unwrap();

        let loaded = store.get_scene(scene_id).unwrap().unwrap();
        assert_eq!(loaded.end_time, later);
        assert_eq!(loaded.participants.len(), 2);
    }

    #[test]
    fn test_scene_filters_by_namespace() {
        let store = Store::open_in_memory().unwrap();
        store.add_scene(&make_scene("u1")).unwrap();
        let mut other = make_scene("u1");
        other.namespace = "work".to_string();
        store.add_scene(&other).unwrap();

        let filters = SceneFilters {
            user_id: Some("u1".to_string()),
            namespace: Some("work".to_string()),
            ..SceneFilters::default()
        };
        assert_eq!(store.get_scenes(&filters).unwrap().len(), 1);
    }

    #[test]
    fn test_view_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let scene_id = store.add_scene(&make_scene("u1")).unwrap();
        let view = View {
            view_id: ViewId::new_v4(),
            user_id: "u1".to_string(),
            agent_id: Some("a1".to_string()),
            timestamp: Utc::now(),
            place_type: "digital".to_string(),
            place_value: Some("repo:/x".to_string()),
            topic_label: "standup notes".to_string(),
            topic_ref: None,
            characters: vec![Character {
                entity_id: "a1".to_string(),
                role: CharacterRole::Main,
            }],
            raw_text: "met with Bob".to_string(),
            signals: ViewSignals::default(),
            scene_id,
        };
        store.add_view(&view).unwrap();

        let views = store.get_views_for_scene(scene_id).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].characters[0].role, CharacterRole::Main);
    }
}
