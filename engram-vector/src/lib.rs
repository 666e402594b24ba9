//! Engram Vector - SQLite-backed dense vector index
//!
//! One collection per kernel, cosine metric. Vectors live in a row-id keyed
//! blob table; payloads live in a separate table keyed by external UUID, so
//! payload updates never rewrite vector blobs. k-NN is a brute-force scan,
//! which is the right trade-off for a personal memory store: no extension
//! dependency and no index maintenance.

use engram_core::{cosine_similarity, EngramResult, StorageError, VectorConfig, VectorError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// One search or lookup result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: Uuid,
    /// Normalised similarity in [0, 1]: `1 - cosine_distance / 2`.
    pub score: f32,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Collection metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub points: usize,
    pub vector_size: usize,
}

/// Vector index over a single SQLite collection.
pub struct VectorIndex {
    conn: Mutex<Connection>,
    vec_table: String,
    payload_table: String,
    config: VectorConfig,
}

impl VectorIndex {
    /// Open (or create) the index at `path`.
    pub fn open(path: &Path, config: VectorConfig) -> EngramResult<Self> {
        let conn = Connection::open(path).map_err(|e| index_failed("open", e))?;
        Self::from_connection(conn, config)
    }

    /// Open an in-memory index, mainly for tests and ephemeral kernels.
    pub fn open_in_memory(config: VectorConfig) -> EngramResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| index_failed("open", e))?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: VectorConfig) -> EngramResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "busy_timeout", 5000_i64)
            .map_err(|e| index_failed("pragma", e))?;

        let index = Self {
            vec_table: format!("vec_{}", config.collection_name),
            payload_table: format!("payload_{}", config.collection_name),
            conn: Mutex::new(conn),
            config,
        };
        index.ensure_collection()?;
        Ok(index)
    }

    fn ensure_collection(&self) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS [{vec}] (
                rowid INTEGER PRIMARY KEY,
                embedding BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS [{payload}] (
                rowid INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT UNIQUE NOT NULL,
                payload TEXT DEFAULT '{{}}'
            );
            CREATE INDEX IF NOT EXISTS [idx_{payload}_uuid] ON [{payload}](uuid);",
            vec = self.vec_table,
            payload = self.payload_table,
        ))
        .map_err(|e| index_failed("ensure_collection", e))?;
        Ok(())
    }

    /// Insert or upsert a batch. All three slices must have equal length and
    /// every vector must match the collection dimensionality.
    pub fn insert(
        &self,
        vectors: &[Vec<f32>],
        payloads: &[serde_json::Map<String, serde_json::Value>],
        ids: &[Uuid],
    ) -> EngramResult<()> {
        if vectors.len() != payloads.len() || vectors.len() != ids.len() {
            return Err(VectorError::BatchLengthMismatch {
                vectors: vectors.len(),
                payloads: payloads.len(),
                ids: ids.len(),
            }
            .into());
        }
        for vector in vectors {
            self.check_dimensions(vector)?;
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| index_failed("insert_tx", e))?;
        for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
            let payload_text = serde_json::Value::Object(payload.clone()).to_string();
            let existing: Option<i64> = tx
                .query_row(
                    &format!("SELECT rowid FROM [{}] WHERE uuid = ?1", self.payload_table),
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| index_failed("insert_lookup", e))?;

            if let Some(rowid) = existing {
                tx.execute(
                    &format!("UPDATE [{}] SET payload = ?1 WHERE rowid = ?2", self.payload_table),
                    params![payload_text, rowid],
                )
                .map_err(|e| index_failed("insert_update_payload", e))?;
                tx.execute(
                    &format!("UPDATE [{}] SET embedding = ?1 WHERE rowid = ?2", self.vec_table),
                    params![serialize_f32(vector), rowid],
                )
                .map_err(|e| index_failed("insert_update_vector", e))?;
            } else {
                tx.execute(
                    &format!(
                        "INSERT INTO [{}] (uuid, payload) VALUES (?1, ?2)",
                        self.payload_table
                    ),
                    params![id.to_string(), payload_text],
                )
                .map_err(|e| index_failed("insert_payload", e))?;
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    &format!(
                        "INSERT INTO [{}] (rowid, embedding) VALUES (?1, ?2)",
                        self.vec_table
                    ),
                    params![rowid, serialize_f32(vector)],
                )
                .map_err(|e| index_failed("insert_vector", e))?;
            }
        }
        tx.commit().map_err(|e| index_failed("insert_commit", e))?;
        Ok(())
    }

    /// k-NN search by cosine similarity, descending.
    pub fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filters: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> EngramResult<Vec<VectorHit>> {
        self.check_dimensions(vector)?;

        // Over-fetch when filters are present to compensate for post-filtering.
        let fetch_limit = if filters.is_some() {
            limit.saturating_mul(self.config.filter_overfetch)
        } else {
            limit
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT v.rowid, v.embedding, p.uuid, p.payload
                 FROM [{vec}] v JOIN [{payload}] p ON p.rowid = v.rowid",
                vec = self.vec_table,
                payload = self.payload_table,
            ))
            .map_err(|e| index_failed("search_prepare", e))?;

        let mut scored: Vec<(f32, Uuid, String)> = Vec::new();
        let mut rows = stmt
            .query([])
            .map_err(|e| index_failed("search_query", e))?;
        while let Some(row) = rows.next().map_err(|e| index_failed("search_next", e))? {
            let blob: Vec<u8> = row.get(1).map_err(|e| index_failed("search_blob", e))?;
            let uuid_text: String = row.get(2).map_err(|e| index_failed("search_uuid", e))?;
            let payload_text: String = row.get(3).map_err(|e| index_failed("search_payload", e))?;

            let candidate = deserialize_f32(&blob);
            let cosine = cosine_similarity(vector, &candidate);
            // Cosine distance is 1 - cos ∈ [0, 2]; normalise to [0, 1].
            let score = 1.0 - (1.0 - cosine) / 2.0;

            let id = match Uuid::parse_str(&uuid_text) {
                Ok(id) => id,
                Err(_) => continue,
            };
            scored.push((score, id, payload_text));
        }
        drop(rows);
        drop(stmt);

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(fetch_limit);

        let mut results = Vec::new();
        for (score, id, payload_text) in scored {
            let payload = parse_payload(&payload_text);
            if let Some(filters) = filters {
                if !payload_matches(&payload, filters) {
                    continue;
                }
            }
            results.push(VectorHit { id, score, payload });
            if results.len() == limit {
                break;
            }
        }
        debug!(results = results.len(), limit, "vector search");
        Ok(results)
    }

    /// Update the vector and/or payload of an existing point. Missing ids are
    /// a silent no-op, mirroring upstream vector stores.
    pub fn update(
        &self,
        id: Uuid,
        vector: Option<&[f32]>,
        payload: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> EngramResult<()> {
        if let Some(vector) = vector {
            self.check_dimensions(vector)?;
        }
        let conn = self.lock()?;
        let rowid: Option<i64> = conn
            .query_row(
                &format!("SELECT rowid FROM [{}] WHERE uuid = ?1", self.payload_table),
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| index_failed("update_lookup", e))?;
        let Some(rowid) = rowid else {
            return Ok(());
        };

        if let Some(vector) = vector {
            conn.execute(
                &format!("UPDATE [{}] SET embedding = ?1 WHERE rowid = ?2", self.vec_table),
                params![serialize_f32(vector), rowid],
            )
            .map_err(|e| index_failed("update_vector", e))?;
        }
        if let Some(payload) = payload {
            conn.execute(
                &format!("UPDATE [{}] SET payload = ?1 WHERE rowid = ?2", self.payload_table),
                params![serde_json::Value::Object(payload.clone()).to_string(), rowid],
            )
            .map_err(|e| index_failed("update_payload", e))?;
        }
        Ok(())
    }

    /// Delete a point by UUID.
    pub fn delete(&self, id: Uuid) -> EngramResult<()> {
        let conn = self.lock()?;
        let rowid: Option<i64> = conn
            .query_row(
                &format!("SELECT rowid FROM [{}] WHERE uuid = ?1", self.payload_table),
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| index_failed("delete_lookup", e))?;
        if let Some(rowid) = rowid {
            conn.execute(
                &format!("DELETE FROM [{}] WHERE rowid = ?1", self.vec_table),
                params![rowid],
            )
            .map_err(|e| index_failed("delete_vector", e))?;
            conn.execute(
                &format!("DELETE FROM [{}] WHERE rowid = ?1", self.payload_table),
                params![rowid],
            )
            .map_err(|e| index_failed("delete_payload", e))?;
        }
        Ok(())
    }

    /// Fetch a single point's payload (score is 0).
    pub fn get(&self, id: Uuid) -> EngramResult<Option<VectorHit>> {
        let conn = self.lock()?;
        let payload_text: Option<String> = conn
            .query_row(
                &format!("SELECT payload FROM [{}] WHERE uuid = ?1", self.payload_table),
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| index_failed("get", e))?;
        Ok(payload_text.map(|text| VectorHit {
            id,
            score: 0.0,
            payload: parse_payload(&text),
        }))
    }

    /// List points, optionally filtered on payload equality.
    pub fn list(
        &self,
        filters: Option<&serde_json::Map<String, serde_json::Value>>,
        limit: Option<usize>,
    ) -> EngramResult<Vec<VectorHit>> {
        let effective_limit = limit.unwrap_or(100);
        let fetch_limit = if filters.is_some() {
            effective_limit.saturating_mul(self.config.filter_overfetch)
        } else {
            effective_limit
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT uuid, payload FROM [{}] LIMIT ?1",
                self.payload_table
            ))
            .map_err(|e| index_failed("list_prepare", e))?;
        let rows = stmt
            .query_map(params![fetch_limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| index_failed("list_query", e))?;

        let mut results = Vec::new();
        for row in rows {
            let (uuid_text, payload_text) = row.map_err(|e| index_failed("list_row", e))?;
            let Ok(id) = Uuid::parse_str(&uuid_text) else {
                continue;
            };
            let payload = parse_payload(&payload_text);
            if let Some(filters) = filters {
                if !payload_matches(&payload, filters) {
                    continue;
                }
            }
            results.push(VectorHit { id, score: 0.0, payload });
            if results.len() == effective_limit {
                break;
            }
        }
        Ok(results)
    }

    /// Collection statistics.
    pub fn col_info(&self) -> EngramResult<CollectionInfo> {
        let conn = self.lock()?;
        let points: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM [{}]", self.payload_table),
                [],
                |row| row.get(0),
            )
            .map_err(|e| index_failed("col_info", e))?;
        Ok(CollectionInfo {
            name: self.config.collection_name.clone(),
            points: points as usize,
            vector_size: self.config.dimensions,
        })
    }

    /// Drop and recreate the collection.
    pub fn reset(&self) -> EngramResult<()> {
        {
            let conn = self.lock()?;
            conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS [{vec}]; DROP TABLE IF EXISTS [{payload}];",
                vec = self.vec_table,
                payload = self.payload_table,
            ))
            .map_err(|e| index_failed("reset", e))?;
        }
        self.ensure_collection()
    }

    fn check_dimensions(&self, vector: &[f32]) -> EngramResult<()> {
        if vector.len() != self.config.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.config.dimensions,
                got: vector.len(),
            }
            .into());
        }
        Ok(())
    }

    fn lock(&self) -> EngramResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }
}

/// Serialize a float vector to little-endian bytes.
fn serialize_f32(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize little-endian bytes back to a float vector.
fn deserialize_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_payload(text: &str) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::from_str(text) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Equality post-filter over payload fields. Null filter values are skipped.
fn payload_matches(
    payload: &serde_json::Map<String, serde_json::Value>,
    filters: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    filters.iter().all(|(key, expected)| {
        if expected.is_null() {
            return true;
        }
        payload.get(key) == Some(expected)
    })
}

fn index_failed(op: &str, err: rusqlite::Error) -> engram_core::EngramError {
    VectorError::IndexFailed {
        reason: format!("{}: {}", op, err),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index(dims: usize) -> VectorIndex {
        let config = VectorConfig {
            collection_name: "test".to_string(),
            dimensions: dims,
            filter_overfetch: 3,
        };
        VectorIndex::open_in_memory(config).unwrap()
    }

    fn payload(pairs: &[(&str, &str)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_insert_and_exact_search() {
        let index = make_index(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index
            .insert(
                &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
                &[payload(&[("user_id", "u1")]), payload(&[("user_id", "u1")])],
                &[a, b],
            )
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, a);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        // Orthogonal vector normalises to 0.5.
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_upsert_overwrites_vector_and_payload() {
        let index = make_index(2);
        let id = Uuid::new_v4();
        index
            .insert(&[vec![1.0, 0.0]], &[payload(&[("v", "1")])], &[id])
            .unwrap();
        index
            .insert(&[vec![0.0, 1.0]], &[payload(&[("v", "2")])], &[id])
            .unwrap();

        assert_eq!(index.col_info().unwrap().points, 1);
        let hits = index.search(&[0.0, 1.0], 1, None).unwrap();
        assert_eq!(hits[0].id, id);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].payload.get("v").unwrap(), "2");
    }

    #[test]
    fn test_search_filters_apply_post_knn() {
        let index = make_index(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index
            .insert(
                &[vec![1.0, 0.0], vec![0.9, 0.1]],
                &[payload(&[("user_id", "u1")]), payload(&[("user_id", "u2")])],
                &[a, b],
            )
            .unwrap();

        let filters = payload(&[("user_id", "u2")]);
        let hits = index.search(&[1.0, 0.0], 5, Some(&filters)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, b);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = make_index(3);
        let err = index.search(&[1.0, 0.0], 1, None).unwrap_err();
        assert_eq!(err.code(), "vector");
    }

    #[test]
    fn test_delete_and_get() {
        let index = make_index(2);
        let id = Uuid::new_v4();
        index
            .insert(&[vec![1.0, 0.0]], &[payload(&[])], &[id])
            .unwrap();
        assert!(index.get(id).unwrap().is_some());
        index.delete(id).unwrap();
        assert!(index.get(id).unwrap().is_none());
        assert_eq!(index.col_info().unwrap().points, 0);
    }

    #[test]
    fn test_empty_collection_search_is_empty() {
        let index = make_index(2);
        assert!(index.search(&[1.0, 0.0], 5, None).unwrap().is_empty());
    }

    #[test]
    fn test_reset_clears_points() {
        let index = make_index(2);
        index
            .insert(&[vec![1.0, 0.0]], &[payload(&[])], &[Uuid::new_v4()])
            .unwrap();
        index.reset().unwrap();
        assert_eq!(index.col_info().unwrap().points, 0);
    }

    #[test]
    fn test_blob_roundtrip() {
        let original = vec![0.25f32, -1.5, 3.75];
        assert_eq!(deserialize_f32(&serialize_f32(&original)), original);
    }
}
