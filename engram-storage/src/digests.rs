//! Daily digest rows

use crate::{db_err, from_json, id_from_db, to_json, ts_from_db, ts_to_db, Store};
use engram_core::{DailyDigest, DigestId, DigestPayload, EngramIdType, EngramResult};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

impl Store {
    /// Insert or replace the digest for (user, date).
    pub fn upsert_daily_digest(
        &self,
        user_id: &str,
        digest_date: NaiveDate,
        payload: &DigestPayload,
    ) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO daily_digests (id, user_id, digest_date, payload, generated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id, digest_date) DO UPDATE SET \
             payload = excluded.payload, generated_at = excluded.generated_at",
            params![
                DigestId::new_v4().to_string(),
                user_id,
                digest_date.to_string(),
                to_json(payload),
                ts_to_db(chrono::Utc::now()),
            ],
        )
        .map_err(|e| db_err("upsert_daily_digest", e))?;
        Ok(())
    }

    /// Fetch the digest for (user, date).
    pub fn get_daily_digest(
        &self,
        user_id: &str,
        digest_date: NaiveDate,
    ) -> EngramResult<Option<DailyDigest>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, payload, generated_at FROM daily_digests \
                 WHERE user_id = ?1 AND digest_date = ?2",
                params![user_id, digest_date.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err("get_daily_digest", e))?;

        row.map(|(id, payload, generated_at)| {
            Ok::<_, engram_core::EngramError>(DailyDigest {
                digest_id: id_from_db("daily_digests", &id)?,
                user_id: user_id.to_string(),
                digest_date,
                payload: from_json("daily_digests", &payload)?,
                generated_at: ts_from_db("daily_digests", &generated_at)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_upsert_replaces() {
        let store = Store::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();

        store
            .upsert_daily_digest("u1", date, &DigestPayload::default())
            .unwrap();

        let mut payload = DigestPayload::default();
        payload.scene_highlights.push(engram_core::SceneHighlight {
            scene_id: engram_core::SceneId::new_v4(),
            summary: "standup".to_string(),
            topic: "standup".to_string(),
            start_time: chrono::Utc::now(),
            memory_count: 3,
        });
        store.upsert_daily_digest("u1", date, &payload).unwrap();

        let loaded = store.get_daily_digest("u1", date).unwrap().unwrap();
        assert_eq!(loaded.payload.scene_highlights.len(), 1);
        assert!(store
            .get_daily_digest("u2", date)
            .unwrap()
            .is_none());
    }
}
