//! Engram Storage - durable relational store
//!
//! Single SQLite database per kernel instance, WAL mode, configurable busy
//! timeout. All mutating operations run behind a single-writer mutex;
//! cross-row consistency comes from SQL transactions, and the staging state
//! machine advances through a compare-and-set UPDATE so no apply can run
//! twice regardless of concurrency.

mod categories;
mod digests;
mod episodic;
mod events;
mod graph;
mod handoff;
mod memory;
mod migrations;
mod policy;
mod refs;
mod staging;

pub use episodic::{SceneFilters, ScenePatch};
pub use memory::{MemoryFilters, MemoryPatch, MemoryStats};
pub use staging::CommitFilter;

use engram_core::{EngramIdType, EngramResult, StorageConfig, StorageError, Timestamp};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Handle to the durable store.
pub struct Store {
    conn: Mutex<Connection>,
    config: StorageConfig,
}

impl Store {
    /// Open the store per `config`, applying pending migrations.
    pub fn open(config: StorageConfig) -> EngramResult<Self> {
        let conn = match &config.db_path {
            Some(path) => Connection::open(path)
                .map_err(|e| db_err("open", e))?,
            None => Connection::open_in_memory().map_err(|e| db_err("open", e))?,
        };
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "busy_timeout", config.busy_timeout_ms as i64)
            .map_err(|e| db_err("busy_timeout", e))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| db_err("foreign_keys", e))?;

        let store = Self {
            conn: Mutex::new(conn),
            config,
        };
        store.apply_migrations()?;
        Ok(store)
    }

    /// Open an ephemeral in-memory store with default settings.
    pub fn open_in_memory() -> EngramResult<Self> {
        Self::open(StorageConfig {
            db_path: None,
            ..StorageConfig::default()
        })
    }

    pub(crate) fn lock(&self) -> EngramResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    pub(crate) fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn apply_migrations(&self) -> EngramResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| db_err("schema_migrations", e))?;

        for (version, ddl) in migrations::MIGRATIONS {
            let applied: Option<String> = conn
                .query_row(
                    "SELECT version FROM schema_migrations WHERE version = ?1",
                    [version],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(db_err(version, other)),
                })?;
            if applied.is_some() {
                continue;
            }

            conn.execute_batch(ddl).map_err(|e| StorageError::MigrationFailed {
                version: version.to_string(),
                reason: e.to_string(),
            })?;
            conn.execute(
                "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, ts_to_db(chrono::Utc::now())],
            )
            .map_err(|e| db_err(version, e))?;
            info!(version, "applied migration");
        }
        debug!("migrations up to date");
        Ok(())
    }
}

// ============================================================================
// SHARED ROW HELPERS
// ============================================================================

pub(crate) fn ts_to_db(ts: Timestamp) -> String {
    ts.to_rfc3339()
}

pub(crate) fn ts_from_db(table: &str, value: &str) -> Result<Timestamp, StorageError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| StorageError::Corrupt {
            table: table.to_string(),
            reason: format!("bad timestamp '{}': {}", value, e),
        })
}

pub(crate) fn opt_ts_from_db(
    table: &str,
    value: Option<String>,
) -> Result<Option<Timestamp>, StorageError> {
    value.map(|v| ts_from_db(table, &v)).transpose()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(
    table: &str,
    value: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(value).map_err(|e| StorageError::Corrupt {
        table: table.to_string(),
        reason: format!("bad json: {}", e),
    })
}

pub(crate) fn id_from_db<T: EngramIdType>(table: &str, value: &str) -> Result<T, StorageError> {
    value
        .parse::<uuid::Uuid>()
        .map(T::new)
        .map_err(|e| StorageError::Corrupt {
            table: table.to_string(),
            reason: format!("bad {} id '{}': {}", T::ENTITY_NAME, value, e),
        })
}

pub(crate) fn opt_id_from_db<T: EngramIdType>(
    table: &str,
    value: Option<String>,
) -> Result<Option<T>, StorageError> {
    value.map(|v| id_from_db(table, &v)).transpose()
}

pub(crate) fn db_err(context: &str, err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == rusqlite::ErrorCode::DatabaseBusy
            || failure.code == rusqlite::ErrorCode::DatabaseLocked
        {
            return StorageError::Busy {
                reason: format!("{}: {}", context, err),
            };
        }
    }
    StorageError::TransactionFailed {
        reason: format!("{}: {}", context, err),
    }
}

/// `true` when the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
