//! Per (document type, target table) processing cursors.
//!
//! The cursor is the highest `inserted_at` already flattened for a pair.
//! A run reads documents strictly after it and advances it only once the
//! run's rows have been written, so a failed run is simply re-read.

use crate::error::WatermarkError;
use crate::pipeline::source::ReadFilter;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatermarkKey {
    pub document_type: String,
    pub target_table: String,
}

impl WatermarkKey {
    pub fn new(document_type: impl Into<String>, target_table: impl Into<String>) -> Self {
        WatermarkKey {
            document_type: document_type.into(),
            target_table: target_table.into(),
        }
    }
}

impl fmt::Display for WatermarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.document_type, self.target_table)
    }
}

/// Key-value storage for cursors. Keys are independent of each other.
pub trait WatermarkStore: Send + Sync {
    /// `Ok(None)` when nothing has been processed for `key` yet.
    fn get(&self, key: &WatermarkKey) -> Result<Option<DateTime<Utc>>, WatermarkError>;

    fn set(&self, key: &WatermarkKey, cursor: DateTime<Utc>) -> Result<(), WatermarkError>;
}

#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    cursors: Mutex<HashMap<WatermarkKey, DateTime<Utc>>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<WatermarkKey, DateTime<Utc>>>, WatermarkError> {
        self.cursors.lock().map_err(|_| WatermarkError::LockPoisoned)
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn get(&self, key: &WatermarkKey) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        Ok(self.lock()?.get(key).copied())
    }

    fn set(&self, key: &WatermarkKey, cursor: DateTime<Utc>) -> Result<(), WatermarkError> {
        self.lock()?.insert(key.clone(), cursor);
        Ok(())
    }
}

/// Idempotent DDL for the cursor table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS watermarks (
    document_type TEXT NOT NULL,
    target_table TEXT NOT NULL,
    cursor TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (document_type, target_table)
);
";

/// SQLite-backed cursors, one row per (document type, target table).
///
/// Create with [`SqliteWatermarkStore::open`] for a database file or
/// [`SqliteWatermarkStore::in_memory`] for tests. Cursors are stored as
/// RFC 3339 UTC text.
pub struct SqliteWatermarkStore {
    conn: Mutex<Connection>,
}

impl SqliteWatermarkStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WatermarkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        debug!(path = %path.display(), "opened watermark database");
        Ok(SqliteWatermarkStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, WatermarkError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(SqliteWatermarkStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, WatermarkError> {
        self.conn.lock().map_err(|_| WatermarkError::LockPoisoned)
    }
}

impl WatermarkStore for SqliteWatermarkStore {
    fn get(&self, key: &WatermarkKey) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT cursor FROM watermarks WHERE document_type = ?1 AND target_table = ?2",
            rusqlite::params![key.document_type, key.target_table],
            |row| row.get::<_, String>(0),
        );

        let raw = match result {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|cursor| Some(cursor.with_timezone(&Utc)))
            .map_err(|_| WatermarkError::Corrupt {
                key: key.to_string(),
                value: raw,
            })
    }

    fn set(&self, key: &WatermarkKey, cursor: DateTime<Utc>) -> Result<(), WatermarkError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO watermarks (document_type, target_table, cursor) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(document_type, target_table) \
             DO UPDATE SET cursor = ?3, updated_at = datetime('now')",
            rusqlite::params![
                key.document_type,
                key.target_table,
                cursor.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ],
        )?;
        Ok(())
    }
}

/// Reads cursors before a run and advances them after a successful write
pub struct WatermarkCoordinator<'a> {
    store: &'a dyn WatermarkStore,
}

impl<'a> WatermarkCoordinator<'a> {
    pub fn new(store: &'a dyn WatermarkStore) -> Self {
        WatermarkCoordinator { store }
    }

    pub fn read_cursor(
        &self,
        document_type: &str,
        target_table: &str,
    ) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        self.store.get(&WatermarkKey::new(document_type, target_table))
    }

    /// Source filter for the next run: everything after the stored cursor.
    pub fn filter(
        &self,
        document_type: &str,
        target_table: &str,
    ) -> Result<ReadFilter, WatermarkError> {
        Ok(ReadFilter {
            after: self.read_cursor(document_type, target_table)?,
        })
    }

    /// Move the cursor forward. A cursor at or below the stored one is
    /// ignored. Returns the cursor in effect afterwards.
    pub fn advance(
        &self,
        document_type: &str,
        target_table: &str,
        new_cursor: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, WatermarkError> {
        let key = WatermarkKey::new(document_type, target_table);
        match self.store.get(&key)? {
            Some(current) if new_cursor < current => {
                warn!(
                    key = %key,
                    current = %current,
                    requested = %new_cursor,
                    "ignoring watermark regression"
                );
                Ok(current)
            }
            Some(current) if new_cursor == current => Ok(current),
            _ => {
                self.store.set(&key, new_cursor)?;
                debug!(key = %key, cursor = %new_cursor, "advanced watermark");
                Ok(new_cursor)
            }
        }
    }
}
