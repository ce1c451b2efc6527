//! Backing store for tracker state.
//!
//! The store is modeled after a spreadsheet: a status table whose rows keep a
//! stable index (so existing keys are updated in place and new keys appended),
//! a settings table of scalar strings, and a notes table holding JSON chunks.
//! Callers are responsible for holding the [`crate::lock::StoreLock`] around
//! writes; the store itself only guarantees each call is atomic.

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

pub const SETTING_LAST_MODIFIED: &str = "last_modified";
pub const SETTING_CONNECTED: &str = "connected";
pub const SETTING_COMPRESSION: &str = "compression_enabled";

/// One row of the status table.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusRow {
    pub row: usize,
    pub key: String,
    pub value: String,
}

pub trait TrackerStore: Send + Sync {
    /// Full-table read of the status table, in row order.
    fn read_status_rows(&self) -> Result<Vec<StatusRow>>;
    /// Overwrite the value of existing rows, addressed by row index.
    fn update_status_rows(&self, updates: &[(usize, String)]) -> Result<()>;
    /// Append new `(key, value)` rows in one bulk write.
    fn append_status_rows(&self, rows: &[(String, String)]) -> Result<()>;

    fn read_settings(&self) -> Result<HashMap<String, String>>;
    fn write_setting(&self, key: &str, value: &str) -> Result<()>;

    fn read_note_chunks(&self) -> Result<Vec<String>>;
    /// Replace every note chunk row with `chunks`.
    fn replace_note_chunks(&self, chunks: &[String]) -> Result<()>;

    /// Make all previous writes durable.
    fn flush(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryTables {
    status: Vec<(String, String)>,
    settings: HashMap<String, String>,
    notes: Vec<String>,
}

/// Volatile store, used by tests and `--memory` runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackerStore for MemoryStore {
    fn read_status_rows(&self) -> Result<Vec<StatusRow>> {
        let tables = self.tables.read();
        Ok(tables
            .status
            .iter()
            .enumerate()
            .map(|(row, (key, value))| StatusRow { row, key: key.clone(), value: value.clone() })
            .collect())
    }

    fn update_status_rows(&self, updates: &[(usize, String)]) -> Result<()> {
        let mut tables = self.tables.write();
        for (row, value) in updates {
            match tables.status.get_mut(*row) {
                Some(slot) => slot.1 = value.clone(),
                None => {
                    return Err(crate::error::TrackerError::Store(format!(
                        "status row {row} does not exist"
                    )));
                }
            }
        }
        Ok(())
    }

    fn append_status_rows(&self, rows: &[(String, String)]) -> Result<()> {
        self.tables.write().status.extend(rows.iter().cloned());
        Ok(())
    }

    fn read_settings(&self) -> Result<HashMap<String, String>> {
        Ok(self.tables.read().settings.clone())
    }

    fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        self.tables.write().settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn read_note_chunks(&self) -> Result<Vec<String>> {
        Ok(self.tables.read().notes.clone())
    }

    fn replace_note_chunks(&self, chunks: &[String]) -> Result<()> {
        self.tables.write().notes = chunks.to_vec();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS status (
        row   INTEGER PRIMARY KEY,
        key   TEXT NOT NULL,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS notes (
        chunk INTEGER PRIMARY KEY,
        json  TEXT NOT NULL
    );
";

/// Durable store backed by a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::TrackerError::Store(format!(
                    "Failed to create {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl TrackerStore for SqliteStore {
    fn read_status_rows(&self) -> Result<Vec<StatusRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT row, key, value FROM status ORDER BY row")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(StatusRow {
                    row: r.get::<_, i64>(0)? as usize,
                    key: r.get(1)?,
                    value: r.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn update_status_rows(&self, updates: &[(usize, String)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE status SET value = ?1 WHERE row = ?2")?;
            for (row, value) in updates {
                if stmt.execute(params![value, *row as i64])? == 0 {
                    return Err(crate::error::TrackerError::Store(format!(
                        "status row {row} does not exist"
                    )));
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn append_status_rows(&self, rows: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            // Row indices continue from the current maximum, mirroring an append below the last sheet row.
            let next: Option<i64> = tx
                .query_row("SELECT MAX(row) FROM status", [], |r| r.get(0))
                .optional()?
                .flatten();
            let mut row = next.map(|n| n + 1).unwrap_or(0);
            let mut stmt = tx.prepare("INSERT INTO status (row, key, value) VALUES (?1, ?2, ?3)")?;
            for (key, value) in rows {
                stmt.execute(params![row, key, value])?;
                row += 1;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn read_settings(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let map = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(map)
    }

    fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn read_note_chunks(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT json FROM notes ORDER BY chunk")?;
        let chunks = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    fn replace_note_chunks(&self, chunks: &[String]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM notes", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO notes (chunk, json) VALUES (?1, ?2)")?;
            for (i, json) in chunks.iter().enumerate() {
                stmt.execute(params![i as i64, json])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.conn
            .lock()
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }
}
