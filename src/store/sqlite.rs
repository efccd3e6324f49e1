//! SQLite store: the local file-backed map.
//!
//! WAL mode plus a busy timeout lets several worker processes on one host
//! share the same file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use super::Store;
use crate::error::{Error, Result};

/// How long a statement waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Store backed by a single SQLite table. Owns the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // In-memory databases answer "memory" here; that is fine.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS content (
                id      TEXT PRIMARY KEY,
                blob    BLOB NOT NULL
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::store("sqlite", e.to_string()))
    }
}

impl Store for SqliteStore {
    fn contains(&self, key: &str) -> Result<bool> {
        let found = self
            .conn()?
            .query_row("SELECT 1 FROM content WHERE id = ?1", params![key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blob = self
            .conn()?
            .query_row(
                "SELECT blob FROM content WHERE id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO content (id, blob) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET blob = excluded.blob",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM content WHERE id = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        // rowid survives the upsert, so this is first-insertion order.
        let mut stmt = conn.prepare("SELECT id FROM content ORDER BY rowid ASC")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM content", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
