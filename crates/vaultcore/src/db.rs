//! Sqlite database layer
//!
//! Connection-per-call for file-backed databases (WAL lets readers and
//! the single writer proceed in parallel); a persistent mutex-guarded
//! connection for in-memory databases, since each new in-memory
//! connection would be a fresh empty database.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Database wrapper with connection-per-call pattern.
pub struct Database {
    path: PathBuf,
    /// For in-memory databases, we keep a persistent connection
    /// since each new in-memory connection creates a fresh database
    memory_conn: Option<Mutex<Connection>>,
}

impl Database {
    /// Open database at path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self {
            path,
            memory_conn: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            memory_conn: Some(Mutex::new(conn)),
        })
    }

    /// Run a closure against a connection - for file-based, opens new;
    /// for memory, locks the shared one.
    ///
    /// `busy_timeout` bounds how long a writer waits on lock contention
    /// before surfacing a retryable error instead of hanging.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        if let Some(ref mutex) = self.memory_conn {
            let mut conn = mutex.lock().unwrap();
            f(&mut conn)
        } else {
            let mut conn = Connection::open(&self.path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            f(&mut conn)
        }
    }

    /// Initialize schema.
    pub fn init_schema(&self) -> Result<()> {
        // For memory databases, schema is initialized in open_memory
        if self.memory_conn.is_some() {
            return Ok(());
        }

        self.with_conn(|conn| {
            conn.execute_batch(include_str!("schema.sql"))?;
            Ok(())
        })
    }
}

/// Parse an RFC3339 timestamp stored as TEXT, falling back to now.
pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_has_schema() {
        let db = Database::open_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vault.db");
        let db = Database::open(&path).unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
        assert!(path.exists());
    }

    #[test]
    fn test_parse_datetime_roundtrip() {
        let now = Utc::now();
        let parsed = parse_datetime(now.to_rfc3339());
        assert_eq!(parsed, now);
    }
}
