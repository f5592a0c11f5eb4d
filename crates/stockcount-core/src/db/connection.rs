//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// Database wrapper for the on-device `SQLite` store
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for durable, crash-safe writes
    fn configure(&self) -> Result<()> {
        // In-memory databases answer "memory"; only file databases switch to WAL
        let mode: String = self
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(mode = %mode, "Journal mode");
        // A committed enqueue must survive power loss
        self.conn.pragma_update(None, "synchronous", "FULL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Flush the write-ahead log into the main database file.
    ///
    /// Returns `true` when the checkpoint was blocked by another connection
    /// and could not complete.
    pub fn checkpoint(&self) -> Result<bool> {
        let busy: i64 = self
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))?;
        Ok(busy != 0)
    }

    /// Cap the database size in pages. Further writes fail with `SQLITE_FULL`.
    pub fn set_max_page_count(&self, pages: i64) -> Result<i64> {
        let applied = self
            .conn
            .pragma_update_and_check(None, "max_page_count", pages, |row| row.get(0))?;
        Ok(applied)
    }

    /// Current database size in pages
    pub fn page_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let value: i32 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_open_file_creates_schema() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("sync.db");
        {
            let db = Database::open(&path).unwrap();
            assert!(!db.checkpoint().unwrap());
        }
        assert!(path.exists());

        let reopened = Database::open(&path).unwrap();
        assert!(reopened.page_count().unwrap() > 0);
    }

    #[test]
    fn test_max_page_count_is_applied() {
        let db = Database::open_in_memory().unwrap();
        let current = db.page_count().unwrap();
        let applied = db.set_max_page_count(current + 1).unwrap();
        assert_eq!(applied, current + 1);
    }
}
