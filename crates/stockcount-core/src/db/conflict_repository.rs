//! Conflict repository implementation

use crate::error::{Error, Result};
use crate::models::{ConflictRecord, MutationId, Operation, QueuedMutation, ResolutionState};
use rusqlite::{params, Connection, OptionalExtension};

use super::queue_repository::parse_column;

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Move a queued mutation into the conflict store in one transaction.
    ///
    /// Returns `None` when the mutation is no longer queued.
    fn capture(
        &self,
        id: &MutationId,
        detail: &str,
        detected_at: i64,
    ) -> Result<Option<ConflictRecord>>;

    /// Fetch a conflict by ID, whatever its state
    fn get(&self, id: &MutationId) -> Result<Option<ConflictRecord>>;

    /// Open conflicts, newest first
    fn list_open(&self) -> Result<Vec<ConflictRecord>>;

    /// Mark an open conflict dismissed. Returns whether a record changed.
    fn dismiss(&self, id: &MutationId, resolved_at: i64) -> Result<bool>;

    /// Number of open conflicts
    fn count_open(&self) -> Result<usize>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

const SELECT_COLUMNS: &str =
    "SELECT id, method, path, payload, detail, detected_at, resolution_state FROM sync_conflicts";

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a conflict from a database row
    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRecord> {
        let id: String = row.get(0)?;
        let method: String = row.get(1)?;
        let state: String = row.get(6)?;
        Ok(ConflictRecord {
            id: parse_column(0, &id)?,
            operation: Operation {
                method: parse_column(1, &method)?,
                path: row.get(2)?,
            },
            payload: row.get(3)?,
            detail: row.get(4)?,
            timestamp: row.get(5)?,
            resolution_state: parse_column::<ResolutionState>(6, &state)?,
        })
    }

    fn load_queued(&self, id: &MutationId) -> Result<Option<QueuedMutation>> {
        let mutation = self
            .conn
            .query_row(
                "SELECT method, path, payload, created_at, attempts, last_error
                 FROM queued_mutations WHERE id = ?",
                params![id.as_str()],
                |row| {
                    let method: String = row.get(0)?;
                    Ok(QueuedMutation {
                        id: *id,
                        operation: Operation {
                            method: parse_column(0, &method)?,
                            path: row.get(1)?,
                        },
                        payload: row.get(2)?,
                        created_at: row.get(3)?,
                        attempts: row.get(4)?,
                        last_error: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(mutation)
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn capture(
        &self,
        id: &MutationId,
        detail: &str,
        detected_at: i64,
    ) -> Result<Option<ConflictRecord>> {
        let tx = self.conn.unchecked_transaction()?;

        let Some(mutation) = self.load_queued(id)? else {
            return Ok(None);
        };

        tx.execute(
            "DELETE FROM queued_mutations WHERE id = ?",
            params![id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO sync_conflicts (id, method, path, payload, detail, detected_at, resolution_state)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                id.as_str(),
                mutation.operation.method.as_str(),
                mutation.operation.path,
                mutation.payload,
                detail,
                detected_at,
                ResolutionState::Open.as_str(),
            ],
        )
        .map_err(Error::from_storage)?;
        tx.commit()?;

        Ok(Some(ConflictRecord {
            id: *id,
            operation: mutation.operation,
            payload: mutation.payload,
            detail: detail.to_string(),
            timestamp: detected_at,
            resolution_state: ResolutionState::Open,
        }))
    }

    fn get(&self, id: &MutationId) -> Result<Option<ConflictRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id.as_str()],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(record)
    }

    fn list_open(&self) -> Result<Vec<ConflictRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE resolution_state = 'open'
             ORDER BY detected_at DESC, rowid DESC"
        ))?;

        let records = stmt
            .query_map([], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn dismiss(&self, id: &MutationId, resolved_at: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET resolution_state = ?, resolved_at = ?
             WHERE id = ? AND resolution_state = 'open'",
            params![ResolutionState::Dismissed.as_str(), resolved_at, id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn count_open(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE resolution_state = 'open'",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, QueueRepository, SqliteQueueRepository};
    use crate::models::HttpMethod;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn queued(db: &Database, path: &str) -> QueuedMutation {
        let mutation = QueuedMutation::new(
            Operation::new(HttpMethod::Post, path).unwrap(),
            "{}",
            1,
        );
        SqliteQueueRepository::new(db.connection())
            .insert(&mutation)
            .unwrap();
        mutation
    }

    #[test]
    fn test_capture_moves_mutation_out_of_queue() {
        let db = setup();
        let queue = SqliteQueueRepository::new(db.connection());
        let conflicts = SqliteConflictRepository::new(db.connection());
        let mutation = queued(&db, "/sessions/1/lines");

        let record = conflicts
            .capture(&mutation.id, "session already closed", 99)
            .unwrap()
            .unwrap();

        assert_eq!(record.id, mutation.id);
        assert_eq!(record.operation, mutation.operation);
        assert_eq!(record.timestamp, 99);
        assert!(record.is_open());
        assert_eq!(queue.get(&mutation.id).unwrap(), None);
        assert_eq!(conflicts.get(&mutation.id).unwrap(), Some(record));
    }

    #[test]
    fn test_capture_of_unknown_mutation_is_noop() {
        let db = setup();
        let conflicts = SqliteConflictRepository::new(db.connection());
        assert_eq!(conflicts.capture(&MutationId::new(), "x", 1).unwrap(), None);
        assert_eq!(conflicts.count_open().unwrap(), 0);
    }

    #[test]
    fn test_list_open_newest_first() {
        let db = setup();
        let conflicts = SqliteConflictRepository::new(db.connection());
        let older = queued(&db, "/a");
        let newer = queued(&db, "/b");

        conflicts.capture(&older.id, "first", 10).unwrap();
        conflicts.capture(&newer.id, "second", 20).unwrap();

        let ids: Vec<_> = conflicts
            .list_open()
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn test_dismiss_hides_record_but_keeps_it() {
        let db = setup();
        let conflicts = SqliteConflictRepository::new(db.connection());
        let mutation = queued(&db, "/a");
        conflicts.capture(&mutation.id, "approved already", 10).unwrap();

        assert!(conflicts.dismiss(&mutation.id, 20).unwrap());
        assert!(!conflicts.dismiss(&mutation.id, 30).unwrap());

        assert!(conflicts.list_open().unwrap().is_empty());
        let stored = conflicts.get(&mutation.id).unwrap().unwrap();
        assert_eq!(stored.resolution_state, ResolutionState::Dismissed);
    }
}
