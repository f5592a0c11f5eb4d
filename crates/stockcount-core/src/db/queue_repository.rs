//! Write queue repository implementation

use crate::error::{Error, Result};
use crate::models::{HttpMethod, MutationId, Operation, QueuedMutation};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for durable write queue storage
pub trait QueueRepository {
    /// Append a mutation at the tail
    fn insert(&self, mutation: &QueuedMutation) -> Result<()>;

    /// Oldest pending mutation, if any
    fn peek_front(&self) -> Result<Option<QueuedMutation>>;

    /// Fetch a mutation by ID
    fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>>;

    /// Delete a mutation. Returns whether a row was removed.
    fn remove(&self, id: &MutationId) -> Result<bool>;

    /// Record a failed attempt without moving the mutation
    fn record_failure(&self, id: &MutationId, error: &str) -> Result<Option<QueuedMutation>>;

    /// All pending mutations in replay order
    fn list(&self) -> Result<Vec<QueuedMutation>>;

    /// Number of pending mutations
    fn count(&self) -> Result<usize>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

const SELECT_COLUMNS: &str =
    "SELECT id, method, path, payload, created_at, attempts, last_error FROM queued_mutations";

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a mutation from a database row
    fn parse_mutation(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedMutation> {
        let id: String = row.get(0)?;
        let method: String = row.get(1)?;
        Ok(QueuedMutation {
            id: parse_column(0, &id)?,
            operation: Operation {
                method: parse_column::<HttpMethod>(1, &method)?,
                path: row.get(2)?,
            },
            payload: row.get(3)?,
            created_at: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
        })
    }
}

/// Parse a text column, surfacing failures as conversion errors
pub(super) fn parse_column<T>(index: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn insert(&self, mutation: &QueuedMutation) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO queued_mutations (id, method, path, payload, created_at, attempts, last_error)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    mutation.id.as_str(),
                    mutation.operation.method.as_str(),
                    mutation.operation.path,
                    mutation.payload,
                    mutation.created_at,
                    mutation.attempts,
                    mutation.last_error,
                ],
            )
            .map_err(Error::from_storage)?;
        Ok(())
    }

    fn peek_front(&self) -> Result<Option<QueuedMutation>> {
        let mutation = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} ORDER BY seq ASC LIMIT 1"),
                [],
                Self::parse_mutation,
            )
            .optional()?;
        Ok(mutation)
    }

    fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>> {
        let mutation = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id.as_str()],
                Self::parse_mutation,
            )
            .optional()?;
        Ok(mutation)
    }

    fn remove(&self, id: &MutationId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM queued_mutations WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn record_failure(&self, id: &MutationId, error: &str) -> Result<Option<QueuedMutation>> {
        let rows = self
            .conn
            .execute(
                "UPDATE queued_mutations SET attempts = attempts + 1, last_error = ? WHERE id = ?",
                params![error, id.as_str()],
            )
            .map_err(Error::from_storage)?;

        if rows == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    fn list(&self) -> Result<Vec<QueuedMutation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"))?;

        let mutations = stmt
            .query_map([], Self::parse_mutation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(mutations)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queued_mutations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn mutation(path: &str, created_at: i64) -> QueuedMutation {
        QueuedMutation::new(
            Operation::new(HttpMethod::Post, path).unwrap(),
            r#"{"qty":1}"#,
            created_at,
        )
    }

    #[test]
    fn test_insert_and_peek() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let first = mutation("/a", 10);
        let second = mutation("/b", 20);
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();

        assert_eq!(repo.peek_front().unwrap(), Some(first));
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn test_order_follows_insertion_not_timestamp() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        // Clock skew: the second mutation carries an older timestamp
        let first = mutation("/a", 500);
        let second = mutation("/b", 100);
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();

        let paths: Vec<_> = repo
            .list()
            .unwrap()
            .into_iter()
            .map(|m| m.operation.path)
            .collect();
        assert_eq!(paths, vec!["/a", "/b"]);
    }

    #[test]
    fn test_record_failure_keeps_position() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let first = mutation("/a", 1);
        let second = mutation("/b", 2);
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();

        let updated = repo
            .record_failure(&first.id, "timeout")
            .unwrap()
            .unwrap();
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.last_error.as_deref(), Some("timeout"));

        let front = repo.peek_front().unwrap().unwrap();
        assert_eq!(front.id, first.id);
        assert_eq!(front.attempts, 1);
    }

    #[test]
    fn test_record_failure_on_missing_id() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        assert_eq!(repo.record_failure(&MutationId::new(), "x").unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let item = mutation("/a", 1);
        repo.insert(&item).unwrap();

        assert!(repo.remove(&item.id).unwrap());
        assert!(!repo.remove(&item.id).unwrap());
        assert_eq!(repo.peek_front().unwrap(), None);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let item = mutation("/a", 1);
        repo.insert(&item).unwrap();
        assert!(repo.insert(&item).is_err());
        assert_eq!(repo.count().unwrap(), 1);
    }
}
