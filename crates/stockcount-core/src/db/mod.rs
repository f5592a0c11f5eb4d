//! Database layer for stockcount

mod conflict_repository;
mod connection;
mod migrations;
mod queue_repository;

pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use connection::Database;
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
