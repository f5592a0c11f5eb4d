//! stockcount-core - Offline sync core for the stock-counting client
//!
//! This crate contains the durable write queue, the flush scheduler that
//! replays it against the inventory backend, the conflict store, and the
//! barcode confidence buffer and dedup cache used while scanning.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod scan;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{ConflictRecord, MutationId, Operation, QueuedMutation};
pub use services::{ConflictStore, SyncStorage, WriteQueue};
pub use state::SyncStatus;
