//! Shared on-device storage for the write queue and conflict store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::db::{
    ConflictRepository, Database, QueueRepository, SqliteConflictRepository,
    SqliteQueueRepository,
};
use crate::sync::SharedClock;
use crate::{Error, Result};

use super::{ConflictStore, WriteQueue};

/// Owner of the sync database.
///
/// Hands out cloneable [`WriteQueue`] and [`ConflictStore`] handles that all
/// serialize through the same connection lock, so every operation (including
/// its commit) completes before the next one starts. Statements run on the
/// blocking thread pool, never on an async worker.
#[derive(Clone)]
pub struct SyncStorage {
    inner: Arc<StorageInner>,
}

pub(crate) struct StorageInner {
    db: Mutex<Database>,
    db_path: Option<PathBuf>,
    clock: SharedClock,
    pending: watch::Sender<usize>,
    open_conflicts: watch::Sender<usize>,
    queue_revision: watch::Sender<u64>,
}

impl SyncStorage {
    /// Open storage at the given filesystem path, creating parent directories.
    pub fn open_path(db_path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::open(&db_path)?;
        tracing::info!("Opened sync storage at {}", db_path.display());
        Self::from_database(db, Some(db_path), clock)
    }

    /// Open in-memory storage (primarily for tests).
    pub fn open_in_memory(clock: SharedClock) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Self::from_database(db, None, clock)
    }

    fn from_database(db: Database, db_path: Option<PathBuf>, clock: SharedClock) -> Result<Self> {
        let pending = SqliteQueueRepository::new(db.connection()).count()?;
        let open_conflicts = SqliteConflictRepository::new(db.connection()).count_open()?;
        if pending > 0 || open_conflicts > 0 {
            tracing::info!(pending, open_conflicts, "Restored offline sync state");
        }

        Ok(Self {
            inner: Arc::new(StorageInner {
                db: Mutex::new(db),
                db_path,
                clock,
                pending: watch::Sender::new(pending),
                open_conflicts: watch::Sender::new(open_conflicts),
                queue_revision: watch::Sender::new(0),
            }),
        })
    }

    /// Handle to the durable write queue
    pub fn queue(&self) -> WriteQueue {
        WriteQueue::new(Arc::clone(&self.inner))
    }

    /// Handle to the conflict store
    pub fn conflicts(&self) -> ConflictStore {
        ConflictStore::new(Arc::clone(&self.inner))
    }

    /// Clock used for queue and conflict timestamps
    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.inner.clock)
    }

    /// Database file path, `None` for in-memory storage
    pub fn path(&self) -> Option<&Path> {
        self.inner.db_path.as_deref()
    }

    /// Teardown: checkpoint the write-ahead log so the main file is complete.
    ///
    /// Handles that are still alive keep working; the connection closes when
    /// the last one is dropped.
    pub async fn close(self) -> Result<()> {
        if with_db(&self.inner, |_, db| db.checkpoint()).await? {
            tracing::warn!("WAL checkpoint blocked by another connection");
        } else {
            tracing::debug!("Sync storage checkpointed");
        }
        Ok(())
    }
}

/// Run `task` against the connection on the blocking pool.
///
/// The task still completes when the calling future is dropped, so a started
/// write is never abandoned halfway.
pub(crate) async fn with_db<T, F>(storage: &Arc<StorageInner>, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&StorageInner, &Database) -> Result<T> + Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || {
        // A panicked task cannot leave a transaction open; SQLite rolls it back
        let db = storage.db.lock().unwrap_or_else(PoisonError::into_inner);
        task(&*storage, &*db)
    })
    .await
    .map_err(|error| Error::StorageTask(error.to_string()))?
}

impl StorageInner {
    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Publish fresh counts to observers. Called while the lock is held.
    pub(crate) fn publish_counts(&self, db: &Database) -> Result<()> {
        let pending = SqliteQueueRepository::new(db.connection()).count()?;
        let open_conflicts = SqliteConflictRepository::new(db.connection()).count_open()?;
        self.pending.send_replace(pending);
        self.open_conflicts.send_replace(open_conflicts);
        self.bump_queue_revision();
        Ok(())
    }

    /// Tell observers the queue contents changed, even when the count did not.
    pub(crate) fn bump_queue_revision(&self) {
        self.queue_revision
            .send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    pub(crate) fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    pub(crate) fn subscribe_conflicts(&self) -> watch::Receiver<usize> {
        self.open_conflicts.subscribe()
    }

    pub(crate) fn subscribe_queue_revision(&self) -> watch::Receiver<u64> {
        self.queue_revision.subscribe()
    }
}

#[cfg(test)]
impl SyncStorage {
    /// Cap the database at its current size plus `extra_pages`.
    pub(crate) async fn limit_growth(&self, extra_pages: i64) -> Result<()> {
        with_db(&self.inner, move |_, db| {
            let current = db.page_count()?;
            db.set_max_page_count(current + extra_pages)?;
            Ok(())
        })
        .await
    }
}
