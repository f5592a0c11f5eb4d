//! Durable write queue service.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::db::{QueueRepository, SqliteQueueRepository};
use crate::models::{MutationId, Operation, QueuedMutation};
use crate::{Error, Result};

use super::storage::{with_db, StorageInner};

/// FIFO queue of pending mutations, persisted before every call returns.
#[derive(Clone)]
pub struct WriteQueue {
    storage: Arc<StorageInner>,
}

impl WriteQueue {
    pub(crate) const fn new(storage: Arc<StorageInner>) -> Self {
        Self { storage }
    }

    /// Append a new mutation at the tail and return its id.
    ///
    /// Fails with [`Error::QueueFull`] when local storage is exhausted and with
    /// [`Error::MalformedMutation`] when the payload cannot be serialized. In
    /// both cases nothing is stored and the caller must surface the error.
    pub async fn enqueue<T>(&self, operation: Operation, payload: &T) -> Result<MutationId>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(payload)
            .map_err(|error| Error::MalformedMutation(error.to_string()))?;

        let mutation = QueuedMutation::new(operation, payload, self.storage.now_ms());
        let id = mutation.id;
        let operation = mutation.operation.to_string();
        with_db(&self.storage, move |storage, db| {
            SqliteQueueRepository::new(db.connection()).insert(&mutation)?;
            storage.publish_counts(db)
        })
        .await?;

        tracing::debug!(id = %id, operation = %operation, "Queued mutation");
        Ok(id)
    }

    /// Oldest pending mutation without removing it.
    pub async fn peek_front(&self) -> Result<Option<QueuedMutation>> {
        with_db(&self.storage, |_, db| {
            SqliteQueueRepository::new(db.connection()).peek_front()
        })
        .await
    }

    /// Fetch a pending mutation by id.
    pub async fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>> {
        let id = *id;
        with_db(&self.storage, move |_, db| {
            SqliteQueueRepository::new(db.connection()).get(&id)
        })
        .await
    }

    /// Delete a mutation after a successful replay. No-op when already gone.
    pub async fn remove_by_id(&self, id: &MutationId) -> Result<bool> {
        let id = *id;
        with_db(&self.storage, move |storage, db| {
            let removed = SqliteQueueRepository::new(db.connection()).remove(&id)?;
            if removed {
                storage.publish_counts(db)?;
            }
            Ok(removed)
        })
        .await
    }

    /// Record a failed replay: bump `attempts`, store the reason, keep position.
    pub async fn requeue(&self, id: &MutationId, error: &str) -> Result<Option<QueuedMutation>> {
        let id = *id;
        let error = error.to_string();
        with_db(&self.storage, move |storage, db| {
            let updated = SqliteQueueRepository::new(db.connection()).record_failure(&id, &error)?;
            if updated.is_some() {
                storage.bump_queue_revision();
            }
            Ok(updated)
        })
        .await
    }

    /// Snapshot of pending mutations in replay order.
    pub async fn list(&self) -> Result<Vec<QueuedMutation>> {
        with_db(&self.storage, |_, db| {
            SqliteQueueRepository::new(db.connection()).list()
        })
        .await
    }

    pub async fn len(&self) -> Result<usize> {
        with_db(&self.storage, |_, db| {
            SqliteQueueRepository::new(db.connection()).count()
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Observe the pending mutation count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.storage.subscribe_pending()
    }

    /// Observe any change to the queue, including attempt bookkeeping that
    /// leaves the pending count unchanged.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.storage.subscribe_queue_revision()
    }
}
