//! Conflict store service.

use std::sync::Arc;

use tokio::sync::watch;

use crate::db::{ConflictRepository, SqliteConflictRepository};
use crate::models::{ConflictRecord, MutationId};
use crate::Result;

use super::storage::{with_db, StorageInner};

/// Mutations the backend refused to replay, waiting for human review.
///
/// Resolving or dismissing only clears the client-side record. It never
/// re-enqueues the mutation and never talks to the backend.
#[derive(Clone)]
pub struct ConflictStore {
    storage: Arc<StorageInner>,
}

impl ConflictStore {
    pub(crate) const fn new(storage: Arc<StorageInner>) -> Self {
        Self { storage }
    }

    /// Move a queued mutation here. Used by the flush scheduler only.
    pub(crate) async fn capture(
        &self,
        id: &MutationId,
        detail: &str,
    ) -> Result<Option<ConflictRecord>> {
        let id = *id;
        let detail = detail.to_string();
        with_db(&self.storage, move |storage, db| {
            let record = SqliteConflictRepository::new(db.connection()).capture(
                &id,
                &detail,
                storage.now_ms(),
            )?;
            if record.is_some() {
                storage.publish_counts(db)?;
            }
            Ok(record)
        })
        .await
    }

    /// Open conflicts, newest first.
    pub async fn list(&self) -> Result<Vec<ConflictRecord>> {
        with_db(&self.storage, |_, db| {
            SqliteConflictRepository::new(db.connection()).list_open()
        })
        .await
    }

    pub async fn get(&self, id: &MutationId) -> Result<Option<ConflictRecord>> {
        let id = *id;
        with_db(&self.storage, move |_, db| {
            SqliteConflictRepository::new(db.connection()).get(&id)
        })
        .await
    }

    /// Mark the discrepancy as reconciled. Returns whether an open record changed.
    pub async fn resolve(&self, id: &MutationId) -> Result<bool> {
        self.close_record(id, "resolved").await
    }

    /// Mark the discrepancy as acceptable. Returns whether an open record changed.
    pub async fn dismiss(&self, id: &MutationId) -> Result<bool> {
        self.close_record(id, "dismissed").await
    }

    async fn close_record(&self, id: &MutationId, action: &'static str) -> Result<bool> {
        let id = *id;
        let changed = with_db(&self.storage, move |storage, db| {
            let changed =
                SqliteConflictRepository::new(db.connection()).dismiss(&id, storage.now_ms())?;
            if changed {
                storage.publish_counts(db)?;
            }
            Ok(changed)
        })
        .await?;
        if changed {
            tracing::info!(id = %id, action, "Conflict closed");
        }
        Ok(changed)
    }

    pub async fn len(&self) -> Result<usize> {
        with_db(&self.storage, |_, db| {
            SqliteConflictRepository::new(db.connection()).count_open()
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Observe the open conflict count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.storage.subscribe_conflicts()
    }
}
