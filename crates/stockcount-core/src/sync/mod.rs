//! Replay of queued mutations against the inventory backend.

mod clock;
mod http;
mod retry;
mod scheduler;

use std::sync::Arc;

use thiserror::Error;

use crate::models::QueuedMutation;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use http::{
    classify_response, HttpMutationBackend, IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAY_HEADER,
};
pub use retry::RetryPolicy;
pub use scheduler::{FlushOutcome, FlushReport, FlushScheduler, FlushTrigger, SchedulerState};

/// Successful outcomes of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The backend applied the mutation now
    Applied,
    /// The backend had already applied this idempotency key
    AlreadyApplied,
}

/// Why a replay failed, mapped to what the scheduler does about it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network unreachable, backend 5xx or timeout. Requeued with backoff.
    #[error("Backend temporarily unavailable: {0}")]
    Retryable(String),
    /// The target entity changed state; blind replay is unsafe.
    #[error("Replay conflict: {0}")]
    Conflict(String),
    /// The mutation can never succeed. Dropped with a diagnostic.
    #[error("Malformed mutation: {0}")]
    Malformed(String),
}

/// User-facing grouping of replay failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorCategory {
    Retryable,
    Conflict,
    Malformed,
}

impl SyncError {
    pub const fn category(&self) -> SyncErrorCategory {
        match self {
            Self::Retryable(_) => SyncErrorCategory::Retryable,
            Self::Conflict(_) => SyncErrorCategory::Conflict,
            Self::Malformed(_) => SyncErrorCategory::Malformed,
        }
    }

    /// Message without the category prefix
    pub fn detail(&self) -> &str {
        match self {
            Self::Retryable(detail) | Self::Conflict(detail) | Self::Malformed(detail) => detail,
        }
    }
}

pub type ReplayResult = Result<ReplayOutcome, SyncError>;

/// Backend that can replay one queued mutation.
///
/// Implementations must send `mutation.id` as the idempotency key.
#[allow(async_fn_in_trait)]
pub trait MutationBackend {
    async fn replay(&self, mutation: &QueuedMutation) -> ReplayResult;
}

impl<B: MutationBackend> MutationBackend for Arc<B> {
    async fn replay(&self, mutation: &QueuedMutation) -> ReplayResult {
        (**self).replay(mutation).await
    }
}
