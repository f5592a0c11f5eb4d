//! User-facing sync status shared by every client surface.

use crate::sync::SchedulerState;

/// Summary shown in the status bar of the offline queue screen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Offline,
    Syncing,
    /// Nothing pending
    Synced,
    /// Mutations waiting for the next pass or backoff deadline
    Pending,
    /// Automatic retries gave up; a manual flush is needed
    Stalled,
}

impl SyncStatus {
    pub const fn derive(online: bool, scheduler: &SchedulerState, pending: usize) -> Self {
        match scheduler {
            SchedulerState::Flushing => Self::Syncing,
            SchedulerState::Stalled { .. } if pending > 0 => Self::Stalled,
            _ if !online => Self::Offline,
            _ if pending == 0 => Self::Synced,
            _ => Self::Pending,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Stalled => "sync stalled",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
