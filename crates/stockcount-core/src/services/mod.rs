//! Services shared by every client surface.

mod conflicts;
mod queue;
mod storage;

pub use conflicts::ConflictStore;
pub use queue::WriteQueue;
pub use storage::SyncStorage;
