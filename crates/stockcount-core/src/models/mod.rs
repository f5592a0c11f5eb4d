//! Data models for stockcount

mod conflict;
mod mutation;

pub use conflict::{ConflictRecord, ResolutionState};
pub use mutation::{HttpMethod, MutationId, Operation, QueuedMutation};
