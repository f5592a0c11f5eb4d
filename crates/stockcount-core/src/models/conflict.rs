//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{MutationId, Operation};
use crate::error::Error;

/// Review state of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    /// Waiting for a person to look at it
    Open,
    /// Resolved or dismissed by a person; no longer listed
    Dismissed,
}

impl ResolutionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "dismissed" => Ok(Self::Dismissed),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution state '{other}'"
            ))),
        }
    }
}

/// A mutation the backend refused to apply because its target diverged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Same id as the originating queued mutation
    pub id: MutationId,
    /// Operation that was attempted
    pub operation: Operation,
    /// Payload that was attempted
    pub payload: String,
    /// Human-readable cause
    pub detail: String,
    /// Detection timestamp (unix ms)
    pub timestamp: i64,
    pub resolution_state: ResolutionState,
}

impl ConflictRecord {
    pub const fn is_open(&self) -> bool {
        matches!(self.resolution_state, ResolutionState::Open)
    }
}
