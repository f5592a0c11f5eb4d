//! Queued mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable).
///
/// The id is generated once on the client and never changes across retries,
/// so the backend can use it as an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Create a new unique mutation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// HTTP verb of a replayable mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unsupported mutation method '{other}'"
            ))),
        }
    }
}

/// Verb + target resource of a mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub method: HttpMethod,
    /// Endpoint path relative to the backend base URL, always starting with `/`
    pub path: String,
}

impl Operation {
    /// Build an operation, validating the endpoint path.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let path = path.trim();
        if !path.starts_with('/') {
            return Err(Error::InvalidInput(format!(
                "mutation path must start with '/': {path}"
            )));
        }
        if path.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!(
                "mutation path must not contain whitespace: {path}"
            )));
        }
        Ok(Self {
            method,
            path: path.to_string(),
        })
    }

    /// Create a count line inside a counting session.
    #[must_use]
    pub fn create_count_line(session_id: &str) -> Self {
        Self {
            method: HttpMethod::Post,
            path: format!("/sessions/{}/lines", urlencoding::encode(session_id)),
        }
    }

    /// Approve a previously submitted count line.
    #[must_use]
    pub fn approve_count_line(session_id: &str, line_id: &str) -> Self {
        Self {
            method: HttpMethod::Post,
            path: format!(
                "/sessions/{}/lines/{}/approve",
                urlencoding::encode(session_id),
                urlencoding::encode(line_id)
            ),
        }
    }

    /// Change the status of a counting session (open, closed, ...).
    #[must_use]
    pub fn change_session_status(session_id: &str) -> Self {
        Self {
            method: HttpMethod::Patch,
            path: format!("/sessions/{}/status", urlencoding::encode(session_id)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A pending mutation waiting to be replayed against the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Client-generated id, doubles as the idempotency key
    pub id: MutationId,
    /// Verb and target
    pub operation: Operation,
    /// JSON request body text, replayed as-is
    pub payload: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Failed replay attempts so far
    pub attempts: u32,
    /// Reason of the most recent failed replay
    pub last_error: Option<String>,
}

impl QueuedMutation {
    /// Create a fresh mutation with zero attempts
    #[must_use]
    pub fn new(operation: Operation, payload: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: MutationId::new(),
            operation,
            payload: payload.into(),
            created_at,
            attempts: 0,
            last_error: None,
        }
    }
}
