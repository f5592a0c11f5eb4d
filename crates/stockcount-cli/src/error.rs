use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stockcount_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid mutation ID: {0}")]
    InvalidId(String),
    #[error("Payload must be valid JSON: {0}")]
    InvalidPayload(String),
    #[error("Quantity must be a non-negative number")]
    InvalidQuantity,
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Backend is not configured. Set `api_base_url` in the settings file or STOCKCOUNT_API_BASE_URL."
    )]
    BackendNotConfigured,
}
