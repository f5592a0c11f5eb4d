//! REST replay backend.

use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;

use super::{MutationBackend, ReplayOutcome, ReplayResult, SyncError};
use crate::error::{Error, Result};
use crate::models::{HttpMethod, QueuedMutation};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Request header carrying the mutation id
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// Response header set by the backend when the idempotency key was already applied
pub const IDEMPOTENT_REPLAY_HEADER: &str = "Idempotent-Replayed";

const DUPLICATE_REQUEST_CODE: &str = "idempotency_key_reused";

/// Replays mutations as HTTP calls against the inventory backend.
#[derive(Clone)]
pub struct HttpMutationBackend {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpMutationBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpMutationBackend")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpMutationBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            auth_token: None,
            client,
        })
    }

    /// Attach a session bearer token obtained by the auth collaborator.
    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.auth_token = normalize_text_option(token);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, mutation: &QueuedMutation) -> String {
        format!("{}{}", self.base_url, mutation.operation.path)
    }
}

impl MutationBackend for HttpMutationBackend {
    async fn replay(&self, mutation: &QueuedMutation) -> ReplayResult {
        let body: serde_json::Value = serde_json::from_str(&mutation.payload).map_err(|error| {
            SyncError::Malformed(format!("stored payload is not valid JSON: {error}"))
        })?;

        let mut request = self
            .client
            .request(to_reqwest_method(mutation.operation.method), self.url_for(mutation))
            .header(IDEMPOTENCY_KEY_HEADER, mutation.id.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| SyncError::Retryable(describe_transport_error(&error)))?;

        let status = response.status().as_u16();
        let replay_header = response
            .headers()
            .get(IDEMPOTENT_REPLAY_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
        let body = if response.status().is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };

        classify_response(status, replay_header, &body)
    }
}

/// Map a backend response onto the replay taxonomy.
///
/// - 2xx: applied (already applied when the replay header is set)
/// - 409 carrying the duplicate-request code or replay header: already applied
/// - 400: malformed, can never succeed
/// - 401, 403, 408, 425, 429 and 5xx: retryable
/// - any other 4xx: conflict
pub fn classify_response(status: u16, replay_header: bool, body: &str) -> ReplayResult {
    let error_body = parse_error_body(body);

    match status {
        200..=299 if replay_header => Ok(ReplayOutcome::AlreadyApplied),
        200..=299 => Ok(ReplayOutcome::Applied),
        409 if replay_header || error_body.is_duplicate_request() => {
            Ok(ReplayOutcome::AlreadyApplied)
        }
        400 => Err(SyncError::Malformed(error_body.describe(status))),
        401 | 403 | 408 | 425 | 429 | 500..=599 => {
            Err(SyncError::Retryable(error_body.describe(status)))
        }
        400..=499 => Err(SyncError::Conflict(error_body.describe(status))),
        _ => Err(SyncError::Retryable(format!("unexpected HTTP {status}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct BackendErrorBody {
    code: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl BackendErrorBody {
    fn is_duplicate_request(&self) -> bool {
        self.code.as_deref() == Some(DUPLICATE_REQUEST_CODE)
    }

    /// Short human-readable reason; raw bodies are never passed through.
    fn describe(&self, status: u16) -> String {
        let reason = self
            .message
            .clone()
            .or_else(|| self.error.clone())
            .and_then(|text| normalize_text_option(Some(text)));
        match reason {
            Some(reason) => format!("{} (HTTP {status})", compact_text(&reason)),
            None => format!("HTTP {status}"),
        }
    }
}

fn parse_error_body(body: &str) -> BackendErrorBody {
    serde_json::from_str(body).unwrap_or_default()
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "could not connect to backend".to_string()
    } else {
        format!("network error: {}", compact_text(&error.to_string()))
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("backend base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "backend base URL must include http:// or https://".to_string(),
        ))
    }
}
