use std::path::{Path, PathBuf};

use serde::Serialize;
use stockcount_core::config::{EnvOverrides, SyncSettings};
use stockcount_core::sync::{system_clock, FlushOutcome, FlushReport, HttpMutationBackend};
use stockcount_core::util::payload_summary;
use stockcount_core::{ConflictRecord, MutationId, QueuedMutation, SyncStorage};

use crate::error::CliError;

/// Resolved settings, environment and database location for one invocation.
#[derive(Debug)]
pub struct CliContext {
    pub settings: SyncSettings,
    pub env: EnvOverrides,
    pub db_path: PathBuf,
}

impl CliContext {
    pub fn load(cli_db_path: Option<PathBuf>, cli_config: Option<PathBuf>) -> Result<Self, CliError> {
        let env = EnvOverrides::from_env();
        let config_path = match cli_config {
            Some(path) => path,
            None => default_config_path()?,
        };
        let mut settings = SyncSettings::load_from_path(&config_path)?;
        settings.apply_env(&env);
        settings.validate()?;
        let db_path = resolve_db_path(cli_db_path, &env)?;
        Ok(Self {
            settings,
            env,
            db_path,
        })
    }

    pub fn open_storage(&self) -> Result<SyncStorage, CliError> {
        Ok(SyncStorage::open_path(&self.db_path, system_clock())?)
    }

    pub fn backend(&self) -> Result<HttpMutationBackend, CliError> {
        let base_url = self
            .settings
            .api_base_url()
            .ok_or(CliError::BackendNotConfigured)?;
        Ok(
            HttpMutationBackend::new(base_url, self.settings.request_timeout())?
                .with_bearer_token(self.env.api_token.clone()),
        )
    }
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    env: &EnvOverrides,
) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env.db_path.clone()) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("stockcount").join("sync.db"))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("stockcount").join("config.json"))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}

pub fn parse_mutation_id(raw: &str) -> Result<MutationId, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyField("Mutation ID"));
    }
    trimmed
        .parse::<MutationId>()
        .map_err(|_| CliError::InvalidId(trimmed.to_string()))
}

pub fn parse_payload(raw: Option<&str>) -> Result<serde_json::Value, CliError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(serde_json::json!({})),
        Some(raw) => {
            serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
        }
    }
}

pub fn normalize_required(value: &str, field: &'static str) -> Result<String, CliError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Request body for a new count line.
pub fn count_line_payload(item_code: &str, quantity: f64, counted_at_ms: i64) -> serde_json::Value {
    serde_json::json!({
        "item_code": item_code,
        "quantity": quantity,
        "counted_at": format_timestamp(counted_at_ms),
    })
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub method: String,
    pub path: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub created_at_iso: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub fn queue_item(mutation: &QueuedMutation) -> QueueItem {
    QueueItem {
        id: mutation.id.to_string(),
        method: mutation.operation.method.as_str().to_string(),
        path: mutation.operation.path.clone(),
        payload: serde_json::from_str(&mutation.payload)
            .unwrap_or_else(|_| serde_json::Value::String(mutation.payload.clone())),
        created_at: mutation.created_at,
        created_at_iso: format_timestamp(mutation.created_at),
        attempts: mutation.attempts,
        last_error: mutation.last_error.clone(),
    }
}

pub fn format_queue_lines(mutations: &[QueuedMutation]) -> Vec<String> {
    mutations
        .iter()
        .enumerate()
        .map(|(index, mutation)| {
            let mut line = format!(
                "{:>3}. {}  {:<6} {:<32}  {}",
                index + 1,
                mutation.id,
                mutation.operation.method.as_str(),
                mutation.operation.path,
                payload_summary(&mutation.payload, 48)
            );
            if mutation.attempts > 0 {
                line.push_str(&format!("  attempts={}", mutation.attempts));
            }
            if let Some(error) = &mutation.last_error {
                line.push_str(&format!("  last_error=\"{error}\""));
            }
            line
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: String,
    pub method: String,
    pub path: String,
    pub detail: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub state: String,
}

pub fn conflict_item(record: &ConflictRecord) -> ConflictItem {
    ConflictItem {
        id: record.id.to_string(),
        method: record.operation.method.as_str().to_string(),
        path: record.operation.path.clone(),
        detail: record.detail.clone(),
        detected_at: record.timestamp,
        detected_at_iso: format_timestamp(record.timestamp),
        state: record.resolution_state.as_str().to_string(),
    }
}

pub fn format_conflict_lines(records: &[ConflictRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            format!(
                "{}  {}  {} {}  {}",
                format_timestamp(record.timestamp),
                record.id,
                record.operation.method.as_str(),
                record.operation.path,
                record.detail
            )
        })
        .collect()
}

pub fn format_flush_report(report: &FlushReport) -> String {
    let outcome = match &report.outcome {
        FlushOutcome::Drained => "queue drained".to_string(),
        FlushOutcome::Offline => "offline; nothing more sent".to_string(),
        FlushOutcome::RetryScheduled { until_ms, attempts } => format!(
            "paused after failure (attempt {attempts}); retry after {}",
            format_timestamp(*until_ms)
        ),
        FlushOutcome::Stalled {
            mutation_id,
            attempts,
        } => format!("sync stalled on {mutation_id} after {attempts} attempts"),
        FlushOutcome::AlreadyRunning => "another flush is already running".to_string(),
        FlushOutcome::Deferred => "waiting for backoff".to_string(),
    };
    format!(
        "Flush: {outcome} (applied {}, already applied {}, conflicts {}, dropped {})",
        report.applied,
        report.already_applied,
        report.conflicts.len(),
        report.dropped.len()
    )
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn display_path(path: &Path) -> String {
    path.display().to_string()
}
