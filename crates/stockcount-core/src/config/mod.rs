//! Sync and scan settings.
//!
//! `SyncSettings` is stored as JSON. Every field has a default so a missing
//! or partial file is valid. Secrets (the API token) are never written to the
//! file; they only arrive through [`EnvOverrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scan::ScanBufferConfig;
use crate::sync::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_API_BASE_URL: &str = "STOCKCOUNT_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "STOCKCOUNT_API_TOKEN";
pub const ENV_DB_PATH: &str = "STOCKCOUNT_DB_PATH";

/// Top-level settings file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Inventory backend, e.g. `https://api.example.com/v1`
    pub api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
    /// Periodic flush timer; `None` disables it
    pub flush_interval_secs: Option<u64>,
    pub scan: ScanSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            request_timeout_secs: 15,
            retry: RetrySettings::default(),
            flush_interval_secs: Some(60),
            scan: ScanSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_delay_ms: duration_ms(policy.base_delay),
            max_delay_ms: duration_ms(policy.max_delay),
            max_attempts: policy.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSettings {
    pub confidence_threshold: u32,
    pub buffer_timeout_ms: u64,
    pub buffer_max_size: usize,
    pub dedup_window_secs: u64,
    /// Raw frames buffered between camera and consumer
    pub channel_capacity: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let buffer = ScanBufferConfig::default();
        Self {
            confidence_threshold: buffer.threshold,
            buffer_timeout_ms: duration_ms(buffer.timeout),
            buffer_max_size: buffer.max_size,
            dedup_window_secs: crate::scan::DEFAULT_DEDUP_WINDOW.as_secs(),
            channel_capacity: 32,
        }
    }
}

/// Values taken from the process environment
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl std::fmt::Debug for EnvOverrides {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EnvOverrides")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api_base_url: normalize_text_option(lookup(ENV_API_BASE_URL)),
            api_token: normalize_text_option(lookup(ENV_API_TOKEN)),
            db_path: normalize_text_option(lookup(ENV_DB_PATH)).map(PathBuf::from),
        }
    }
}

impl SyncSettings {
    /// Load settings from a JSON file. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|error| Error::Config(format!("{}: {error}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(raw)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url.trim()) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.flush_interval_secs == Some(0) {
            return Err(Error::Config(
                "flush_interval_secs must be at least 1 (or null to disable)".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.scan.confidence_threshold == 0 {
            return Err(Error::Config(
                "scan.confidence_threshold must be at least 1".to_string(),
            ));
        }
        if self.scan.buffer_max_size == 0 || self.scan.channel_capacity == 0 {
            return Err(Error::Config(
                "scan.buffer_max_size and scan.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment overrides. Only the base URL lives in the settings;
    /// the token and database path are read from `env` by the caller.
    pub fn apply_env(&mut self, env: &EnvOverrides) {
        if let Some(url) = &env.api_base_url {
            self.api_base_url = Some(url.clone());
        }
    }

    /// Base URL trimmed and without a trailing slash.
    pub fn api_base_url(&self) -> Option<String> {
        normalize_text_option(self.api_base_url.clone())
            .map(|url| url.trim_end_matches('/').to_string())
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_secs.map(Duration::from_secs)
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            max_attempts: self.retry.max_attempts,
        }
    }

    pub const fn scan_buffer(&self) -> ScanBufferConfig {
        ScanBufferConfig {
            threshold: self.scan.confidence_threshold,
            timeout: Duration::from_millis(self.scan.buffer_timeout_ms),
            max_size: self.scan.buffer_max_size,
        }
    }

    pub const fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.scan.dedup_window_secs)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_component_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.scan_buffer(), ScanBufferConfig::default());
        assert_eq!(settings.dedup_window(), Duration::from_secs(300));
        assert_eq!(settings.flush_interval(), Some(Duration::from_secs(60)));
        settings.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let settings = SyncSettings::from_json(
            r#"{ "api_base_url": "https://api.example.com/v1/", "retry": { "max_attempts": 8 } }"#,
        )
        .unwrap();
        assert_eq!(
            settings.api_base_url().as_deref(),
            Some("https://api.example.com/v1")
        );
        assert_eq!(settings.retry.max_attempts, 8);
        assert_eq!(settings.retry.base_delay_ms, 2_000);
        assert_eq!(settings.scan, ScanSettings::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = SyncSettings::from_json(r#"{ "scan": { "threshold": 3 } }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn validation_catches_bad_values() {
        let cases = [
            r#"{ "api_base_url": "api.example.com" }"#,
            r#"{ "request_timeout_secs": 0 }"#,
            r#"{ "flush_interval_secs": 0 }"#,
            r#"{ "retry": { "base_delay_ms": 10000, "max_delay_ms": 100 } }"#,
            r#"{ "retry": { "max_attempts": 0 } }"#,
            r#"{ "scan": { "confidence_threshold": 0 } }"#,
            r#"{ "scan": { "channel_capacity": 0 } }"#,
        ];
        for case in cases {
            assert!(SyncSettings::from_json(case).is_err(), "{case}");
        }
        assert!(SyncSettings::from_json(r#"{ "flush_interval_secs": null }"#).is_ok());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        assert_eq!(SyncSettings::load_from_path(&path).unwrap(), SyncSettings::default());

        let settings = SyncSettings {
            api_base_url: Some("http://localhost:8080".to_string()),
            flush_interval_secs: None,
            ..SyncSettings::default()
        };
        settings.save_to_path(&path).unwrap();
        assert_eq!(SyncSettings::load_from_path(&path).unwrap(), settings);
    }

    #[test]
    fn env_overrides_replace_base_url_and_redact_token() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_API_BASE_URL, " https://override.example.com "),
            (ENV_API_TOKEN, "secret-token"),
            (ENV_DB_PATH, "   "),
        ]);
        let env = EnvOverrides::from_lookup(|key| vars.get(key).map(ToString::to_string));
        assert_eq!(env.db_path, None);
        assert!(!format!("{env:?}").contains("secret-token"));

        let mut settings = SyncSettings::default();
        settings.apply_env(&env);
        assert_eq!(
            settings.api_base_url().as_deref(),
            Some("https://override.example.com")
        );
    }
}
