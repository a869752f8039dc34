//! Inspector configuration
//!
//! Defaults live in [`defaults`]; values can be loaded from JSON and
//! overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{InspectorError, Result};

pub mod defaults {
    /// Per-task body capture cap (1 MiB)
    pub const DEFAULT_MAX_BODY_BYTES: u64 = 1_048_576;

    /// Tasks idle for longer than this are reclaimed by the sweep (5 minutes)
    pub const DEFAULT_STALE_TASK_TIMEOUT_MS: u64 = 300_000;

    /// Maintenance loop tick (30 seconds)
    pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

    /// Name of the serializer thread
    pub const DEFAULT_WORKER_NAME: &str = "netlens-serializer";

    pub const ENV_MAX_BODY_BYTES: &str = "NETLENS_MAX_BODY_BYTES";
    pub const ENV_BODY_DELIVERY: &str = "NETLENS_BODY_DELIVERY";
    pub const ENV_STALE_TASK_TIMEOUT_MS: &str = "NETLENS_STALE_TASK_TIMEOUT_MS";
    pub const ENV_SWEEP_INTERVAL_MS: &str = "NETLENS_SWEEP_INTERVAL_MS";
}

/// When captured response bodies are handed to the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyDelivery {
    /// One body event per accepted data chunk
    #[default]
    Streamed,
    /// Accumulate chunks and emit once when the task finishes successfully
    Buffered,
}

impl std::str::FromStr for BodyDelivery {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streamed" => Ok(Self::Streamed),
            "buffered" => Ok(Self::Buffered),
            other => Err(InspectorError::Config(format!(
                "unknown body delivery mode: {other}"
            ))),
        }
    }
}

/// Inspector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub max_body_bytes: u64,
    pub body_delivery: BodyDelivery,
    pub stale_task_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub worker_name: String,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: defaults::DEFAULT_MAX_BODY_BYTES,
            body_delivery: BodyDelivery::default(),
            stale_task_timeout_ms: defaults::DEFAULT_STALE_TASK_TIMEOUT_MS,
            sweep_interval_ms: defaults::DEFAULT_SWEEP_INTERVAL_MS,
            worker_name: defaults::DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

impl InspectorConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| InspectorError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            InspectorError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply `NETLENS_*` environment overrides on top of this configuration
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(defaults::ENV_MAX_BODY_BYTES) {
            self.max_body_bytes = parse_u64(defaults::ENV_MAX_BODY_BYTES, &raw)?;
        }
        if let Some(raw) = lookup(defaults::ENV_BODY_DELIVERY) {
            self.body_delivery = raw.parse()?;
        }
        if let Some(raw) = lookup(defaults::ENV_STALE_TASK_TIMEOUT_MS) {
            self.stale_task_timeout_ms = parse_u64(defaults::ENV_STALE_TASK_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(defaults::ENV_SWEEP_INTERVAL_MS) {
            self.sweep_interval_ms = parse_u64(defaults::ENV_SWEEP_INTERVAL_MS, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(InspectorError::Config(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.stale_task_timeout_ms == 0 {
            return Err(InspectorError::Config(
                "stale_task_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_body_delivery(mut self, body_delivery: BodyDelivery) -> Self {
        self.body_delivery = body_delivery;
        self
    }

    pub fn with_stale_task_timeout(mut self, timeout: Duration) -> Self {
        self.stale_task_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn stale_task_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_task_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| InspectorError::Config(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = InspectorConfig::new();
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert_eq!(config.body_delivery, BodyDelivery::Streamed);
        assert_eq!(config.worker_name, "netlens-serializer");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            InspectorConfig::from_json_str(r#"{"max_body_bytes": 64, "body_delivery": "buffered"}"#)
                .unwrap();
        assert_eq!(config.max_body_bytes, 64);
        assert_eq!(config.body_delivery, BodyDelivery::Buffered);
        assert_eq!(
            config.sweep_interval_ms,
            defaults::DEFAULT_SWEEP_INTERVAL_MS
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = InspectorConfig::from_json_str(r#"{"sweep_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, InspectorError::Config(_)));

        let err = InspectorConfig::from_json_str("not json").unwrap_err();
        assert!(err.to_string().contains("invalid config JSON"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"stale_task_timeout_ms": 1500}}"#).unwrap();

        let config = InspectorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.stale_task_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (defaults::ENV_MAX_BODY_BYTES, "2048"),
            (defaults::ENV_BODY_DELIVERY, "Buffered"),
        ]
        .into_iter()
        .collect();

        let config = InspectorConfig::new()
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_body_bytes, 2048);
        assert_eq!(config.body_delivery, BodyDelivery::Buffered);
    }

    #[test]
    fn test_env_override_parse_error() {
        let err = InspectorConfig::new()
            .with_overrides_from(|key| {
                (key == defaults::ENV_SWEEP_INTERVAL_MS).then(|| "soon".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains(defaults::ENV_SWEEP_INTERVAL_MS));
    }

    #[test]
    fn test_builders() {
        let config = InspectorConfig::new()
            .with_max_body_bytes(10)
            .with_body_delivery(BodyDelivery::Buffered)
            .with_stale_task_timeout(Duration::from_secs(2))
            .with_sweep_interval(Duration::from_millis(250));

        assert_eq!(config.max_body_bytes, 10);
        assert_eq!(config.stale_task_timeout_ms, 2000);
        assert_eq!(config.sweep_interval(), Duration::from_millis(250));
    }
}
