//! Projection runtime configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. `.env` (loaded into the process environment)
//! 2. an optional `projections.{toml,yaml,json}` file
//! 3. `WARDEN__*` environment variables, e.g. `WARDEN__WORKER__PARTITIONS=8`

use std::time::Duration;

use config::{Config as Cfg, File};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load projection configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid projection configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub consistency: ConsistencySettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerSettings {
    /// Number of ordered partitions events are hashed onto.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsistencySettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_json")]
    pub json: bool,
}

fn default_partitions() -> usize {
    4
}

fn default_idle_tick_ms() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_interval_ms() -> u64 {
    50
}

fn default_max_interval_ms() -> u64 {
    2_000
}

fn default_conflict_retries() -> u32 {
    8
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            idle_tick_ms: default_idle_tick_ms(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: default_log_json(),
        }
    }
}

impl WorkerSettings {
    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }
}

impl LogSettings {
    /// Install the process-wide subscriber. `RUST_LOG` overrides `filter`.
    pub fn install(&self) {
        warden_observability::init_with(&self.filter, self.json);
    }
}

impl ProjectionConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load_from("projections")
    }

    /// Load from `file` (extension optional, missing file allowed) and the
    /// environment, without reading `.env`.
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let config = Cfg::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.partitions == 0 {
            return Err(ConfigError::Invalid("worker.partitions must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.consistency.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "consistency.poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = ProjectionConfig::load_from("does-not-exist-projections").unwrap();
        assert_eq!(cfg.worker.partitions, 4);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.consistency.timeout_ms, 5_000);
        assert!(cfg.log.json);
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let cfg: ProjectionConfig = Cfg::builder()
            .add_source(config::File::from_str(
                "[worker]\npartitions = 8\n\n[retry]\nconflict_retries = 2\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.worker.partitions, 8);
        assert_eq!(cfg.worker.idle_tick_ms, 250);
        assert_eq!(cfg.retry.conflict_retries, 2);
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn zero_partitions_is_rejected() {
        let mut cfg = ProjectionConfig::default();
        cfg.worker.partitions = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
