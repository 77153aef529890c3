//! Runtime configuration.
//!
//! Loaded by layering: programmatic defaults, then `gpilot.yaml`, then
//! the documented environment variables (highest priority):
//! `DB_URL`, `QUEUE_POLL_INTERVAL_MS`, `QUEUE_DEFAULT_CONCURRENCY`,
//! `JOB_DEFAULT_TIMEOUT_MS`, `DAG_PARALLELISM_CAP`,
//! `METRICS_SNAPSHOT_INTERVAL_MS`, `ALERT_EVAL_INTERVAL_MS`,
//! `WEBHOOK_TIMEOUT_MS`, `WEBHOOK_MAX_ATTEMPTS`,
//! `HMAC_WEBHOOK_TOLERANCE_SECONDS`.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variables recognized as config overrides, matched
/// case-insensitively against the flat field names below.
const ENV_KEYS: &[&str] = &[
    "db_url",
    "queue_poll_interval_ms",
    "queue_default_concurrency",
    "job_default_timeout_ms",
    "dag_parallelism_cap",
    "metrics_snapshot_interval_ms",
    "alert_eval_interval_ms",
    "webhook_timeout_ms",
    "webhook_max_attempts",
    "hmac_webhook_tolerance_seconds",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
    #[error("Invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_url: String,
    pub queue_poll_interval_ms: u64,
    pub queue_default_concurrency: usize,
    pub job_default_timeout_ms: u64,
    pub dag_parallelism_cap: usize,
    pub metrics_snapshot_interval_ms: u64,
    pub alert_eval_interval_ms: u64,
    pub webhook_timeout_ms: u64,
    pub webhook_max_attempts: u32,
    pub hmac_webhook_tolerance_seconds: u64,
    pub shutdown_grace_ms: u64,
    pub api: ApiConfig,
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: "sqlite:gpilot.db".to_string(),
            queue_poll_interval_ms: 500,
            queue_default_concurrency: 5,
            job_default_timeout_ms: 5 * 60 * 1000,
            dag_parallelism_cap: 8,
            metrics_snapshot_interval_ms: 60_000,
            alert_eval_interval_ms: 60_000,
            webhook_timeout_ms: 10_000,
            webhook_max_attempts: 5,
            hmac_webhook_tolerance_seconds: 300,
            shutdown_grace_ms: 30_000,
            api: ApiConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error.
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
    /// When set, logs also rotate daily into this directory.
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Load with the default file name.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("gpilot.yaml")
    }

    /// Load defaults, then the YAML file (if present), then environment
    /// overrides.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "db_url".into(),
                reason: "cannot be empty".into(),
            });
        }
        if self.queue_default_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_default_concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.dag_parallelism_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "dag_parallelism_cap".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.queue_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_poll_interval_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if self.webhook_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "webhook_max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Invalid {
                    field: "logging.level".into(),
                    reason: format!("unknown level '{other}'"),
                })
            }
        }
        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::Invalid {
                    field: "logging.format".into(),
                    reason: format!("unknown format '{other}'"),
                })
            }
        }
        Ok(())
    }
}
