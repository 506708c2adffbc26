//! Configuration for VIGIL
//!
//! Defaults are overridden by `VIGIL_*` environment variables.

use crate::audit::{AuditConfig, StorageType};
use crate::breaker::CircuitBreakerConfig;
use crate::error::{Result, VigilError};
use crate::queue::{QUEUE_BREAKER_NAME, QueueConfig};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for VIGIL
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level, used when `RUST_LOG` is unset
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,

    /// Breaker guarding the event queue
    pub breaker: CircuitBreakerConfig,

    pub queue: QueueConfig,

    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(VigilError::Config(format!(
                "{other} (expected 'json' or 'pretty')"
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            breaker: CircuitBreakerConfig::named(QUEUE_BREAKER_NAME),
            queue: QueueConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(level) = lookup("VIGIL_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = lookup("VIGIL_LOG_FORMAT") {
            config.log_format = format
                .parse()
                .map_err(|e| invalid("VIGIL_LOG_FORMAT", e))?;
        }

        if let Some(path) = lookup("VIGIL_AUDIT_PATH") {
            config.audit.storage_path = PathBuf::from(path);
        }
        if let Some(kind) = lookup("VIGIL_AUDIT_STORAGE") {
            config.audit.storage_type = kind
                .parse::<StorageType>()
                .map_err(|e| invalid("VIGIL_AUDIT_STORAGE", e))?;
        }
        if let Some(v) = parse(&lookup, "VIGIL_AUDIT_MAX_SEGMENT_BYTES")? {
            config.audit.max_segment_size_bytes = v;
        }
        if let Some(v) = parse(&lookup, "VIGIL_AUDIT_RETENTION_DAYS")? {
            config.audit.retention_days = v;
        }
        if let Some(v) = parse(&lookup, "VIGIL_AUDIT_COMPRESSION")? {
            config.audit.compression = v;
        }
        if let Some(v) = parse(&lookup, "VIGIL_AUDIT_HASH_CHAIN")? {
            config.audit.hash_chain = v;
        }
        if let Some(ms) = parse(&lookup, "VIGIL_AUDIT_FLUSH_INTERVAL_MS")? {
            config.audit.flush_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, "VIGIL_AUDIT_QUEUE_SIZE")? {
            config.audit.queue_size = v;
        }

        if let Some(v) = parse(&lookup, "VIGIL_QUEUE_WORKERS")? {
            config.queue.workers = v;
        }
        if let Some(v) = parse(&lookup, "VIGIL_QUEUE_CAPACITY")? {
            config.queue.per_type_capacity = v;
        }

        if let Some(v) = parse(&lookup, "VIGIL_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = v;
        }
        if let Some(ms) = parse(&lookup, "VIGIL_BREAKER_TIMEOUT_MS")? {
            config.breaker.timeout = Duration::from_millis(ms);
        }

        config.breaker = config.breaker.normalized();
        config.queue = config.queue.normalized();
        config.audit = config.audit.normalized();
        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().map_err(|e| invalid(key, e)))
        .transpose()
}

fn invalid(key: &str, e: impl std::fmt::Display) -> VigilError {
    VigilError::Config(format!("invalid {key}: {e}"))
}
