//! Audit log configuration

use crate::error::VigilError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default segment size before automatic rotation (100 MiB)
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 100 * 1024 * 1024;
/// Default retention applied by `cleanup`
pub const DEFAULT_RETENTION_DAYS: u32 = 90;
/// Default interval between forced flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default capacity of the auditor's in-memory buffer
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Newline-delimited JSON segments in a directory
    #[default]
    File,
    /// Bounded in-process ring, lost on restart
    Memory,
}

impl FromStr for StorageType {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "file" => Ok(StorageType::File),
            "memory" => Ok(StorageType::Memory),
            other => Err(VigilError::Config(format!("unsupported storage type: {other}"))),
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageType::File => "file",
            StorageType::Memory => "memory",
        })
    }
}

/// Settings for an [`Auditor`](super::Auditor) and its storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directory holding segment files
    pub storage_path: PathBuf,
    pub storage_type: StorageType,
    /// Segment size that triggers rotation during `store`
    pub max_segment_size_bytes: u64,
    /// Age after which `cleanup` removes records
    pub retention_days: u32,
    /// Gzip new segments
    pub compression: bool,
    /// Link each stored event to its predecessor
    pub hash_chain: bool,
    /// How often buffered writes are forced to disk
    pub flush_interval: Duration,
    /// Events the auditor buffers before `log` reports a full queue
    pub queue_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("audit"),
            storage_type: StorageType::File,
            max_segment_size_bytes: DEFAULT_MAX_SEGMENT_SIZE,
            retention_days: DEFAULT_RETENTION_DAYS,
            compression: false,
            hash_chain: true,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl AuditConfig {
    /// File-backed config rooted at `path`
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: path.into(),
            ..Default::default()
        }
    }

    /// Memory-backed config
    pub fn memory() -> Self {
        Self {
            storage_type: StorageType::Memory,
            ..Default::default()
        }
    }

    /// Replace zero values that would stall or disable the auditor
    pub fn normalized(mut self) -> Self {
        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if self.queue_size == 0 {
            self.queue_size = DEFAULT_QUEUE_SIZE;
        }
        if self.max_segment_size_bytes == 0 {
            self.max_segment_size_bytes = DEFAULT_MAX_SEGMENT_SIZE;
        }
        self
    }
}
