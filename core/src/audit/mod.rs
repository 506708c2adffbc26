//! Tamper-evident audit log
//!
//! [`Auditor`] accepts events without blocking and hands them to an
//! [`AuditStorage`] backend in the background. Backends seal each event with
//! a SHA-256 content hash and, when chaining is on, link it to the previous
//! event, so [`Auditor::verify_integrity`] can detect edits after the fact.
//!
//! ```ignore
//! let auditor = Auditor::start(AuditConfig::file("/var/lib/vigil/audit")).await?;
//! auditor.log_authentication("alice", true, "password", "10.0.0.7")?;
//!
//! let recent = auditor
//!     .query(&AuditQuery::new().since(one_hour_ago).actor("alice"))
//!     .await?;
//! auditor.stop().await?;
//! ```

mod auditor;
mod chain;
mod config;
mod event;
mod export;
mod query;
mod stats;
pub mod storage;

pub use auditor::{Auditor, AuditorMetrics};
pub use chain::{ChainIssue, ChainIssueKind, ChainReport, GENESIS_HASH, verify_chain};
pub use config::{
    AuditConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_SEGMENT_SIZE, DEFAULT_QUEUE_SIZE,
    DEFAULT_RETENTION_DAYS, StorageType,
};
pub use event::{AuditEvent, EventType, Metadata, Severity};
pub use export::{CSV_HEADER, ExportFormat, export_events};
pub use query::{AuditQuery, AuditQueryResult, SortBy, SortOrder};
pub use stats::AuditStats;
pub use storage::{AuditStorage, FileStorage, MemoryStorage, new_storage};
