//! Audit storage backends
//!
//! An [`AuditStorage`] persists events and answers queries over them. The
//! backend owns the hash chain: `store` seals each event under the backend's
//! write lock, so links follow storage order.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use super::chain::ChainReport;
use super::config::{AuditConfig, StorageType};
use super::event::AuditEvent;
use super::export::ExportFormat;
use super::query::{AuditQuery, AuditQueryResult};
use super::stats::AuditStats;
use crate::error::{Result, VigilError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persistence for audit events
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Seal and persist one event
    async fn store(&self, event: AuditEvent) -> Result<()>;

    /// Events matching the query, sorted and paginated
    async fn query(&self, query: &AuditQuery) -> Result<AuditQueryResult>;

    /// Events with `start <= timestamp <= end`, serialized
    async fn export(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        format: ExportFormat,
    ) -> Result<Vec<u8>>;

    async fn stats(&self) -> Result<AuditStats>;

    /// Force buffered writes to durable storage
    async fn flush(&self) -> Result<()>;

    /// Start a new segment; a no-op where segments don't exist
    async fn rotate(&self) -> Result<()>;

    /// Delete records older than `cutoff`, returning how many units
    /// (segments or records) were removed
    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Flush and release resources; later calls fail
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Recompute hashes and links over everything stored
    async fn verify_chain(&self) -> Result<ChainReport>;
}

/// Build the backend selected by `config`
pub fn new_storage(config: &AuditConfig) -> Result<Arc<dyn AuditStorage>> {
    match config.storage_type {
        StorageType::File => Ok(Arc::new(FileStorage::open(config)?)),
        StorageType::Memory => Ok(Arc::new(MemoryStorage::new(config))),
    }
}

pub(crate) fn closed_error() -> VigilError {
    VigilError::StorageUnavailable("storage is closed".to_string())
}
