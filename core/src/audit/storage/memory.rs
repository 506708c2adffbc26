//! In-memory audit storage
//!
//! Bounded ring of events; when full the oldest record is evicted. Nothing
//! survives a restart.

use super::{AuditStorage, closed_error};
use crate::audit::chain::{ChainLinker, ChainReport, verify_chain};
use crate::audit::config::AuditConfig;
use crate::audit::event::AuditEvent;
use crate::audit::export::{ExportFormat, export_events};
use crate::audit::query::{AuditQuery, AuditQueryResult};
use crate::audit::stats::AuditStats;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Lower bound on retained events
pub const MIN_MEMORY_EVENTS: usize = 10_000;

/// Ring-buffer backend
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    capacity: usize,
    closed: AtomicBool,
    evicted: AtomicU64,
}

struct Inner {
    events: VecDeque<Stored>,
    chain: ChainLinker,
    bytes: u64,
}

struct Stored {
    event: AuditEvent,
    size: u64,
}

impl MemoryStorage {
    /// Capacity is ten times the auditor queue, at least [`MIN_MEMORY_EVENTS`]
    pub fn new(config: &AuditConfig) -> Self {
        let capacity = config.queue_size.saturating_mul(10).max(MIN_MEMORY_EVENTS);
        Self::with_capacity(capacity, config.hash_chain)
    }

    pub fn with_capacity(capacity: usize, hash_chain: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(Inner {
                events: VecDeque::with_capacity(capacity.min(MIN_MEMORY_EVENTS)),
                chain: ChainLinker::new(hash_chain),
                bytes: 0,
            }),
            capacity,
            closed: AtomicBool::new(false),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    /// Records evicted to make room
    pub fn total_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(closed_error())
        } else {
            Ok(())
        }
    }

    fn snapshot(&self) -> Vec<AuditEvent> {
        self.inner
            .read()
            .events
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn store(&self, mut event: AuditEvent) -> Result<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();

        let hash = inner.chain.seal(&mut event)?;
        let size = serde_json::to_vec(&event)?.len() as u64 + 1;

        if inner.events.len() >= self.capacity {
            if let Some(old) = inner.events.pop_front() {
                inner.bytes -= old.size;
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
        inner.events.push_back(Stored { event, size });
        inner.bytes += size;
        inner.chain.commit(hash);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditQueryResult> {
        self.ensure_open()?;
        let matched: Vec<AuditEvent> = self
            .inner
            .read()
            .events
            .iter()
            .filter(|s| query.matches(&s.event))
            .map(|s| s.event.clone())
            .collect();
        Ok(query.apply(matched))
    }

    async fn export(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        format: ExportFormat,
    ) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let window = AuditQuery::new().between(start, end);
        let events: Vec<AuditEvent> = self
            .inner
            .read()
            .events
            .iter()
            .filter(|s| window.in_window(&s.event.timestamp))
            .map(|s| s.event.clone())
            .collect();
        export_events(&events, format)
    }

    async fn stats(&self) -> Result<AuditStats> {
        self.ensure_open()?;
        let inner = self.inner.read();
        Ok(AuditStats::from_events(
            inner.events.iter().map(|s| &s.event),
            inner.bytes,
        ))
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn rotate(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        let before = inner.events.len();

        let mut freed = 0;
        inner.events.retain(|s| {
            let keep = s.event.timestamp >= cutoff;
            if !keep {
                freed += s.size;
            }
            keep
        });
        inner.bytes -= freed;

        let removed = before - inner.events.len();
        debug!(removed = removed, cutoff = %cutoff, "Memory audit storage cleaned up");
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn verify_chain(&self) -> Result<ChainReport> {
        self.ensure_open()?;
        let linked = self.inner.read().chain.is_linked();
        Ok(verify_chain(&self.snapshot(), linked))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::VigilError;
    use chrono::Duration;

    fn event(id: u64) -> AuditEvent {
        let mut event = AuditEvent::new("data.access", "alice", "read", format!("doc-{id}"));
        event.id = id;
        event
    }

    #[tokio::test]
    async fn test_store_seals_and_chains() {
        let storage = MemoryStorage::with_capacity(10, true);
        for id in 1..=3 {
            storage.store(event(id)).await.unwrap();
        }

        let result = storage.query(&AuditQuery::new()).await.unwrap();
        assert_eq!(result.total_count, 3);
        assert!(result.events.iter().all(|e| e.hash.is_some()));
        assert_eq!(result.events[1].prev_hash, result.events[0].hash);

        assert!(storage.verify_chain().await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let storage = MemoryStorage::with_capacity(3, true);
        for id in 1..=5 {
            storage.store(event(id)).await.unwrap();
        }

        assert_eq!(storage.len(), 3);
        assert_eq!(storage.total_evicted(), 2);
        let ids: Vec<u64> = storage
            .query(&AuditQuery::new())
            .await
            .unwrap()
            .events
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![3, 4, 5]);

        // Head of the chain was evicted; the rest still verifies
        assert!(storage.verify_chain().await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_cleanup_before_cutoff() {
        let storage = MemoryStorage::with_capacity(10, false);
        let mut old = event(1);
        old.timestamp = Utc::now() - Duration::days(100);
        storage.store(old).await.unwrap();
        storage.store(event(2)).await.unwrap();

        let removed = storage
            .cleanup(Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.stats().await.unwrap().total_events, 1);
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_calls() {
        let storage = MemoryStorage::with_capacity(10, true);
        storage.close().await.unwrap();
        assert!(storage.is_closed());
        assert!(matches!(
            storage.store(event(1)).await,
            Err(VigilError::StorageUnavailable(_))
        ));
        assert!(storage.query(&AuditQuery::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_minimum_capacity() {
        let storage = MemoryStorage::new(&AuditConfig {
            queue_size: 5,
            ..AuditConfig::memory()
        });
        assert_eq!(storage.capacity(), MIN_MEMORY_EVENTS);
    }

    #[tokio::test]
    async fn test_stats_size_tracks_contents() {
        let storage = MemoryStorage::with_capacity(10, true);
        storage.store(event(1)).await.unwrap();
        let first = storage.stats().await.unwrap();
        assert!(first.storage_size_bytes > 0);
        assert_eq!(first, storage.stats().await.unwrap());
    }
}
