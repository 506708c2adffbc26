//! Asynchronous audit front end
//!
//! `log` never waits: events go into a bounded channel and a background
//! consumer persists them. A second task flushes the backend on an interval.
//! `stop` drains whatever is still buffered before the backend closes.

use super::chain::ChainReport;
use super::config::AuditConfig;
use super::event::{AuditEvent, EventType, Metadata, Severity};
use super::export::ExportFormat;
use super::query::{AuditQuery, AuditQueryResult};
use super::stats::AuditStats;
use super::storage::{AuditStorage, new_storage};
use crate::error::{Result, VigilError};
use crate::metrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters exposed by [`Auditor::metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditorMetrics {
    /// Events accepted by `log`
    pub logged: u64,
    /// Events rejected because the buffer was full
    pub dropped: u64,
    /// Events persisted by the backend
    pub stored: u64,
    pub store_errors: u64,
    pub flush_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    logged: AtomicU64,
    dropped: AtomicU64,
    stored: AtomicU64,
    store_errors: AtomicU64,
    flush_errors: AtomicU64,
}

/// Buffered, queryable audit log
pub struct Auditor {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
    tx: mpsc::Sender<AuditEvent>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Auditor {
    /// Open the configured backend and start the background tasks
    ///
    /// Must be called inside a tokio runtime. Ids continue after the highest
    /// one already stored.
    pub async fn start(config: AuditConfig) -> Result<Self> {
        let config = config.normalized();
        let storage = new_storage(&config)?;
        let last_id = storage
            .query(&AuditQuery::new())
            .await?
            .events
            .iter()
            .map(|e| e.id)
            .max()
            .unwrap_or(0);
        Ok(Self::spawn(config, storage, last_id + 1))
    }

    /// Start over an already-built backend, numbering events from 1
    pub fn with_storage(config: AuditConfig, storage: Arc<dyn AuditStorage>) -> Self {
        Self::spawn(config.normalized(), storage, 1)
    }

    fn spawn(config: AuditConfig, storage: Arc<dyn AuditStorage>, first_id: u64) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size);
        let counters = Arc::new(Counters::default());
        let token = CancellationToken::new();

        let consumer = tokio::spawn(consume(
            rx,
            Arc::clone(&storage),
            Arc::clone(&counters),
            token.clone(),
        ));
        let flusher = tokio::spawn(flush_loop(
            Arc::clone(&storage),
            Arc::clone(&counters),
            token.clone(),
            config.flush_interval,
        ));

        info!(
            storage = storage.name(),
            first_id = first_id,
            queue_size = config.queue_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            hash_chain = config.hash_chain,
            "Auditor started"
        );

        Self {
            config,
            storage,
            tx,
            next_id: AtomicU64::new(first_id),
            counters,
            token,
            tasks: Mutex::new(vec![consumer, flusher]),
            stopped: AtomicBool::new(false),
        }
    }

    /// Record an event, returning its id
    ///
    /// Fails immediately with [`VigilError::QueueFull`] when the buffer is
    /// full and [`VigilError::Shutdown`] after [`stop`](Self::stop). Ids are
    /// assigned in call order; a rejected call still consumes one.
    pub fn log(
        &self,
        event_type: impl Into<EventType>,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        metadata: Metadata,
    ) -> Result<u64> {
        let mut event = AuditEvent::new(event_type, actor, action, resource);
        event.metadata = metadata;
        self.submit(event)
    }

    /// Record a prepared event; its id and timestamp are replaced
    pub fn submit(&self, mut event: AuditEvent) -> Result<u64> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(VigilError::Shutdown);
        }

        event.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        event.timestamp = Utc::now();
        event.hash = None;
        event.prev_hash = None;
        event.validate()?;

        let id = event.id;
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.logged.fetch_add(1, Ordering::Relaxed);
                metrics::try_record_audit("logged");
                metrics::try_set_audit_queue_len(self.queue_len());
                Ok(id)
            }
            Err(TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::try_record_audit("dropped");
                warn!(
                    id = event.id,
                    event_type = %event.event_type,
                    capacity = self.config.queue_size,
                    "Audit buffer full, event dropped"
                );
                Err(VigilError::QueueFull {
                    queue: "audit".to_string(),
                    capacity: self.config.queue_size,
                })
            }
            Err(TrySendError::Closed(_)) => Err(VigilError::Shutdown),
        }
    }

    pub fn log_authentication(&self, user: &str, success: bool, method: &str, ip: &str) -> Result<u64> {
        let event_type = if success {
            EventType::AUTH_SUCCESS
        } else {
            EventType::AUTH_FAILURE
        };
        self.log(
            event_type,
            user,
            "authentication",
            "auth-system",
            metadata([("method", json!(method)), ("ip", json!(ip))]),
        )
    }

    pub fn log_authorization(&self, user: &str, resource: &str, action: &str, allowed: bool) -> Result<u64> {
        let event_type = if allowed {
            EventType::AUTHZ_GRANTED
        } else {
            EventType::AUTHZ_DENIED
        };
        self.log(
            event_type,
            user,
            action,
            resource,
            metadata([("allowed", json!(allowed))]),
        )
    }

    pub fn log_data_access(&self, user: &str, data_type: &str, operation: &str, record_id: &str) -> Result<u64> {
        self.log(
            EventType::DATA_ACCESS,
            user,
            operation,
            data_type,
            metadata([("record_id", json!(record_id))]),
        )
    }

    pub fn log_security_event(
        &self,
        event_type: impl Into<EventType>,
        actor: &str,
        details: &str,
        severity: Severity,
    ) -> Result<u64> {
        self.log(
            event_type,
            actor,
            "security-event",
            "security-system",
            metadata([
                ("details", json!(details)),
                ("severity", json!(severity.as_str())),
            ]),
        )
    }

    /// System events are attributed to the `system` actor
    pub fn log_system_event(
        &self,
        event_type: impl Into<EventType>,
        component: &str,
        action: &str,
        status: &str,
    ) -> Result<u64> {
        self.log(
            event_type,
            "system",
            action,
            component,
            metadata([("status", json!(status))]),
        )
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<AuditQueryResult> {
        self.storage.query(query).await
    }

    pub async fn export(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        format: ExportFormat,
    ) -> Result<Vec<u8>> {
        self.storage.export(start, end, format).await
    }

    pub async fn stats(&self) -> Result<AuditStats> {
        self.storage.stats().await
    }

    pub async fn rotate(&self) -> Result<()> {
        self.storage.rotate().await
    }

    /// Apply the configured retention
    pub async fn cleanup(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.retention_days));
        self.cleanup_before(cutoff).await
    }

    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.storage.cleanup(cutoff).await?;
        info!(removed = removed, cutoff = %cutoff, "Audit retention applied");
        Ok(removed)
    }

    /// Recompute hashes and links over everything stored
    pub async fn verify_integrity(&self) -> Result<ChainReport> {
        let report = self.storage.verify_chain().await?;
        if report.is_valid() {
            debug!(checked = report.checked, "Audit chain verified");
        } else {
            warn!(
                checked = report.checked,
                issues = report.issues.len(),
                "Audit chain verification failed"
            );
        }
        Ok(report)
    }

    /// Stop the background tasks, persist everything buffered, close storage
    ///
    /// Idempotent.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Auditor task terminated abnormally");
            }
        }

        self.storage.close().await?;
        info!(
            stored = self.counters.stored.load(Ordering::Relaxed),
            dropped = self.counters.dropped.load(Ordering::Relaxed),
            "Auditor stopped"
        );
        Ok(())
    }

    /// Events buffered but not yet handed to storage
    pub fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Running with an open backend
    pub fn is_healthy(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && !self.storage.is_closed()
    }

    pub fn metrics(&self) -> AuditorMetrics {
        AuditorMetrics {
            logged: self.counters.logged.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            stored: self.counters.stored.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
            flush_errors: self.counters.flush_errors.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn AuditStorage> {
        &self.storage
    }
}

impl Drop for Auditor {
    fn drop(&mut self) {
        // Consumer still drains; storage closes when its last handle drops
        self.token.cancel();
    }
}

fn metadata<const N: usize>(entries: [(&str, serde_json::Value); N]) -> Metadata {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

async fn consume(
    mut rx: mpsc::Receiver<AuditEvent>,
    storage: Arc<dyn AuditStorage>,
    counters: Arc<Counters>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => store_one(storage.as_ref(), &counters, event).await,
                None => return,
            },
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(event) = rx.recv().await {
        store_one(storage.as_ref(), &counters, event).await;
        drained += 1;
    }
    metrics::try_set_audit_queue_len(0);
    debug!(drained = drained, "Audit consumer drained buffer");
}

async fn store_one(storage: &dyn AuditStorage, counters: &Counters, event: AuditEvent) {
    let id = event.id;
    match storage.store(event).await {
        Ok(()) => {
            counters.stored.fetch_add(1, Ordering::Relaxed);
            metrics::try_record_audit("stored");
        }
        Err(e) => {
            counters.store_errors.fetch_add(1, Ordering::Relaxed);
            metrics::try_record_audit("store_error");
            error!(id = id, storage = storage.name(), error = %e, "Failed to store audit event");
        }
    }
}

async fn flush_loop(
    storage: Arc<dyn AuditStorage>,
    counters: Arc<Counters>,
    token: CancellationToken,
    period: std::time::Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = storage.flush().await {
                    counters.flush_errors.fetch_add(1, Ordering::Relaxed);
                    error!(storage = storage.name(), error = %e, "Audit flush failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::storage::MemoryStorage;
    use std::time::Duration;

    fn memory_config(queue_size: usize) -> AuditConfig {
        AuditConfig {
            queue_size,
            flush_interval: Duration::from_millis(20),
            ..AuditConfig::memory()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_buffer_rejects_without_blocking() {
        let auditor = Auditor::start(memory_config(5)).await.unwrap();

        let mut rejected = 0;
        for i in 0..10 {
            match auditor.log("data.access", "alice", "read", format!("doc-{i}"), Metadata::new()) {
                Ok(_) => {}
                Err(VigilError::QueueFull { capacity, .. }) => {
                    assert_eq!(capacity, 5);
                    rejected += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(auditor.queue_len() <= 5);
        }

        assert!(rejected >= 5);
        assert_eq!(auditor.metrics().dropped, rejected);
        auditor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let auditor = Auditor::start(memory_config(100)).await.unwrap();
        let a = auditor.log_authentication("alice", true, "password", "10.0.0.1").unwrap();
        let b = auditor.log_authorization("alice", "/admin", "read", false).unwrap();
        let c = auditor.log_data_access("alice", "patients", "read", "p-1").unwrap();
        assert!(a < b && b < c);
        auditor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_drains_buffer() {
        let storage = Arc::new(MemoryStorage::with_capacity(1000, true));
        let auditor = Auditor::with_storage(memory_config(500), storage.clone());

        for i in 0..200 {
            auditor
                .log_system_event(EventType::SYSTEM_START, "worker", "boot", &format!("ok-{i}"))
                .unwrap();
        }
        auditor.stop().await.unwrap();

        assert_eq!(storage.len(), 200);
        assert_eq!(auditor.metrics().stored, 200);
        assert!(!auditor.is_healthy());
    }

    #[tokio::test]
    async fn test_log_after_stop_is_shutdown() {
        let auditor = Auditor::start(memory_config(10)).await.unwrap();
        auditor.stop().await.unwrap();
        auditor.stop().await.unwrap();

        assert!(matches!(
            auditor.log("data.access", "alice", "read", "doc", Metadata::new()),
            Err(VigilError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_invalid_event_rejected() {
        let auditor = Auditor::start(memory_config(10)).await.unwrap();
        assert!(matches!(
            auditor.log("data.access", "", "read", "doc", Metadata::new()),
            Err(VigilError::Validation(_))
        ));
        assert_eq!(auditor.metrics().logged, 0);
        auditor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_security_event_metadata() {
        let storage = Arc::new(MemoryStorage::with_capacity(10, true));
        let auditor = Auditor::with_storage(memory_config(10), storage.clone());
        auditor
            .log_security_event(EventType::SECURITY_ALERT, "ids", "port scan", Severity::High)
            .unwrap();
        auditor.stop().await.unwrap();
        assert_eq!(storage.len(), 1);
    }
}
