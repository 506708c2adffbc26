//! Integration tests for the event queue and its breaker
//!
//! These drive the public API only: breakers from a registry, handlers as
//! trait objects, workers started and stopped on a real runtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use vigil_core::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
use vigil_core::error::{HandlerError, VigilError};
use vigil_core::queue::{BackoffConfig, EventHandler, EventQueue, ProcessOutcome, QueuedEvent};

// ============================================================================
// Test Handlers
// ============================================================================

/// Handler that always fails
#[derive(Default)]
struct AlwaysFails {
    calls: AtomicU64,
}

#[async_trait]
impl EventHandler for AlwaysFails {
    fn name(&self) -> &'static str {
        "always_fails"
    }

    async fn handle(&self, _event: &QueuedEvent) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::Connection("downstream unreachable".into()))
    }
}

/// Handler that records payloads per type in arrival order
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    fn seen_for(&self, event_type: &str) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter(|(t, _)| t == event_type)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: &QueuedEvent) -> Result<(), HandlerError> {
        let payload = String::from_utf8_lossy(&event.payload).into_owned();
        self.seen.lock().push((event.event_type.clone(), payload));
        Ok(())
    }
}

fn lenient_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 1000,
        ..CircuitBreakerConfig::named("lenient")
    }
}

// ============================================================================
// Retry and dead-letter behavior
// ============================================================================

#[tokio::test]
async fn test_failing_event_is_retried_three_times_then_dropped() {
    let queue = EventQueue::builder()
        .with_backoff(BackoffConfig::immediate())
        .with_breaker_config(lenient_breaker())
        .build();
    let handler = AlwaysFails::default();

    queue.enqueue("deploy", "payload", 0).unwrap();

    let mut last_failed = 0;
    for attempt in 1..=3 {
        match queue.process_next("deploy", &handler).await.unwrap() {
            ProcessOutcome::Retrying { retries, rejected, .. } => {
                assert_eq!(retries, attempt);
                assert!(!rejected);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let failed = queue.metrics().failed;
        assert!(failed > last_failed);
        last_failed = failed;
    }

    let err = queue.process_next("deploy", &handler).await.unwrap_err();
    assert!(matches!(err, VigilError::RetriesExhausted { attempts: 4, .. }));

    assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    assert_eq!(queue.depth("deploy"), 0);
    assert_eq!(queue.metrics().retried, 3);
    assert_eq!(queue.metrics().exhausted, 1);

    let letters = queue.dead_letters().peek(10);
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 4);
    assert!(matches!(
        queue.process_next("deploy", &handler).await,
        Err(VigilError::EventNotFound(_))
    ));
}

#[tokio::test]
async fn test_open_breaker_stops_invoking_handler() {
    let registry = Arc::new(CircuitBreakerRegistry::new());
    let queue = EventQueue::builder()
        .with_backoff(BackoffConfig::immediate())
        .with_registry(Arc::clone(&registry))
        .build();
    let handler = AlwaysFails::default();

    for i in 0..3 {
        queue.enqueue("notify", format!("n-{i}"), 0).unwrap();
    }

    // Default threshold is 5 failures
    for _ in 0..5 {
        queue.process_next("notify", &handler).await.unwrap();
    }
    let breaker = registry.get("event-queue").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!queue.is_healthy());

    for _ in 0..3 {
        match queue.process_next("notify", &handler).await {
            Ok(ProcessOutcome::Retrying { rejected, .. }) => assert!(rejected),
            Err(VigilError::RetriesExhausted { .. }) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    assert!(breaker.metrics().total_rejected >= 3);
}

#[tokio::test]
async fn test_full_type_rejects_and_counts_drop() {
    let queue = EventQueue::builder().per_type_capacity(2).build();
    queue.enqueue("a", "1", 0).unwrap();
    queue.enqueue("a", "2", 0).unwrap();

    assert!(matches!(
        queue.enqueue("a", "3", 0),
        Err(VigilError::QueueFull { capacity: 2, .. })
    ));
    // Other types are unaffected
    queue.enqueue("b", "1", 0).unwrap();

    let metrics = queue.metrics();
    assert_eq!(metrics.dropped, 1);
    assert_eq!(metrics.enqueued, 3);
    assert_eq!(metrics, queue.metrics());
}

// ============================================================================
// Worker pool
// ============================================================================

#[tokio::test]
async fn test_workers_deliver_each_type_in_order() {
    let queue = EventQueue::builder()
        .workers(4)
        .poll_interval(Duration::from_millis(5))
        .build();
    let recorder = Arc::new(Recorder::default());

    for i in 0..20 {
        queue.enqueue("alpha", format!("{i}"), 0).unwrap();
        queue.enqueue("beta", format!("{i}"), 0).unwrap();
    }
    queue.start(Arc::clone(&recorder)).unwrap();
    assert!(queue.start(Arc::clone(&recorder)).is_err());

    tokio::time::timeout(Duration::from_secs(5), async {
        while recorder.count() < 40 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    queue.stop().await;

    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(recorder.seen_for("alpha"), expected);
    assert_eq!(recorder.seen_for("beta"), expected);
    assert_eq!(queue.total_depth(), 0);
    assert_eq!(queue.metrics().processed, 40);
    assert!(!queue.is_running());
}

#[tokio::test]
async fn test_stopped_workers_leave_events_queued() {
    let queue = EventQueue::builder()
        .workers(2)
        .poll_interval(Duration::from_millis(5))
        .build();
    queue.start(Recorder::default()).unwrap();
    queue.stop().await;

    queue.enqueue("late", "x", 0).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(queue.depth("late"), 1);
}

// ============================================================================
// Breaker recovery
// ============================================================================

#[tokio::test]
async fn test_breaker_recovers_after_timeout() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry.get_or_create(
        "payments",
        Some(CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_millis(100),
            ..Default::default()
        }),
    );
    assert_eq!(breaker.name(), "payments");

    for _ in 0..3 {
        breaker.record_failure(&"timeout");
    }
    assert!(breaker.is_open());
    assert!(breaker.allow().is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(breaker.allow().is_ok());
    assert!(breaker.is_half_open());

    for _ in 0..breaker.config().success_threshold {
        breaker.record_success();
    }
    assert!(breaker.is_closed());
    assert_eq!(breaker.failure_count(), 0);
    assert_eq!(breaker.success_count(), 0);
}
