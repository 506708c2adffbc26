//! Retrying event queue
//!
//! Events are grouped by a type key into bounded FIFOs. A pool of workers
//! drains them, with at most one worker on a given type at a time so events
//! of one type are handled in order while different types run in parallel.
//!
//! Every attempt goes through the queue's circuit breaker. A failed attempt
//! sends the event to the tail of its FIFO behind a backoff gate; after
//! `max_retries` retries it is removed and captured as a dead letter. While
//! the breaker is open, attempts fail fast without reaching the handler.
//!
//! # Example
//!
//! ```ignore
//! let queue = EventQueue::builder().workers(4).build();
//! queue.start(handler_fn(|event| async move { deliver(event).await }))?;
//!
//! queue.enqueue("deploy.finished", payload, 0)?;
//! ...
//! queue.stop().await;
//! ```

mod backoff;
mod builder;
mod config;
mod dead_letter;
mod event;
mod handler;

pub use backoff::{BackoffConfig, Jitter};
pub use builder::EventQueueBuilder;
pub use config::{
    DEFAULT_MAX_RETRIES, DEFAULT_PER_TYPE_CAPACITY, DEFAULT_POLL_INTERVAL, DEFAULT_WORKERS,
    QUEUE_BREAKER_NAME, QueueConfig,
};
pub use dead_letter::{DEFAULT_DEAD_LETTER_CAPACITY, DeadLetter, DeadLetterBuffer};
pub use event::QueuedEvent;
pub use handler::{EventHandler, FnHandler, handler_fn};

use crate::breaker::CircuitBreaker;
use crate::error::{BreakerError, Result, VigilError};
use crate::metrics;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-type FIFO queue drained by a breaker-gated worker pool
pub struct EventQueue {
    shared: Arc<Shared>,
    running: Mutex<Option<Workers>>,
}

struct Workers {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct Shared {
    config: QueueConfig,
    state: Mutex<QueueState>,
    breaker: Arc<CircuitBreaker>,
    dead_letters: Arc<DeadLetterBuffer>,
    counters: QueueCounters,
    jitter: Jitter,
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<QueuedEvent>>,
    processing: HashSet<String>,
    total: usize,
}

#[derive(Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    exhausted: AtomicU64,
}

/// Point-in-time copy of the queue's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueMetrics {
    /// Events accepted by `enqueue`
    pub enqueued: u64,
    /// Events taken off a FIFO, by `dequeue` or for processing
    pub dequeued: u64,
    /// Events a handler completed
    pub processed: u64,
    /// Failed attempts, including breaker rejections
    pub failed: u64,
    /// Attempts rescheduled after a failure
    pub retried: u64,
    /// Events refused because their type was full
    pub dropped: u64,
    /// Events dead-lettered after the final retry
    pub exhausted: u64,
}

/// Result of a single processing attempt that did not end the event's life
/// with an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The handler succeeded
    Delivered { id: String },
    /// The attempt failed and the event went back to the tail of its FIFO
    Retrying {
        id: String,
        retries: u32,
        delay: Duration,
        /// True when the breaker refused the attempt
        rejected: bool,
    },
    /// Another worker is processing this type
    Busy,
}

impl EventQueue {
    /// Queue with default settings and a private breaker
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a queue
    pub fn builder() -> EventQueueBuilder {
        EventQueueBuilder::new()
    }

    pub(crate) fn from_parts(
        config: QueueConfig,
        breaker: Arc<CircuitBreaker>,
        dead_letters: Arc<DeadLetterBuffer>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState::default()),
                breaker,
                dead_letters,
                counters: QueueCounters::default(),
                jitter: Jitter::new(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Append an event to its type's FIFO
    ///
    /// Never waits. Fails with [`VigilError::QueueFull`] when the type already
    /// holds `per_type_capacity` events. Returns the new event's id.
    pub fn enqueue(
        &self,
        event_type: impl Into<String>,
        payload: impl Into<Bytes>,
        priority: i32,
    ) -> Result<String> {
        let event = QueuedEvent::new(event_type, payload.into(), priority);
        let capacity = self.shared.config.per_type_capacity;

        let total = {
            let mut state = self.shared.state.lock();
            let queue = state.queues.entry(event.event_type.clone()).or_default();
            if queue.len() >= capacity {
                drop(state);
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::try_record_queue(&event.event_type, "dropped");
                warn!(
                    event_type = %event.event_type,
                    capacity = capacity,
                    "Event queue full, event dropped"
                );
                return Err(VigilError::QueueFull {
                    queue: event.event_type,
                    capacity,
                });
            }
            queue.push_back(event.clone());
            state.total += 1;
            state.total
        };

        self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::try_record_queue(&event.event_type, "enqueued");
        metrics::try_set_queue_depth(total);
        debug!(id = %event.id, event_type = %event.event_type, "Event enqueued");

        Ok(event.id)
    }

    /// Pop the oldest event of a type
    pub fn dequeue(&self, event_type: &str) -> Result<QueuedEvent> {
        self.shared
            .pop_front(event_type)
            .ok_or_else(|| VigilError::EventNotFound(event_type.to_string()))
    }

    /// Launch the worker pool
    ///
    /// Must be called inside a tokio runtime. Fails if workers are already
    /// running; call [`stop`](Self::stop) first to restart with another
    /// handler.
    pub fn start<H: EventHandler + 'static>(&self, handler: H) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(VigilError::Config("event queue already started".to_string()));
        }

        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        let token = CancellationToken::new();
        let handles = (0..self.shared.config.workers)
            .map(|worker| {
                let shared = Arc::clone(&self.shared);
                let handler = Arc::clone(&handler);
                let token = token.clone();
                tokio::spawn(async move { run_worker(shared, handler, token, worker).await })
            })
            .collect();

        info!(
            workers = self.shared.config.workers,
            handler = handler.name(),
            poll_interval_ms = self.shared.config.poll_interval.as_millis() as u64,
            "Event queue started"
        );

        *running = Some(Workers { token, handles });
        Ok(())
    }

    /// Process the head event of one type now
    ///
    /// Ignores the backoff gate of the head event but honours the one-worker
    /// per type rule: returns [`ProcessOutcome::Busy`] if a worker holds the
    /// type. Fails with [`VigilError::EventNotFound`] when the type is empty
    /// and [`VigilError::RetriesExhausted`] when this was the final attempt.
    pub async fn process_next(
        &self,
        event_type: &str,
        handler: &dyn EventHandler,
    ) -> Result<ProcessOutcome> {
        match self.shared.claim(event_type, None) {
            Claim::Event(event, guard) => {
                let outcome = self.shared.attempt(event, handler).await;
                drop(guard);
                outcome
            }
            Claim::Busy => Ok(ProcessOutcome::Busy),
            Claim::Empty | Claim::NotReady => {
                Err(VigilError::EventNotFound(event_type.to_string()))
            }
        }
    }

    /// Cancel the workers and wait for them to finish their current event
    ///
    /// Queued events stay queued.
    pub async fn stop(&self) {
        let workers = self.running.lock().take();
        let Some(workers) = workers else {
            return;
        };

        workers.token.cancel();
        for handle in workers.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Event queue worker terminated abnormally");
            }
        }
        info!(pending = self.total_depth(), "Event queue stopped");
    }

    /// Whether workers are running
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Events waiting for one type
    pub fn depth(&self, event_type: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(event_type)
            .map_or(0, VecDeque::len)
    }

    /// Events waiting across all types
    pub fn total_depth(&self) -> usize {
        self.shared.state.lock().total
    }

    /// Known type keys, sorted
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.shared.state.lock().queues.keys().cloned().collect();
        types.sort();
        types
    }

    /// Snapshot of the queue's counters
    pub fn metrics(&self) -> QueueMetrics {
        let c = &self.shared.counters;
        QueueMetrics {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            dequeued: c.dequeued.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
        }
    }

    /// False while the breaker is open
    pub fn is_healthy(&self) -> bool {
        !self.shared.breaker.is_open()
    }

    /// The breaker gating every attempt
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.shared.breaker
    }

    /// Events that exhausted their retries
    pub fn dead_letters(&self) -> &Arc<DeadLetterBuffer> {
        &self.shared.dead_letters
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        if let Some(workers) = self.running.get_mut().take() {
            workers.token.cancel();
        }
    }
}

enum Claim<'a> {
    Event(QueuedEvent, ProcessingGuard<'a>),
    Busy,
    Empty,
    NotReady,
}

/// Marks a type as being processed until dropped
struct ProcessingGuard<'a> {
    shared: &'a Shared,
    event_type: String,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().processing.remove(&self.event_type);
    }
}

impl Shared {
    fn pop_front(&self, event_type: &str) -> Option<QueuedEvent> {
        let (event, total) = {
            let mut state = self.state.lock();
            let event = state.queues.get_mut(event_type)?.pop_front()?;
            state.total -= 1;
            (event, state.total)
        };
        self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        metrics::try_set_queue_depth(total);
        Some(event)
    }

    /// Take the head event of a type and mark the type as processing
    ///
    /// With `ready_at`, a head still behind its backoff gate is left alone.
    fn claim(&self, event_type: &str, ready_at: Option<Instant>) -> Claim<'_> {
        let (event, total) = {
            let mut state = self.state.lock();
            if state.processing.contains(event_type) {
                return Claim::Busy;
            }
            let Some(queue) = state.queues.get_mut(event_type) else {
                return Claim::Empty;
            };
            match queue.front() {
                None => return Claim::Empty,
                Some(head) if ready_at.is_some_and(|now| !head.is_ready_at(now)) => {
                    return Claim::NotReady;
                }
                Some(_) => {}
            }
            let Some(event) = queue.pop_front() else {
                return Claim::Empty;
            };
            state.total -= 1;
            state.processing.insert(event_type.to_string());
            (event, state.total)
        };

        self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        metrics::try_set_queue_depth(total);
        Claim::Event(
            event,
            ProcessingGuard {
                shared: self,
                event_type: event_type.to_string(),
            },
        )
    }

    /// Types with a ready head and no active processor
    fn ready_types(&self, now: Instant) -> Vec<String> {
        let state = self.state.lock();
        state
            .queues
            .iter()
            .filter(|(event_type, queue)| {
                !state.processing.contains(*event_type)
                    && queue.front().is_some_and(|head| head.is_ready_at(now))
            })
            .map(|(event_type, _)| event_type.clone())
            .collect()
    }

    /// Run one attempt through the breaker and settle the outcome
    async fn attempt(
        &self,
        mut event: QueuedEvent,
        handler: &dyn EventHandler,
    ) -> Result<ProcessOutcome> {
        let result = self
            .breaker
            .execute(|| handler.handle(&event))
            .await;

        let (message, rejected) = match result {
            Ok(()) => {
                event.processed_at = Some(Utc::now());
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                metrics::try_record_queue(&event.event_type, "processed");
                debug!(
                    id = %event.id,
                    event_type = %event.event_type,
                    retries = event.retries,
                    "Event processed"
                );
                return Ok(ProcessOutcome::Delivered { id: event.id });
            }
            Err(BreakerError::Open { name }) => {
                (format!("circuit breaker '{name}' is open"), true)
            }
            Err(BreakerError::Inner(e)) => (e.to_string(), false),
        };

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        metrics::try_record_queue(
            &event.event_type,
            if rejected { "rejected" } else { "failed" },
        );

        if event.retries < self.config.max_retries {
            event.retries += 1;
            let delay = self.config.backoff.delay(event.retries, &self.jitter);
            event.not_before = Some(Instant::now() + delay);
            let id = event.id.clone();
            let retries = event.retries;

            debug!(
                id = %id,
                event_type = %event.event_type,
                retries = retries,
                delay_ms = delay.as_millis() as u64,
                rejected = rejected,
                error = %message,
                "Event attempt failed, scheduled for retry"
            );
            self.requeue(event);
            self.counters.retried.fetch_add(1, Ordering::Relaxed);

            return Ok(ProcessOutcome::Retrying {
                id,
                retries,
                delay,
                rejected,
            });
        }

        let attempts = event.retries + 1;
        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        metrics::try_record_queue(&event.event_type, "exhausted");
        error!(
            id = %event.id,
            event_type = %event.event_type,
            attempts = attempts,
            error = %message,
            "Event failed on every attempt, moved to dead letters"
        );

        let id = event.id.clone();
        self.dead_letters.push(DeadLetter {
            event,
            error: message.clone(),
            failed_at: Utc::now(),
            attempts,
        });

        Err(VigilError::RetriesExhausted {
            id,
            attempts,
            message,
        })
    }

    /// Put a failed event back at the tail; retries bypass the capacity bound
    fn requeue(&self, event: QueuedEvent) {
        let total = {
            let mut state = self.state.lock();
            state
                .queues
                .entry(event.event_type.clone())
                .or_default()
                .push_back(event);
            state.total += 1;
            state.total
        };
        metrics::try_set_queue_depth(total);
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    handler: Arc<dyn EventHandler>,
    token: CancellationToken,
    worker: usize,
) {
    let mut ticker = tokio::time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(worker = worker, "Event queue worker started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for event_type in shared.ready_types(Instant::now()) {
            if token.is_cancelled() {
                break;
            }
            let Claim::Event(event, guard) = shared.claim(&event_type, Some(Instant::now())) else {
                continue;
            };
            // Terminal failures are already logged and dead-lettered
            let _ = shared.attempt(event, handler.as_ref()).await;
            drop(guard);
        }
    }

    debug!(worker = worker, "Event queue worker stopped");
}
