//! Circuit breaker state machine
//!
//! ```text
//!            failures >= threshold            timeout elapsed
//!   Closed ────────────────────────► Open ─────────────────────► HalfOpen
//!     ▲                               ▲                             │
//!     │        successes >= threshold │        any failure          │
//!     └───────────────────────────────┼─────────────────────────────┤
//!                                     └─────────────────────────────┘
//! ```
//!
//! All counters live behind one mutex and change only through
//! `transition`. Notifications are collected while the lock is held and
//! published once it is released.

use super::config::CircuitBreakerConfig;
use super::events::{BreakerEvent, CircuitState};
use super::metrics::{BreakerMetrics, BreakerMetricsSnapshot};
use crate::error::{BreakerError, Result, VigilError};
use crate::metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Failure detector and admission gate for one protected resource
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    metrics: BreakerMetrics,
    events: broadcast::Sender<BreakerEvent>,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    half_open_in_flight: u32,
    /// Bumped on every transition; ties a probe slot to its half-open period
    generation: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
}

/// Health summary of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerHealth {
    pub name: String,
    pub state: CircuitState,
    /// False only while open
    pub healthy: bool,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    /// Remaining open time, only while open
    pub time_until_half_open_ms: Option<u64>,
    pub success_rate: f64,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let config = config.normalized();
        let (events, _) = broadcast::channel(config.event_capacity);

        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            half_open_max_requests = config.half_open_max_requests,
            "Circuit breaker created"
        );

        Self {
            name: Arc::from(config.name.as_str()),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                half_open_in_flight: 0,
                generation: 0,
                last_failure: None,
                last_failure_at: None,
                last_state_change: Utc::now(),
            }),
            metrics: BreakerMetrics::default(),
            events,
        }
    }

    /// Create a breaker with default thresholds
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(CircuitBreakerConfig::named(name))
    }

    /// Check whether a call may proceed
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and the
    /// calling request becomes the first probe.
    pub fn allow(&self) -> Result<()> {
        self.admit().map(|_| ())
    }

    /// Admission check shared by `allow` and `execute`
    ///
    /// Returns the half-open generation when the call took a probe slot.
    fn admit(&self) -> Result<Option<u64>> {
        self.metrics.record_request();

        let mut transition = None;
        let admitted = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => Some(None),
                CircuitState::Open => {
                    let expired = inner
                        .last_failure
                        .is_none_or(|at| at.elapsed() > self.config.timeout);
                    if expired {
                        transition = Some(self.transition(&mut inner, CircuitState::HalfOpen));
                        inner.half_open_in_flight = 1;
                        Some(Some(inner.generation))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_in_flight < self.config.half_open_max_requests {
                        inner.half_open_in_flight += 1;
                        Some(Some(inner.generation))
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(event) = transition {
            self.publish(event);
        }

        if let Some(probe) = admitted {
            Ok(probe)
        } else {
            self.metrics.record_rejected();
            metrics::try_record_rejected(&self.name);
            debug!(name = %self.name, "Circuit breaker rejected call");
            Err(VigilError::CircuitOpen {
                name: self.name.to_string(),
            })
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.metrics.record_success();

        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.successes += 1;
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    if inner.successes >= self.config.success_threshold {
                        Some(self.transition(&mut inner, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };

        if let Some(event) = transition {
            self.publish(event);
        }
        self.publish(BreakerEvent::Success {
            breaker: Arc::clone(&self.name),
        });
    }

    /// Record a failed call
    pub fn record_failure(&self, error: &dyn fmt::Display) {
        self.metrics.record_failure();

        let (transition, state, failures) = {
            let mut inner = self.inner.lock();
            inner.failures += 1;
            inner.last_failure = Some(Instant::now());
            inner.last_failure_at = Some(Utc::now());

            let transition = match inner.state {
                CircuitState::HalfOpen => Some(self.transition(&mut inner, CircuitState::Open)),
                CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                    Some(self.transition(&mut inner, CircuitState::Open))
                }
                _ => None,
            };
            (transition, inner.state, inner.failures)
        };

        warn!(
            name = %self.name,
            state = %state,
            failures = failures,
            error = %error,
            "Circuit breaker failure recorded"
        );

        if let Some(event) = transition {
            self.publish(event);
        }
        self.publish(BreakerEvent::Failure {
            breaker: Arc::clone(&self.name),
            error: error.to_string(),
        });
    }

    /// Run `op` behind the breaker
    ///
    /// Returns [`BreakerError::Open`] without invoking `op` when the call is
    /// rejected; otherwise the operation's own error comes back unchanged in
    /// [`BreakerError::Inner`]. A half-open probe whose future is dropped
    /// before finishing gives its slot back.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let Ok(probe) = self.admit() else {
            return Err(BreakerError::Open {
                name: self.name.to_string(),
            });
        };

        let mut guard = ProbeGuard {
            breaker: self,
            generation: probe,
        };
        let started = Instant::now();
        let result = op().await;
        guard.disarm();
        self.metrics.record_latency(started.elapsed());

        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Return a probe slot taken in half-open period `generation`
    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            debug!(name = %self.name, "Released probe slot of a cancelled call");
        }
    }

    /// Force the breaker closed and clear its counters
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let transition = if inner.state != CircuitState::Closed {
                info!(name = %self.name, from_state = %inner.state, "Circuit breaker manually reset");
                Some(self.transition(&mut inner, CircuitState::Closed))
            } else {
                None
            };
            inner.failures = 0;
            inner.successes = 0;
            inner.half_open_in_flight = 0;
            transition
        };

        if let Some(event) = transition {
            self.publish(event);
        }
    }

    /// Subscribe to state changes, successes and failures
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Failures counted towards the threshold
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Successes counted towards closing from half-open
    pub fn success_count(&self) -> u32 {
        self.inner.lock().successes
    }

    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_failure_at
    }

    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.inner.lock().last_state_change
    }

    /// Time left before an open circuit admits a probe; zero otherwise
    pub fn time_until_half_open(&self) -> Duration {
        let inner = self.inner.lock();
        Self::remaining_open(&inner, self.config.timeout)
    }

    /// Snapshot of the breaker's counters
    pub fn metrics(&self) -> BreakerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Health summary for operators
    pub fn health(&self) -> BreakerHealth {
        let inner = self.inner.lock();
        let time_until_half_open_ms = (inner.state == CircuitState::Open).then(|| {
            Self::remaining_open(&inner, self.config.timeout).as_millis() as u64
        });

        BreakerHealth {
            name: self.name.to_string(),
            state: inner.state,
            healthy: inner.state != CircuitState::Open,
            failure_count: inner.failures,
            success_count: inner.successes,
            failure_threshold: self.config.failure_threshold,
            time_until_half_open_ms,
            success_rate: self.metrics.snapshot().success_rate(),
        }
    }

    fn remaining_open(inner: &Inner, timeout: Duration) -> Duration {
        if inner.state != CircuitState::Open {
            return Duration::ZERO;
        }
        match inner.last_failure {
            Some(at) => timeout.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// The only place state changes
    fn transition(&self, inner: &mut Inner, to: CircuitState) -> BreakerEvent {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.last_state_change = Utc::now();

        match to {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.successes = 0;
                inner.half_open_in_flight = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.successes = 0;
                inner.half_open_in_flight = 0;
            }
        }

        self.metrics.record_transition(from, to);
        metrics::try_record_transition(&self.name, from.as_str(), to.as_str(), to.as_gauge());
        info!(
            name = %self.name,
            old_state = %from,
            new_state = %to,
            "Circuit breaker state changed"
        );

        BreakerEvent::StateChanged {
            breaker: Arc::clone(&self.name),
            from,
            to,
        }
    }

    fn publish(&self, event: BreakerEvent) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }
}

/// Releases an unfinished probe when `execute` is cancelled
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: Option<u64>,
}

impl ProbeGuard<'_> {
    fn disarm(&mut self) {
        self.generation = None;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation.take() {
            self.breaker.release_probe(generation);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failures", &inner.failures)
            .field("successes", &inner.successes)
            .field("failure_threshold", &self.config.failure_threshold)
            .finish()
    }
}
