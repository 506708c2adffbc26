//! Per-breaker counters

use super::CircuitState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters owned by one breaker
#[derive(Default)]
pub(crate) struct BreakerMetrics {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    state_changes: AtomicU64,
    closed_to_open: AtomicU64,
    open_to_half_open: AtomicU64,
    half_open_to_closed: AtomicU64,
    half_open_to_open: AtomicU64,
    latency_nanos: AtomicU64,
    latency_samples: AtomicU64,
}

impl BreakerMetrics {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition(&self, from: CircuitState, to: CircuitState) {
        self.state_changes.fetch_add(1, Ordering::Relaxed);
        let counter = match (from, to) {
            (CircuitState::Closed, CircuitState::Open) => &self.closed_to_open,
            (CircuitState::Open, CircuitState::HalfOpen) => &self.open_to_half_open,
            (CircuitState::HalfOpen, CircuitState::Closed) => &self.half_open_to_closed,
            (CircuitState::HalfOpen, CircuitState::Open) => &self.half_open_to_open,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BreakerMetricsSnapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let average_latency = if samples == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.latency_nanos.load(Ordering::Relaxed) / samples)
        };

        BreakerMetricsSnapshot {
            total_requests: self.requests.load(Ordering::Relaxed),
            total_successes: self.successes.load(Ordering::Relaxed),
            total_failures: self.failures.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            total_state_changes: self.state_changes.load(Ordering::Relaxed),
            closed_to_open: self.closed_to_open.load(Ordering::Relaxed),
            open_to_half_open: self.open_to_half_open.load(Ordering::Relaxed),
            half_open_to_closed: self.half_open_to_closed.load(Ordering::Relaxed),
            half_open_to_open: self.half_open_to_open.load(Ordering::Relaxed),
            average_latency_us: u64::try_from(average_latency.as_micros()).unwrap_or(u64::MAX),
        }
    }
}

/// Point-in-time copy of a breaker's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BreakerMetricsSnapshot {
    /// Admission checks, accepted or not
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls refused while open or at the half-open probe limit
    pub total_rejected: u64,
    pub total_state_changes: u64,
    pub closed_to_open: u64,
    pub open_to_half_open: u64,
    pub half_open_to_closed: u64,
    pub half_open_to_open: u64,
    /// Mean latency of operations run through `execute`
    pub average_latency_us: u64,
}

impl BreakerMetricsSnapshot {
    /// Successes as a percentage of admission checks
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_successes as f64 / self.total_requests as f64 * 100.0
    }

    /// Failures as a percentage of admission checks
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_failures as f64 / self.total_requests as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_counters() {
        let metrics = BreakerMetrics::default();
        metrics.record_transition(CircuitState::Closed, CircuitState::Open);
        metrics.record_transition(CircuitState::Open, CircuitState::HalfOpen);
        metrics.record_transition(CircuitState::HalfOpen, CircuitState::Open);
        metrics.record_transition(CircuitState::Open, CircuitState::Closed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_state_changes, 4);
        assert_eq!(snapshot.closed_to_open, 1);
        assert_eq!(snapshot.open_to_half_open, 1);
        assert_eq!(snapshot.half_open_to_open, 1);
        assert_eq!(snapshot.half_open_to_closed, 0);
    }

    #[test]
    fn test_rates() {
        let metrics = BreakerMetrics::default();
        for _ in 0..4 {
            metrics.record_request();
        }
        metrics.record_success();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert!((snapshot.success_rate() - 75.0).abs() < f64::EPSILON);
        assert!((snapshot.failure_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_average_latency() {
        let metrics = BreakerMetrics::default();
        metrics.record_latency(Duration::from_micros(100));
        metrics.record_latency(Duration::from_micros(300));
        assert_eq!(metrics.snapshot().average_latency_us, 200);
    }
}
