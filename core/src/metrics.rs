//! Prometheus metrics for VIGIL

use crate::error::{Result, VigilError};
use parking_lot::Mutex;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, TextEncoder, register_counter_vec, register_gauge,
    register_gauge_vec,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Serializes registration so concurrent first calls don't double-register
static INIT: Mutex<()> = parking_lot::const_mutex(());

/// All VIGIL metrics
pub struct Metrics {
    /// Breaker state (by breaker): 0 closed, 1 half-open, 2 open
    pub breaker_state: GaugeVec,

    /// Breaker transitions (by breaker, from, to)
    pub breaker_transitions: CounterVec,

    /// Calls rejected by an open breaker (by breaker)
    pub breaker_rejected: CounterVec,

    /// Queue outcomes (by event type, outcome)
    pub queue_events: CounterVec,

    /// Events waiting across all queue types
    pub queue_depth: Gauge,

    /// Audit outcomes (by outcome)
    pub audit_events: CounterVec,

    /// Events waiting in the audit buffer
    pub audit_queue_len: Gauge,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let _guard = INIT.lock();
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            breaker_state: register_gauge_vec!(
                "vigil_breaker_state",
                "Circuit breaker state (0 = closed, 1 = half-open, 2 = open)",
                &["breaker"]
            )
            .map_err(|e| VigilError::Metrics(format!("breaker_state: {e}")))?,

            breaker_transitions: register_counter_vec!(
                "vigil_breaker_transitions_total",
                "Circuit breaker state transitions",
                &["breaker", "from", "to"]
            )
            .map_err(|e| VigilError::Metrics(format!("breaker_transitions: {e}")))?,

            breaker_rejected: register_counter_vec!(
                "vigil_breaker_rejected_total",
                "Calls rejected by a circuit breaker",
                &["breaker"]
            )
            .map_err(|e| VigilError::Metrics(format!("breaker_rejected: {e}")))?,

            queue_events: register_counter_vec!(
                "vigil_queue_events_total",
                "Event queue outcomes",
                &["event_type", "outcome"]
            )
            .map_err(|e| VigilError::Metrics(format!("queue_events: {e}")))?,

            queue_depth: register_gauge!("vigil_queue_depth", "Events waiting in the queue")
                .map_err(|e| VigilError::Metrics(format!("queue_depth: {e}")))?,

            audit_events: register_counter_vec!(
                "vigil_audit_events_total",
                "Audit log outcomes",
                &["outcome"]
            )
            .map_err(|e| VigilError::Metrics(format!("audit_events: {e}")))?,

            audit_queue_len: register_gauge!(
                "vigil_audit_queue_len",
                "Audit events waiting to be stored"
            )
            .map_err(|e| VigilError::Metrics(format!("audit_queue_len: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| VigilError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Record a breaker state change
    pub fn record_transition(&self, breaker: &str, from: &str, to: &str, gauge: f64) {
        self.breaker_transitions
            .with_label_values(&[breaker, from, to])
            .inc();
        self.breaker_state.with_label_values(&[breaker]).set(gauge);
    }

    /// Record a rejected call
    pub fn record_rejected(&self, breaker: &str) {
        self.breaker_rejected.with_label_values(&[breaker]).inc();
    }

    /// Record a queue outcome
    pub fn record_queue(&self, event_type: &str, outcome: &str) {
        self.queue_events
            .with_label_values(&[event_type, outcome])
            .inc();
    }

    /// Update queue depth
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    /// Record an audit outcome
    pub fn record_audit(&self, outcome: &str) {
        self.audit_events.with_label_values(&[outcome]).inc();
    }

    /// Update audit buffer length
    pub fn set_audit_queue_len(&self, len: usize) {
        self.audit_queue_len.set(len as f64);
    }
}

/// Gather all metrics and encode as Prometheus text format
///
/// Returns the metrics as a String, ready to be served via HTTP.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Helper to record metrics if initialized, otherwise skip
pub fn try_record_transition(breaker: &str, from: &str, to: &str, gauge: f64) {
    if let Some(m) = Metrics::get() {
        m.record_transition(breaker, from, to, gauge);
    }
}

/// Helper to record metrics if initialized, otherwise skip
pub fn try_record_rejected(breaker: &str) {
    if let Some(m) = Metrics::get() {
        m.record_rejected(breaker);
    }
}

/// Helper to record metrics if initialized, otherwise skip
pub fn try_record_queue(event_type: &str, outcome: &str) {
    if let Some(m) = Metrics::get() {
        m.record_queue(event_type, outcome);
    }
}

/// Helper to record metrics if initialized, otherwise skip
pub fn try_set_queue_depth(depth: usize) {
    if let Some(m) = Metrics::get() {
        m.set_queue_depth(depth);
    }
}

/// Helper to record metrics if initialized, otherwise skip
pub fn try_record_audit(outcome: &str) {
    if let Some(m) = Metrics::get() {
        m.record_audit(outcome);
    }
}

/// Helper to record metrics if initialized, otherwise skip
pub fn try_set_audit_queue_len(len: usize) {
    if let Some(m) = Metrics::get() {
        m.set_audit_queue_len(len);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        let metrics = Metrics::init().unwrap();
        metrics.record_transition("test-breaker", "closed", "open", 2.0);
        metrics.record_queue("deploy", "processed");
        metrics.set_queue_depth(3);

        // Second init hands back the same instance
        assert!(std::ptr::eq(metrics, Metrics::init().unwrap()));
    }

    #[test]
    fn test_gather_contains_registered_families() {
        Metrics::init().unwrap();
        try_record_audit("logged");
        let text = gather();
        assert!(text.contains("vigil_audit_events_total"));
    }
}
