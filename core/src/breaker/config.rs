//! Circuit breaker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default consecutive failures before the circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default half-open successes before the circuit closes
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;
/// Default time the circuit stays open
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of in-flight probes while half-open
pub const DEFAULT_HALF_OPEN_MAX_REQUESTS: u32 = 3;
/// Default capacity of the breaker event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for a [`CircuitBreaker`](super::CircuitBreaker)
///
/// Zero values are replaced by the defaults when the breaker is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Breaker identifier, used in logs, metrics and errors
    pub name: String,
    /// Failures in the closed state before opening
    pub failure_threshold: u32,
    /// Successes in the half-open state before closing
    pub success_threshold: u32,
    /// How long the circuit stays open after the last failure
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Maximum probes in flight while half-open
    pub half_open_max_requests: u32,
    /// Buffered breaker events per subscriber before the oldest are lost
    pub event_capacity: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
            half_open_max_requests: DEFAULT_HALF_OPEN_MAX_REQUESTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CircuitBreakerConfig {
    /// Default configuration under the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace zero values with defaults
    pub fn normalized(mut self) -> Self {
        if self.failure_threshold == 0 {
            self.failure_threshold = DEFAULT_FAILURE_THRESHOLD;
        }
        if self.success_threshold == 0 {
            self.success_threshold = DEFAULT_SUCCESS_THRESHOLD;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.half_open_max_requests == 0 {
            self.half_open_max_requests = DEFAULT_HALF_OPEN_MAX_REQUESTS;
        }
        if self.event_capacity == 0 {
            self.event_capacity = DEFAULT_EVENT_CAPACITY;
        }
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
