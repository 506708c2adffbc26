//! Breaker notifications
//!
//! Every breaker owns a broadcast channel. Events are published after the
//! breaker lock is released and publishing never waits on subscribers: a
//! subscriber that falls more than `event_capacity` events behind receives
//! `RecvError::Lagged` and resumes from the oldest retained event.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected
    Open,
    /// A limited number of probes test recovery
    HalfOpen,
}

impl CircuitState {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something observable happened inside a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    /// The breaker moved between states
    StateChanged {
        breaker: Arc<str>,
        from: CircuitState,
        to: CircuitState,
    },
    /// A success was recorded
    Success { breaker: Arc<str> },
    /// A failure was recorded
    Failure { breaker: Arc<str>, error: String },
}

impl BreakerEvent {
    /// Name of the breaker that emitted the event
    pub fn breaker(&self) -> &str {
        match self {
            BreakerEvent::StateChanged { breaker, .. }
            | BreakerEvent::Success { breaker }
            | BreakerEvent::Failure { breaker, .. } => breaker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(CircuitState::Open.as_gauge(), 2.0);
    }

    #[test]
    fn test_event_breaker_name() {
        let event = BreakerEvent::Failure {
            breaker: Arc::from("db"),
            error: "timeout".into(),
        };
        assert_eq!(event.breaker(), "db");
    }
}
