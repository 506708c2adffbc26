//! Error types for VIGIL

use thiserror::Error;

/// Result type alias for VIGIL operations
pub type Result<T> = std::result::Result<T, VigilError>;

/// Main error type for VIGIL
#[derive(Error, Debug)]
pub enum VigilError {
    /// Circuit breaker rejected the call before the operation ran
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Bounded buffer full - the item was dropped
    #[error("{queue} queue full (capacity {capacity}), event dropped")]
    QueueFull { queue: String, capacity: usize },

    /// Nothing queued under the requested key
    #[error("no events queued for '{0}'")]
    EventNotFound(String),

    /// Storage backend cannot serve the request
    #[error("audit storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Malformed audit event
    #[error("invalid audit event: {0}")]
    Validation(String),

    /// Export format recognised but not implemented
    #[error("unsupported export format: {0}")]
    ExportFormatUnsupported(String),

    /// Queued event failed on every attempt
    #[error("event {id} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        id: String,
        attempts: u32,
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Component already stopped
    #[error("shutdown requested")]
    Shutdown,
}

impl VigilError {
    /// True for errors a caller is expected to recover from by backing off
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VigilError::CircuitOpen { .. } | VigilError::QueueFull { .. }
        )
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for VigilError {
    fn from(err: csv::Error) -> Self {
        VigilError::Serialization(format!("csv: {err}"))
    }
}

/// Error returned by [`CircuitBreaker::execute`](crate::breaker::CircuitBreaker::execute)
///
/// Keeps the operation's own error untouched so callers can tell a rejection
/// apart from a real failure.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// Rejected before the operation was invoked
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The operation ran and failed
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the breaker rejected the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's error, if the operation ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// Error type for event handlers driven by the queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Downstream refused the event; retrying may help
    #[error("handler failed: {0}")]
    Failed(String),

    /// Downstream is unreachable
    #[error("connection error: {0}")]
    Connection(String),

    /// Handler cannot make sense of the payload
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Handler not ready to accept events
    #[error("handler not ready")]
    NotReady,
}
