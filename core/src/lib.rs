//! VIGIL - Fault-tolerant event processing and audit core
//!
//! Three pieces that sit between an orchestration layer and the unreliable
//! things it calls:
//!
//! ```text
//! producers ──► EventQueue ──► CircuitBreaker ──► handler
//!      │
//!      └──────► Auditor ──► AuditStorage (file | memory)
//! ```
//!
//! Breakers come from an explicit [`CircuitBreakerRegistry`]; the queue and
//! the auditor are plain values owned by the caller.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod audit;
pub mod breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod telemetry;

pub use audit::{AuditConfig, AuditEvent, AuditQuery, Auditor, ExportFormat};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use config::Config;
pub use error::{BreakerError, HandlerError, Result, VigilError};
pub use queue::{EventHandler, EventQueue, QueuedEvent, handler_fn};
