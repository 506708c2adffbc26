//! Circuit breakers
//!
//! A breaker watches the outcomes of calls to one unreliable resource. After
//! `failure_threshold` failures it opens and rejects calls outright; once
//! `timeout` has passed it lets a few probes through and closes again after
//! `success_threshold` of them succeed.
//!
//! ```ignore
//! let registry = CircuitBreakerRegistry::new();
//! let breaker = registry.get_or_create("payments", None);
//!
//! match breaker.execute(|| client.charge(order)).await {
//!     Ok(receipt) => ...,
//!     Err(BreakerError::Open { .. }) => fallback(),
//!     Err(BreakerError::Inner(e)) => return Err(e),
//! }
//! ```

mod circuit;
mod config;
mod events;
mod metrics;
mod registry;

pub use circuit::{BreakerHealth, CircuitBreaker};
pub use config::{
    CircuitBreakerConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_HALF_OPEN_MAX_REQUESTS, DEFAULT_SUCCESS_THRESHOLD, DEFAULT_TIMEOUT,
};
pub use events::{BreakerEvent, CircuitState};
pub use metrics::BreakerMetricsSnapshot;
pub use registry::CircuitBreakerRegistry;
