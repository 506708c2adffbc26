//! EventQueue builder
//!
//! Fluent setup for the queue's collaborators: the breaker that gates every
//! attempt, the retry backoff, and the dead-letter buffer.

use super::backoff::BackoffConfig;
use super::config::{QUEUE_BREAKER_NAME, QueueConfig};
use super::dead_letter::DeadLetterBuffer;
use super::EventQueue;
use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry};
use std::sync::Arc;

/// Builder for [`EventQueue`]
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(CircuitBreakerRegistry::new());
/// let dead_letters = Arc::new(DeadLetterBuffer::new(500));
///
/// let queue = EventQueue::builder()
///     .workers(4)
///     .with_registry(registry.clone())
///     .with_dead_letters(dead_letters.clone())
///     .build();
/// ```
pub struct EventQueueBuilder {
    config: QueueConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    registry: Option<Arc<CircuitBreakerRegistry>>,
    breaker_config: Option<CircuitBreakerConfig>,
    dead_letters: Option<Arc<DeadLetterBuffer>>,
}

impl EventQueueBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            breaker: None,
            registry: None,
            breaker_config: None,
            dead_letters: None,
        }
    }

    /// Replace the whole queue configuration
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn per_type_capacity(mut self, capacity: usize) -> Self {
        self.config.per_type_capacity = capacity;
        self
    }

    pub fn poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Retry delay settings
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Use an existing breaker; wins over a registry
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Take the `event-queue` breaker from a shared registry
    pub fn with_registry(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Settings for a breaker the builder creates
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = Some(config);
        self
    }

    /// Share a dead-letter buffer with other components
    pub fn with_dead_letters(mut self, buffer: Arc<DeadLetterBuffer>) -> Self {
        self.dead_letters = Some(buffer);
        self
    }

    /// Build the queue
    ///
    /// Breaker resolution order: explicit breaker, registry entry named
    /// `event-queue`, then a private breaker with that name.
    pub fn build(self) -> EventQueue {
        let config = self.config.normalized();

        let breaker = match (self.breaker, self.registry) {
            (Some(breaker), _) => breaker,
            (None, Some(registry)) => registry.get_or_create(QUEUE_BREAKER_NAME, self.breaker_config),
            (None, None) => {
                let mut breaker_config = self.breaker_config.unwrap_or_default();
                breaker_config.name = QUEUE_BREAKER_NAME.to_string();
                Arc::new(CircuitBreaker::new(breaker_config))
            }
        };

        let dead_letters = self
            .dead_letters
            .unwrap_or_else(|| Arc::new(DeadLetterBuffer::new(config.dead_letter_capacity)));

        EventQueue::from_parts(config, breaker, dead_letters)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_builder_creates_private_breaker() {
        let queue = EventQueue::builder().build();
        assert_eq!(queue.breaker().name(), QUEUE_BREAKER_NAME);
        assert_eq!(queue.config().workers, 10);
        assert_eq!(queue.dead_letters().capacity(), 1000);
    }

    #[test]
    fn test_registry_breaker_is_shared() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let a = EventQueue::builder().with_registry(registry.clone()).build();
        let b = EventQueue::builder().with_registry(registry.clone()).build();

        assert!(Arc::ptr_eq(a.breaker(), b.breaker()));
        assert!(registry.get(QUEUE_BREAKER_NAME).is_some());
    }

    #[test]
    fn test_explicit_breaker_wins() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let breaker = Arc::new(CircuitBreaker::with_defaults("custom"));
        let queue = EventQueue::builder()
            .with_registry(registry.clone())
            .with_breaker(breaker.clone())
            .build();

        assert!(Arc::ptr_eq(queue.breaker(), &breaker));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_breaker_config_applies() {
        let queue = EventQueue::builder()
            .with_breaker_config(CircuitBreakerConfig {
                failure_threshold: 2,
                timeout: Duration::from_millis(50),
                ..Default::default()
            })
            .build();
        assert_eq!(queue.breaker().config().failure_threshold, 2);
        assert_eq!(queue.breaker().name(), QUEUE_BREAKER_NAME);
    }
}
