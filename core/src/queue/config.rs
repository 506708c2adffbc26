//! Event queue configuration

use super::backoff::BackoffConfig;
use super::dead_letter::DEFAULT_DEAD_LETTER_CAPACITY;
use std::time::Duration;

/// Default worker count
pub const DEFAULT_WORKERS: usize = 10;
/// Default per-type FIFO bound
pub const DEFAULT_PER_TYPE_CAPACITY: usize = 1000;
/// Default worker poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Retries after the first failed attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Breaker name used when the queue takes its breaker from a registry
pub const QUEUE_BREAKER_NAME: &str = "event-queue";

/// Settings for an [`EventQueue`](super::EventQueue)
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Concurrent workers started by `start`
    pub workers: usize,
    /// Events allowed to wait per type before enqueue fails
    pub per_type_capacity: usize,
    /// How often an idle worker looks for work
    pub poll_interval: Duration,
    /// Retries before an event is dead-lettered
    pub max_retries: u32,
    /// Delay between retries of the same event
    pub backoff: BackoffConfig,
    /// Dead letters retained for inspection
    pub dead_letter_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            per_type_capacity: DEFAULT_PER_TYPE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffConfig::default(),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// Replace zero sizes with defaults
    pub fn normalized(mut self) -> Self {
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.per_type_capacity == 0 {
            self.per_type_capacity = DEFAULT_PER_TYPE_CAPACITY;
        }
        if self.poll_interval.is_zero() {
            self.poll_interval = DEFAULT_POLL_INTERVAL;
        }
        if self.dead_letter_capacity == 0 {
            self.dead_letter_capacity = DEFAULT_DEAD_LETTER_CAPACITY;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.per_type_capacity, 1000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_normalized_keeps_zero_retries() {
        let config = QueueConfig {
            workers: 0,
            max_retries: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.max_retries, 0);
    }
}
