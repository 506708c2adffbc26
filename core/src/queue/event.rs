//! Events held by the queue

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// One unit of work waiting in a per-type FIFO
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Unique id (ULID), assigned on enqueue
    pub id: String,
    /// Type key; selects the FIFO the event lives in
    pub event_type: String,
    /// Opaque payload handed to the handler
    pub payload: Bytes,
    /// Failed attempts so far
    pub retries: u32,
    /// Caller-supplied priority; carried through, not used for ordering
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Set once a handler succeeded
    pub processed_at: Option<DateTime<Utc>>,
    /// Backoff gate: workers skip the event until this instant
    pub(crate) not_before: Option<Instant>,
}

impl QueuedEvent {
    pub(crate) fn new(event_type: impl Into<String>, payload: Bytes, priority: i32) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            event_type: event_type.into(),
            payload,
            retries: 0,
            priority,
            created_at: Utc::now(),
            processed_at: None,
            not_before: None,
        }
    }

    /// Whether the backoff gate has passed
    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Instant::now())
    }

    pub(crate) fn is_ready_at(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|gate| gate <= now)
    }

    /// When a worker may next attempt the event, if gated
    pub fn not_before(&self) -> Option<Instant> {
        self.not_before
    }
}
