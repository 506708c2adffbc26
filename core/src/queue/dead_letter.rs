//! Dead-letter buffer for events that exhausted their retries
//!
//! In-memory only. Entries are lost on restart; the buffer exists so an
//! operator can see what failed and replay it by hand.
//!
//! When full, the oldest entry is evicted. Watch `total_dropped` to notice
//! capacity pressure.

use super::event::QueuedEvent;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of dead letters retained
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// An event removed from the queue after its final failed attempt
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: QueuedEvent,
    /// Error from the final attempt
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Bounded ring of dead letters
pub struct DeadLetterBuffer {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    total_captured: AtomicU64,
    total_dropped: AtomicU64,
}

impl DeadLetterBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            total_captured: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Capture a dead letter, evicting the oldest if full
    pub fn push(&self, letter: DeadLetter) {
        let evicted = {
            let mut entries = self.entries.lock();
            let evicted = if entries.len() >= self.capacity {
                entries.pop_front()
            } else {
                None
            };
            entries.push_back(letter);
            evicted
        };

        self.total_captured.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = evicted {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                event_id = %old.event.id,
                event_type = %old.event.event_type,
                capacity = self.capacity,
                "dead-letter buffer full, oldest entry evicted"
            );
        }
    }

    /// Remove up to `n` of the oldest entries
    pub fn drain(&self, n: usize) -> Vec<DeadLetter> {
        let mut entries = self.entries.lock();
        let count = n.min(entries.len());
        entries.drain(..count).collect()
    }

    /// Copy up to `n` of the oldest entries without removing them
    pub fn peek(&self, n: usize) -> Vec<DeadLetter> {
        self.entries.lock().iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries ever captured
    pub fn total_captured(&self) -> u64 {
        self.total_captured.load(Ordering::Relaxed)
    }

    /// Entries evicted to make room
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for DeadLetterBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn letter(n: usize) -> DeadLetter {
        let mut event = QueuedEvent::new("deploy", Bytes::new(), 0);
        event.id = format!("evt-{n}");
        DeadLetter {
            event,
            error: "handler failed".into(),
            failed_at: Utc::now(),
            attempts: 4,
        }
    }

    #[test]
    fn test_push_and_len() {
        let buffer = DeadLetterBuffer::new(10);
        buffer.push(letter(0));
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.is_empty());
        assert_eq!(buffer.total_captured(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let buffer = DeadLetterBuffer::new(3);
        for i in 0..5 {
            buffer.push(letter(i));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.total_captured(), 5);
        assert_eq!(buffer.total_dropped(), 2);

        let ids: Vec<String> = buffer.drain(10).into_iter().map(|d| d.event.id).collect();
        assert_eq!(ids, vec!["evt-2", "evt-3", "evt-4"]);
    }

    #[test]
    fn test_drain_partial() {
        let buffer = DeadLetterBuffer::new(10);
        for i in 0..5 {
            buffer.push(letter(i));
        }
        assert_eq!(buffer.drain(3).len(), 3);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_peek_keeps_entries() {
        let buffer = DeadLetterBuffer::new(10);
        for i in 0..3 {
            buffer.push(letter(i));
        }
        assert_eq!(buffer.peek(2).len(), 2);
        assert_eq!(buffer.len(), 3);

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
