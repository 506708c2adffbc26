//! Storage statistics

use super::event::AuditEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of what a backend holds
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub events_by_actor: BTreeMap<String, u64>,
    pub last_event_time: Option<DateTime<Utc>>,
    /// Bytes on disk for the file backend, serialized size for memory
    pub storage_size_bytes: u64,
    /// Events over the covered span, counting at least one day
    pub avg_events_per_day: f64,
}

impl AuditStats {
    pub(crate) fn from_events<'a, I>(events: I, storage_size_bytes: u64) -> Self
    where
        I: IntoIterator<Item = &'a AuditEvent>,
    {
        let mut stats = AuditStats {
            storage_size_bytes,
            ..Default::default()
        };
        let mut first: Option<DateTime<Utc>> = None;

        for event in events {
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type.to_string())
                .or_default() += 1;
            *stats.events_by_actor.entry(event.actor.clone()).or_default() += 1;

            if first.is_none_or(|t| event.timestamp < t) {
                first = Some(event.timestamp);
            }
            if stats.last_event_time.is_none_or(|t| event.timestamp > t) {
                stats.last_event_time = Some(event.timestamp);
            }
        }

        if let (Some(first), Some(last)) = (first, stats.last_event_time) {
            let days = (last - first).num_seconds() as f64 / 86_400.0;
            stats.avg_events_per_day = stats.total_events as f64 / days.max(1.0);
        }

        stats
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: u64, day: u32, actor: &str) -> AuditEvent {
        let mut event = AuditEvent::new("data.access", actor, "read", "records");
        event.id = id;
        event.timestamp = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        event
    }

    #[test]
    fn test_counts_and_average() {
        let events = vec![event(1, 1, "alice"), event(2, 3, "bob"), event(3, 5, "alice")];
        let stats = AuditStats::from_events(&events, 123);

        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.events_by_actor["alice"], 2);
        assert_eq!(stats.events_by_type["data.access"], 3);
        assert_eq!(stats.last_event_time, Some(events[2].timestamp));
        assert_eq!(stats.storage_size_bytes, 123);
        assert!((stats.avg_events_per_day - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_short_span_counts_as_one_day() {
        let events = vec![event(1, 1, "alice"), event(2, 1, "alice")];
        let stats = AuditStats::from_events(&events, 0);
        assert!((stats.avg_events_per_day - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty() {
        let stats = AuditStats::from_events(&[], 0);
        assert_eq!(stats, AuditStats::default());
    }
}
