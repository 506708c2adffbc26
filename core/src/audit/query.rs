//! Audit queries
//!
//! Filters are conjunctive. Each list filter matches when empty or when it
//! contains the event's value. Time bounds are inclusive.

use super::event::{AuditEvent, EventType};
use crate::error::VigilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Primary sort key; ties are always broken by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Timestamp,
    EventType,
    Actor,
}

impl FromStr for SortBy {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "timestamp" => Ok(SortBy::Timestamp),
            "event_type" | "type" => Ok(SortBy::EventType),
            "actor" => Ok(SortBy::Actor),
            other => Err(VigilError::Validation(format!("unknown sort key '{other}'"))),
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortBy::Timestamp => "timestamp",
            SortBy::EventType => "event_type",
            SortBy::Actor => "actor",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(VigilError::Validation(format!("unknown sort order '{other}'"))),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        })
    }
}

/// Query over stored audit events
///
/// ```ignore
/// let page = auditor
///     .query(
///         &AuditQuery::new()
///             .since(Utc::now() - chrono::Duration::hours(1))
///             .event_type(EventType::AUTH_FAILURE)
///             .sort(SortBy::Timestamp, SortOrder::Desc)
///             .limit(50),
///     )
///     .await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_types: Vec<EventType>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    /// Page size; 0 returns everything after `offset`
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive time window
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<EventType>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actors.push(actor.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort(mut self, by: SortBy, order: SortOrder) -> Self {
        self.sort_by = by;
        self.sort_order = order;
        self
    }

    /// Whether the time window alone admits `timestamp`
    pub fn in_window(&self, timestamp: &DateTime<Utc>) -> bool {
        self.start_time.is_none_or(|start| *timestamp >= start)
            && self.end_time.is_none_or(|end| *timestamp <= end)
    }

    /// Whether an event passes every filter
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.in_window(&event.timestamp)
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && (self.actors.is_empty() || self.actors.contains(&event.actor))
            && (self.resources.is_empty() || self.resources.contains(&event.resource))
            && (self.actions.is_empty() || self.actions.contains(&event.action))
    }

    fn compare(&self, a: &AuditEvent, b: &AuditEvent) -> Ordering {
        let primary = match self.sort_by {
            SortBy::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortBy::EventType => a.event_type.cmp(&b.event_type),
            SortBy::Actor => a.actor.cmp(&b.actor),
        };
        let ordering = primary.then_with(|| a.id.cmp(&b.id));
        match self.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }

    /// Filter, sort and paginate
    pub fn apply<I>(&self, events: I) -> AuditQueryResult
    where
        I: IntoIterator<Item = AuditEvent>,
    {
        let mut matched: Vec<AuditEvent> = events.into_iter().filter(|e| self.matches(e)).collect();
        matched.sort_by(|a, b| self.compare(a, b));

        let total_count = matched.len();
        let start = self.offset.min(total_count);
        let end = if self.limit == 0 {
            total_count
        } else {
            start.saturating_add(self.limit).min(total_count)
        };
        let events: Vec<AuditEvent> = matched.drain(start..end).collect();

        AuditQueryResult {
            has_more: end < total_count,
            total_count,
            events,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditQueryResult {
    pub events: Vec<AuditEvent>,
    /// Matches before pagination
    pub total_count: usize,
    /// More matches exist past this page
    pub has_more: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: u64, secs: i64, event_type: &str, actor: &str) -> AuditEvent {
        let mut event = AuditEvent::new(event_type, actor, "read", "records");
        event.id = id;
        event.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        event
    }

    fn sample() -> Vec<AuditEvent> {
        vec![
            event(1, 10, "data.access", "carol"),
            event(2, 30, "authentication.failure", "alice"),
            event(3, 20, "data.access", "bob"),
            event(4, 20, "data.access", "alice"),
            event(5, 40, "system.start", "system"),
        ]
    }

    fn ids(result: &AuditQueryResult) -> Vec<u64> {
        result.events.iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_default_sorts_by_timestamp_then_id() {
        let result = AuditQuery::new().apply(sample());
        assert_eq!(ids(&result), vec![1, 3, 4, 2, 5]);
        assert_eq!(result.total_count, 5);
        assert!(!result.has_more);
    }

    #[test]
    fn test_descending_reverses_ties_too() {
        let result = AuditQuery::new()
            .sort(SortBy::Timestamp, SortOrder::Desc)
            .apply(sample());
        assert_eq!(ids(&result), vec![5, 2, 4, 3, 1]);
    }

    #[test]
    fn test_sort_by_actor() {
        let result = AuditQuery::new()
            .sort(SortBy::Actor, SortOrder::Asc)
            .apply(sample());
        assert_eq!(ids(&result), vec![2, 4, 3, 1, 5]);
    }

    #[test]
    fn test_filters_combine() {
        let result = AuditQuery::new()
            .event_type("data.access")
            .actor("alice")
            .actor("bob")
            .apply(sample());
        assert_eq!(ids(&result), vec![3, 4]);

        let none = AuditQuery::new().action("delete").apply(sample());
        assert_eq!(none.total_count, 0);
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let start = Utc.timestamp_opt(1_700_000_020, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_000_030, 0).unwrap();
        let result = AuditQuery::new().between(start, end).apply(sample());
        assert_eq!(ids(&result), vec![3, 4, 2]);
    }

    #[test]
    fn test_pagination() {
        let page = AuditQuery::new().limit(2).offset(1).apply(sample());
        assert_eq!(ids(&page), vec![3, 4]);
        assert_eq!(page.total_count, 5);
        assert!(page.has_more);

        let last = AuditQuery::new().limit(2).offset(4).apply(sample());
        assert_eq!(ids(&last), vec![5]);
        assert!(!last.has_more);

        let past_end = AuditQuery::new().limit(2).offset(10).apply(sample());
        assert!(past_end.events.is_empty());
        assert!(!past_end.has_more);
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let result = AuditQuery::new().offset(2).apply(sample());
        assert_eq!(result.events.len(), 3);
        assert!(!result.has_more);
    }

    #[test]
    fn test_parse_sort_options() {
        assert_eq!("event_type".parse::<SortBy>().unwrap(), SortBy::EventType);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("size".parse::<SortBy>().is_err());
    }
}
