//! Hash chain over stored audit events
//!
//! Each stored event carries the SHA-256 of its own canonical form. With
//! chaining on, it also carries the hash of the event stored before it, so
//! editing or removing a record in the middle breaks every later link.
//!
//! Verification trusts the first retained event's `prev_hash`: retention
//! cleanup removes the head of the chain by design.

use super::event::AuditEvent;
use crate::error::Result;
use serde::Serialize;

/// `prev_hash` of the first event ever stored
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Tracks the chain head for a storage backend
///
/// Lives under the backend's write lock so links follow storage order.
#[derive(Debug)]
pub(crate) struct ChainLinker {
    linked: bool,
    last_hash: Option<String>,
}

impl ChainLinker {
    pub(crate) fn new(linked: bool) -> Self {
        Self {
            linked,
            last_hash: None,
        }
    }

    /// Resume after a restart from the last stored event
    pub(crate) fn resume(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    /// Stamp `prev_hash` (when linked) and `hash` onto the event
    ///
    /// The head only moves on [`commit`](Self::commit), once the event is
    /// durably written.
    pub(crate) fn seal(&self, event: &mut AuditEvent) -> Result<String> {
        event.hash = None;
        event.prev_hash = if self.linked {
            Some(
                self.last_hash
                    .clone()
                    .unwrap_or_else(|| GENESIS_HASH.to_string()),
            )
        } else {
            None
        };
        let hash = event.compute_hash()?;
        event.hash = Some(hash.clone());
        Ok(hash)
    }

    pub(crate) fn commit(&mut self, hash: String) {
        self.last_hash = Some(hash);
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.linked
    }
}

/// What went wrong with one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainIssueKind {
    /// No hash stored
    MissingHash,
    /// Content no longer matches the stored hash
    HashMismatch { stored: String, computed: String },
    /// `prev_hash` does not match the predecessor's hash
    BrokenLink {
        expected: Option<String>,
        found: Option<String>,
    },
}

/// A problem found during verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainIssue {
    /// Id of the offending event
    pub id: u64,
    /// Position in storage order
    pub position: usize,
    #[serde(flatten)]
    pub kind: ChainIssueKind,
}

/// Outcome of verifying stored events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Events examined
    pub checked: usize,
    /// Whether links between events were checked
    pub linked: bool,
    pub first_id: Option<u64>,
    pub last_id: Option<u64>,
    /// Hash of the last event, the current chain head
    pub head: Option<String>,
    pub issues: Vec<ChainIssue>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Verify events given in storage order
///
/// With `linked`, every event after the first must point at its
/// predecessor's stored hash.
pub fn verify_chain(events: &[AuditEvent], linked: bool) -> ChainReport {
    let mut issues = Vec::new();

    for (position, event) in events.iter().enumerate() {
        match &event.hash {
            None => issues.push(ChainIssue {
                id: event.id,
                position,
                kind: ChainIssueKind::MissingHash,
            }),
            Some(stored) => match event.compute_hash() {
                Ok(computed) if computed == *stored => {}
                Ok(computed) => issues.push(ChainIssue {
                    id: event.id,
                    position,
                    kind: ChainIssueKind::HashMismatch {
                        stored: stored.clone(),
                        computed,
                    },
                }),
                Err(e) => issues.push(ChainIssue {
                    id: event.id,
                    position,
                    kind: ChainIssueKind::HashMismatch {
                        stored: stored.clone(),
                        computed: format!("<unavailable: {e}>"),
                    },
                }),
            },
        }

        if linked && position > 0 {
            let expected = events[position - 1].hash.clone();
            if event.prev_hash != expected {
                issues.push(ChainIssue {
                    id: event.id,
                    position,
                    kind: ChainIssueKind::BrokenLink {
                        expected,
                        found: event.prev_hash.clone(),
                    },
                });
            }
        }
    }

    ChainReport {
        checked: events.len(),
        linked,
        first_id: events.first().map(|e| e.id),
        last_id: events.last().map(|e| e.id),
        head: events.last().and_then(|e| e.hash.clone()),
        issues,
    }
}
