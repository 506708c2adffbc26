//! Audit event model
//!
//! An [`AuditEvent`] records who (`actor`) did what (`action`) to which
//! `resource`, and when. Events are immutable once stored; the storage
//! backend fills in `hash` and, with chaining enabled, `prev_hash`.

use crate::error::{Result, VigilError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Free-form event details, kept in key order
pub type Metadata = BTreeMap<String, Value>;

/// Dotted event type, e.g. `authentication.failure`
///
/// Any string is accepted; the associated constants cover the well-known
/// types that carry a category and severity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    pub const AUTH_SUCCESS: EventType = EventType::from_static("authentication.success");
    pub const AUTH_FAILURE: EventType = EventType::from_static("authentication.failure");
    pub const AUTHZ_GRANTED: EventType = EventType::from_static("authorization.granted");
    pub const AUTHZ_DENIED: EventType = EventType::from_static("authorization.denied");
    pub const DATA_ACCESS: EventType = EventType::from_static("data.access");
    pub const DATA_CREATE: EventType = EventType::from_static("data.create");
    pub const DATA_UPDATE: EventType = EventType::from_static("data.update");
    pub const DATA_DELETE: EventType = EventType::from_static("data.delete");
    pub const CONFIG_CHANGE: EventType = EventType::from_static("config.change");
    pub const SYSTEM_START: EventType = EventType::from_static("system.start");
    pub const SYSTEM_STOP: EventType = EventType::from_static("system.stop");
    pub const SYSTEM_ERROR: EventType = EventType::from_static("system.error");
    pub const SECURITY_ALERT: EventType = EventType::from_static("security.alert");
    pub const SECURITY_VIOLATION: EventType = EventType::from_static("security.violation");
    pub const COMPLIANCE_CHECK: EventType = EventType::from_static("compliance.check");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Coarse grouping, `unknown` for types outside the well-known set
    pub fn category(&self) -> &'static str {
        match self.as_str() {
            "authentication.success" | "authentication.failure" => "authentication",
            "authorization.granted" | "authorization.denied" => "authorization",
            "data.access" | "data.create" | "data.update" | "data.delete" => "data",
            "config.change" => "configuration",
            "system.start" | "system.stop" | "system.error" => "system",
            "security.alert" | "security.violation" => "security",
            "compliance.check" => "compliance",
            _ => "unknown",
        }
    }

    /// Failed logins, denied access and security alerts
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self.as_str(),
            "authentication.failure"
                | "authorization.denied"
                | "security.alert"
                | "security.violation"
        )
    }

    pub fn severity(&self) -> Severity {
        match self.as_str() {
            "security.violation" | "system.error" => Severity::Critical,
            "security.alert" | "authentication.failure" | "authorization.denied" => Severity::High,
            "data.delete" | "config.change" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// How urgently an event deserves attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic per auditor, assigned in call order
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub actor: String,
    pub action: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// SHA-256 of the canonical form, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Hash of the previous stored event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
}

/// Fields covered by the content hash, in a fixed order
#[derive(Serialize)]
struct Canonical<'a> {
    id: u64,
    timestamp: &'a DateTime<Utc>,
    event_type: &'a EventType,
    actor: &'a str,
    action: &'a str,
    resource: &'a str,
    metadata: &'a Metadata,
    prev_hash: Option<&'a str>,
}

impl AuditEvent {
    /// Unstamped event (id 0) timestamped now
    pub fn new(
        event_type: impl Into<EventType>,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            event_type: event_type.into(),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            metadata: Metadata::new(),
            hash: None,
            prev_hash: None,
        }
    }

    /// Add a metadata entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_detail(key, value);
        self
    }

    pub fn add_detail(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail(key).and_then(Value::as_str)
    }

    /// Integer detail; whole floats are accepted
    pub fn detail_i64(&self, key: &str) -> Option<i64> {
        let value = self.detail(key)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_prev_hash(mut self, hash: impl Into<String>) -> Self {
        self.prev_hash = Some(hash.into());
        self
    }

    pub fn category(&self) -> &'static str {
        self.event_type.category()
    }

    pub fn severity(&self) -> Severity {
        self.event_type.severity()
    }

    pub fn is_security_critical(&self) -> bool {
        self.event_type.is_security_critical()
    }

    /// Check that every required field is present
    pub fn validate(&self) -> Result<()> {
        let missing = if self.id == 0 {
            Some("event id")
        } else if self.timestamp.timestamp() == 0 && self.timestamp.timestamp_subsec_nanos() == 0 {
            Some("event timestamp")
        } else if self.event_type.is_empty() {
            Some("event type")
        } else if self.actor.is_empty() {
            Some("actor")
        } else if self.action.is_empty() {
            Some("action")
        } else if self.resource.is_empty() {
            Some("resource")
        } else {
            None
        };

        match missing {
            Some(field) => Err(VigilError::Validation(format!("{field} is required"))),
            None => Ok(()),
        }
    }

    /// SHA-256 over every field except `hash`, hex encoded
    pub fn compute_hash(&self) -> Result<String> {
        let canonical = Canonical {
            id: self.id,
            timestamp: &self.timestamp,
            event_type: &self.event_type,
            actor: &self.actor,
            action: &self.action,
            resource: &self.resource,
            metadata: &self.metadata,
            prev_hash: self.prev_hash.as_deref(),
        };
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Whether the stored hash matches the content
    pub fn verify_hash(&self) -> bool {
        match (&self.hash, self.compute_hash()) {
            (Some(stored), Ok(actual)) => *stored == actual,
            _ => false,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Successful login
    pub fn login_success(user: &str, ip: &str, method: &str) -> Self {
        Self::new(EventType::AUTH_SUCCESS, user, "login", "auth-system")
            .with_detail("ip", ip)
            .with_detail("method", method)
            .with_detail("success", true)
    }

    /// Failed login
    pub fn login_failure(user: &str, ip: &str, method: &str, reason: &str) -> Self {
        Self::new(EventType::AUTH_FAILURE, user, "login", "auth-system")
            .with_detail("ip", ip)
            .with_detail("method", method)
            .with_detail("success", false)
            .with_detail("failure_reason", reason)
    }

    /// Access decision on a resource
    pub fn resource_access(user: &str, resource: &str, action: &str, allowed: bool) -> Self {
        let event_type = if allowed {
            EventType::AUTHZ_GRANTED
        } else {
            EventType::AUTHZ_DENIED
        };
        Self::new(event_type, user, action, resource).with_detail("allowed", allowed)
    }

    /// Configuration value changed
    pub fn config_change(user: &str, key: &str, old_value: &str, new_value: &str) -> Self {
        Self::new(EventType::CONFIG_CHANGE, user, "config-change", "config-system")
            .with_detail("config_key", key)
            .with_detail("old_value", old_value)
            .with_detail("new_value", new_value)
    }

    /// Security alert raised by a detector
    pub fn security_alert(actor: &str, alert_type: &str, description: &str, severity: Severity) -> Self {
        Self::new(EventType::SECURITY_ALERT, actor, "security-alert", "security-system")
            .with_detail("alert_type", alert_type)
            .with_detail("description", description)
            .with_detail("severity", severity.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stamped() -> AuditEvent {
        let mut event = AuditEvent::login_failure("alice", "10.0.0.1", "password", "bad password");
        event.id = 7;
        event
    }

    #[test]
    fn test_event_type_metadata() {
        assert_eq!(EventType::AUTH_FAILURE.category(), "authentication");
        assert!(EventType::AUTH_FAILURE.is_security_critical());
        assert_eq!(EventType::SECURITY_VIOLATION.severity(), Severity::Critical);
        assert_eq!(EventType::DATA_DELETE.severity(), Severity::Medium);

        let custom = EventType::from("deploy.finished");
        assert_eq!(custom.category(), "unknown");
        assert_eq!(custom.severity(), Severity::Low);
        assert!(!custom.is_security_critical());
    }

    #[test]
    fn test_owned_and_static_types_compare_equal() {
        assert_eq!(EventType::new("data.access"), EventType::DATA_ACCESS);
    }

    #[test]
    fn test_validate_requires_fields() {
        assert!(stamped().validate().is_ok());

        let unstamped = AuditEvent::new("data.access", "bob", "read", "records");
        assert!(matches!(unstamped.validate(), Err(VigilError::Validation(msg)) if msg.contains("id")));

        let mut no_actor = stamped();
        no_actor.actor.clear();
        assert!(matches!(no_actor.validate(), Err(VigilError::Validation(msg)) if msg.contains("actor")));
    }

    #[test]
    fn test_hash_is_stable_across_serialization() {
        let event = stamped().with_prev_hash("00ff");
        let hash = event.compute_hash().unwrap();
        assert_eq!(hash.len(), 64);

        let json = event.clone().with_hash(hash.clone()).to_json().unwrap();
        let restored: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.compute_hash().unwrap(), hash);
        assert!(restored.verify_hash());
    }

    #[test]
    fn test_hash_detects_tampering() {
        let event = stamped();
        let hash = event.compute_hash().unwrap();
        let mut tampered = event.with_hash(hash);
        tampered.actor = "mallory".into();
        assert!(!tampered.verify_hash());
    }

    #[test]
    fn test_hash_excludes_hash_field() {
        let event = stamped();
        let plain = event.compute_hash().unwrap();
        let with_hash = event.with_hash("anything").compute_hash().unwrap();
        assert_eq!(plain, with_hash);
    }

    #[test]
    fn test_details() {
        let event = stamped().with_detail("count", 3).with_detail("ratio", 2.0);
        assert_eq!(event.detail_str("ip"), Some("10.0.0.1"));
        assert_eq!(event.detail_i64("count"), Some(3));
        assert_eq!(event.detail_i64("ratio"), Some(2));
        assert_eq!(event.detail("missing"), None);
    }

    #[test]
    fn test_empty_metadata_is_omitted() {
        let mut event = AuditEvent::new("system.start", "system", "start", "core");
        event.id = 1;
        let json = event.to_json().unwrap();
        assert!(!json.contains("metadata"));
        assert!(!json.contains("prev_hash"));
    }
}
