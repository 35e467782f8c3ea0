//! Message bus domain types for devcrew.
//!
//! Defines the `Envelope` carried over the broker, the fixed `MessageType`
//! enumeration, and the channel naming convention that separates directed,
//! broadcast, and private-reply traffic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open key-value payload carried by an envelope. Opaque to the bus.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Channel used when an envelope has no recipient.
pub const BROADCAST_CHANNEL: &str = "broadcast";

/// Default envelope priority (1 = highest, 10 = lowest).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Inclusive priority bounds.
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Directed delivery channel for a specific agent.
pub fn agent_channel(agent_id: &str) -> String {
    format!("agent_{agent_id}")
}

/// Private reply channel for responses addressed back to `sender_id`.
pub fn response_channel(sender_id: &str) -> String {
    format!("agent_{sender_id}_responses")
}

/// Channel an envelope is published on, given its optional recipient.
pub fn channel_for(recipient_id: Option<&str>) -> String {
    match recipient_id {
        Some(id) => agent_channel(id),
        None => BROADCAST_CHANNEL.to_string(),
    }
}

/// Convert an arbitrary JSON value into a payload map.
///
/// Objects are used as-is; any other value is wrapped as `{"value": v}`.
pub fn into_payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Kind of traffic an envelope represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskRequest,
    TaskResponse,
    TaskUpdate,
    AgentStatus,
    SystemAlert,
    Coordination,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::TaskRequest,
        MessageType::TaskResponse,
        MessageType::TaskUpdate,
        MessageType::AgentStatus,
        MessageType::SystemAlert,
        MessageType::Coordination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TaskRequest => "task_request",
            MessageType::TaskResponse => "task_response",
            MessageType::TaskUpdate => "task_update",
            MessageType::AgentStatus => "agent_status",
            MessageType::SystemAlert => "system_alert",
            MessageType::Coordination => "coordination",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown message type '{s}'"))
    }
}

/// The structured message unit exchanged over the bus.
///
/// `priority` and `expires_at` are advisory metadata: the bus delivers in
/// transport order and never drops expired envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message ID (`msg_` + UUIDv7).
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Originating agent or component.
    pub sender_id: String,
    /// Target agent. `None` means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub payload: Payload,
    /// Creation time. Set once.
    pub timestamp: DateTime<Utc>,
    /// Ties a response back to its originating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// Generate a fresh message ID.
pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::now_v7().simple())
}

/// Generate a fresh correlation ID for a request/response exchange.
pub fn new_correlation_id() -> String {
    format!("req_{}", Uuid::now_v7().simple())
}

impl Envelope {
    /// Build a broadcast envelope with default priority and a fresh ID.
    pub fn new(message_type: MessageType, sender_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: new_message_id(),
            message_type,
            sender_id: sender_id.into(),
            recipient_id: None,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            priority: DEFAULT_PRIORITY,
            expires_at: None,
        }
    }

    /// Build a reply to `request`, addressed to its sender and carrying its
    /// correlation ID.
    pub fn reply_to(
        request: &Envelope,
        sender_id: impl Into<String>,
        message_type: MessageType,
        payload: Payload,
    ) -> Self {
        let mut reply = Envelope::new(message_type, sender_id, payload);
        reply.recipient_id = Some(request.sender_id.clone());
        reply.correlation_id = request.correlation_id.clone();
        reply
    }

    pub fn to(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn with_recipient(mut self, recipient_id: Option<String>) -> Self {
        self.recipient_id = recipient_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether `priority` lies within 1..=10.
    pub fn has_valid_priority(&self) -> bool {
        (MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority)
    }

    /// Whether the advisory expiry has passed at `now`. Never consulted by the bus.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Channel this envelope is routed to.
    pub fn channel(&self) -> String {
        channel_for(self.recipient_id.as_deref())
    }

    /// Serialize to the wire encoding (compact JSON).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an envelope from the wire encoding.
    ///
    /// Well-formed JSON is still rejected when the sender is empty or the
    /// priority lies outside 1..=10.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        use serde::de::Error as _;

        let envelope: Self = serde_json::from_str(raw)?;
        if envelope.sender_id.is_empty() {
            return Err(serde_json::Error::custom("envelope has no sender_id"));
        }
        if !envelope.has_valid_priority() {
            return Err(serde_json::Error::custom(format!(
                "priority {} out of range ({MIN_PRIORITY}-{MAX_PRIORITY})",
                envelope.priority
            )));
        }
        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_envelope_roundtrip_preserves_every_field() {
        let env = Envelope::new(
            MessageType::TaskRequest,
            "dev-1",
            into_payload(json!({"task": "write tests", "nested": {"n": [1, 2, 3]}})),
        )
        .to("reviewer-1")
        .with_correlation_id("req_abc")
        .with_priority(2)
        .with_expiry(Utc::now() + Duration::minutes(5));

        let wire = env.encode().unwrap();
        let parsed = Envelope::decode(&wire).unwrap();

        assert_eq!(parsed, env);
        assert_eq!(parsed.message_type, MessageType::TaskRequest);
    }

    #[test]
    fn test_envelope_optional_fields_absent_on_wire() {
        let env = Envelope::new(MessageType::TaskUpdate, "dev-1", into_payload(json!({"progress": 50})));
        let wire = env.encode().unwrap();

        assert!(wire.contains("\"type\":\"task_update\""));
        assert!(!wire.contains("recipient_id"));
        assert!(!wire.contains("correlation_id"));
        assert!(!wire.contains("expires_at"));

        let parsed = Envelope::decode(&wire).unwrap();
        assert!(parsed.recipient_id.is_none());
        assert!(parsed.correlation_id.is_none());
        assert!(parsed.expires_at.is_none());
        assert_eq!(parsed.payload["progress"], 50);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = r#"{"id":"msg_1","type":"gossip","sender_id":"a","payload":{},"timestamp":"2026-01-01T00:00:00Z"}"#;
        assert!(Envelope::decode(raw).is_err());
    }

    #[test]
    fn test_decode_defaults_missing_priority() {
        let raw = r#"{"id":"msg_1","type":"coordination","sender_id":"a","payload":{},"timestamp":"2026-01-01T00:00:00Z"}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_decode_rejects_missing_sender_and_bad_priority() {
        let empty_sender = r#"{"id":"msg_1","type":"coordination","sender_id":"","payload":{},"timestamp":"2026-01-01T00:00:00Z"}"#;
        assert!(Envelope::decode(empty_sender).is_err());

        for priority in [0, 11, 255] {
            let raw = format!(
                r#"{{"id":"msg_1","type":"coordination","sender_id":"a","payload":{{}},"priority":{priority},"timestamp":"2026-01-01T00:00:00Z"}}"#
            );
            let err = Envelope::decode(&raw).unwrap_err();
            assert!(err.to_string().contains("out of range"), "{err}");
        }

        let edge = r#"{"id":"msg_1","type":"coordination","sender_id":"a","payload":{},"priority":10,"timestamp":"2026-01-01T00:00:00Z"}"#;
        assert_eq!(Envelope::decode(edge).unwrap().priority, 10);
    }

    #[test]
    fn test_message_type_string_forms() {
        for t in MessageType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
        assert!("nope".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_channel_naming_keeps_three_way_distinction() {
        assert_eq!(channel_for(Some("reviewer")), "agent_reviewer");
        assert_eq!(channel_for(None), BROADCAST_CHANNEL);
        assert_eq!(response_channel("dev-1"), "agent_dev-1_responses");
        assert_ne!(agent_channel("dev-1"), response_channel("dev-1"));
    }

    #[test]
    fn test_reply_to_copies_correlation_and_addresses_sender() {
        let req = Envelope::new(MessageType::TaskRequest, "dev-1", Payload::new())
            .to("reviewer")
            .with_correlation_id("req_42");
        let reply = Envelope::reply_to(&req, "reviewer", MessageType::TaskResponse, Payload::new());

        assert_eq!(reply.correlation_id.as_deref(), Some("req_42"));
        assert_eq!(reply.recipient_id.as_deref(), Some("dev-1"));
        assert_ne!(reply.id, req.id);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Envelope::new(MessageType::Coordination, "x", Payload::new());
        let b = Envelope::new(MessageType::Coordination, "x", Payload::new());
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("msg_"));
        assert!(new_correlation_id().starts_with("req_"));
    }

    #[test]
    fn test_priority_bounds_and_expiry() {
        let env = Envelope::new(MessageType::SystemAlert, "ops", Payload::new());
        assert!(env.clone().with_priority(1).has_valid_priority());
        assert!(env.clone().with_priority(10).has_valid_priority());
        assert!(!env.clone().with_priority(0).has_valid_priority());
        assert!(!env.clone().with_priority(11).has_valid_priority());

        let now = Utc::now();
        assert!(!env.is_expired(now));
        assert!(env.clone().with_expiry(now - Duration::seconds(1)).is_expired(now));
    }

    #[test]
    fn test_into_payload_wraps_scalars() {
        let p = into_payload(json!(7));
        assert_eq!(p["value"], 7);
        let p = into_payload(json!({"k": "v"}));
        assert_eq!(p["k"], "v");
    }
}
