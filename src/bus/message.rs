//! Message types for inter-handler communication.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Recipient name that addresses every registered mailbox.
pub const BROADCAST_ACTOR: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Broadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: String,
    pub from_actor: String,
    pub to_actor: String,
    pub kind: MessageKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl BusMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Value,
        ttl_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_actor: from.into(),
            to_actor: to.into(),
            kind: MessageKind::Request,
            payload,
            timestamp: Utc::now(),
            ttl_ms,
            in_reply_to: None,
        }
    }

    pub fn broadcast(from: impl Into<String>, payload: Value, ttl_ms: u64) -> Self {
        let mut msg = Self::new(from, BROADCAST_ACTOR, payload, ttl_ms);
        msg.kind = MessageKind::Broadcast;
        msg
    }

    pub fn response_to(mut self, original_id: impl Into<String>) -> Self {
        self.kind = MessageKind::Response;
        self.in_reply_to = Some(original_id.into());
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_actor == BROADCAST_ACTOR
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp)
            >= ChronoDuration::milliseconds(self.ttl_ms as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = BusMessage::new("hippocrates", "atlas", json!({"x": 1}), 300_000);
        assert_eq!(msg.from_actor, "hippocrates");
        assert_eq!(msg.to_actor, "atlas");
        assert_eq!(msg.kind, MessageKind::Request);
        assert!(!msg.is_broadcast());
        assert!(msg.in_reply_to.is_none());
    }

    #[test]
    fn test_broadcast_message() {
        let msg = BusMessage::broadcast("atlas", json!({"notice": true}), 1000);
        assert!(msg.is_broadcast());
        assert_eq!(msg.kind, MessageKind::Broadcast);
    }

    #[test]
    fn test_expiry() {
        let mut msg = BusMessage::new("a", "b", json!({}), 100);
        assert!(!msg.is_expired(Utc::now()));

        msg.timestamp = Utc::now() - ChronoDuration::milliseconds(200);
        assert!(msg.is_expired(Utc::now()));
    }

    #[test]
    fn test_response_annotation() {
        let original = BusMessage::new("a", "b", json!({}), 1000);
        let reply = BusMessage::new("b", "a", json!({"ok": true}), 1000)
            .response_to(original.id.clone());
        assert_eq!(reply.kind, MessageKind::Response);
        assert_eq!(reply.in_reply_to.as_deref(), Some(original.id.as_str()));
    }
}
