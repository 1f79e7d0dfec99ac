//! Typed events published to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

/// How a message reached the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    /// Sent immediately at a client's request.
    Direct,
    /// Delivered from the scheduled queue.
    Scheduled,
    /// Received from another party.
    Incoming,
}

/// Event fanned out to every connected observer.
///
/// Serializes as `{"event": "<name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServiceEvent {
    /// A pairing challenge, rendered as a `data:` URL.
    ChallengeIssued { image: String },
    /// Human-readable lifecycle status.
    Status {
        message: String,
        #[serde(rename = "type")]
        kind: StatusKind,
    },
    /// The session became ready.
    Ready { message: String },
    /// A message was sent, delivered or received.
    NewMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        #[serde(rename = "fromMe")]
        from_me: bool,
        sender: String,
        #[serde(rename = "type")]
        origin: MessageOrigin,
        timestamp: DateTime<Utc>,
    },
}

impl ServiceEvent {
    /// Convenience constructor for status events.
    pub fn status(message: impl Into<String>, kind: StatusKind) -> Self {
        Self::Status {
            message: message.into(),
            kind,
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ChallengeIssued { .. } => "challenge-issued",
            Self::Status { .. } => "status",
            Self::Ready { .. } => "ready",
            Self::NewMessage { .. } => "new-message",
        }
    }

    /// Event payload as a JSON value.
    #[must_use]
    pub fn payload(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Rough in-memory size, used to cap replay history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 64;
        OVERHEAD
            + match self {
                Self::ChallengeIssued { image } => image.len(),
                Self::Status { message, .. } | Self::Ready { message } => message.len(),
                Self::NewMessage {
                    conversation_id,
                    content,
                    sender,
                    ..
                } => conversation_id.len() + content.len() + sender.len(),
            }
    }

    /// Convert to an SSE event named after the event.
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn to_sse_event(&self) -> axum::response::sse::Event {
        axum::response::sse::Event::default()
            .event(self.name())
            .data(self.payload().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_shape() {
        let event = ServiceEvent::status("Reconnecting", StatusKind::Warning);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status");
        assert_eq!(json["payload"]["message"], "Reconnecting");
        assert_eq!(json["payload"]["type"], "warning");
    }

    #[test]
    fn test_new_message_payload_fields() {
        let event = ServiceEvent::NewMessage {
            conversation_id: "c1".into(),
            content: "hello".into(),
            from_me: true,
            sender: "me".into(),
            origin: MessageOrigin::Scheduled,
            timestamp: Utc::now(),
        };
        assert_eq!(event.name(), "new-message");
        let payload = event.payload();
        assert_eq!(payload["conversationId"], "c1");
        assert_eq!(payload["fromMe"], true);
        assert_eq!(payload["type"], "scheduled");
    }
}
