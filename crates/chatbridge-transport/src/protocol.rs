//! Wire protocol for client-server communication.

use chatbridge_core::{ScheduledMessage, SentMessageRecord, ServiceEvent};
use chatbridge_session::ConversationSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery time as sent by clients: RFC 3339 text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendAt {
    Millis(i64),
    Text(String),
}

impl SendAt {
    /// Resolve to a UTC timestamp.
    ///
    /// # Errors
    /// Returns a description of the problem if the value is not a valid time.
    pub fn resolve(&self) -> Result<DateTime<Utc>, String> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(*ms)
                .ok_or_else(|| format!("sendAt out of range: {ms}")),
            Self::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Self::Millis(ms).resolve();
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| format!("Invalid sendAt {text:?}: {e}"))
            }
        }
    }
}

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Send a message now.
    SendMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
    },
    /// Queue a message for later delivery.
    ScheduleMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        #[serde(rename = "sendAt")]
        send_at: SendAt,
    },
    /// Request the cached conversation list.
    ListConversations,
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A published service event.
    Event { event: String, payload: Value },
    /// Cached conversations.
    Conversations {
        conversations: Vec<ConversationSummary>,
    },
    /// A direct send completed.
    MessageSent { message: SentMessageRecord },
    /// A message was queued.
    MessageScheduled { scheduled: ScheduledMessage },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl From<&ServiceEvent> for ServerMessage {
    fn from(event: &ServiceEvent) -> Self {
        Self::Event {
            event: event.name().to_string(),
            payload: event.payload(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_core::StatusKind;

    #[test]
    fn test_send_at_accepts_rfc3339() {
        let at = SendAt::Text("2024-05-01T10:00:00+02:00".into())
            .resolve()
            .unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-01T08:00:00+00:00");
    }

    #[test]
    fn test_send_at_accepts_millis() {
        let at = SendAt::Millis(1_714_550_400_000).resolve().unwrap();
        assert_eq!(at.timestamp_millis(), 1_714_550_400_000);

        let at = SendAt::Text("1714550400000".into()).resolve().unwrap();
        assert_eq!(at.timestamp_millis(), 1_714_550_400_000);
    }

    #[test]
    fn test_send_at_rejects_garbage() {
        assert!(SendAt::Text("next tuesday".into()).resolve().is_err());
        assert!(SendAt::Text(String::new()).resolve().is_err());
        assert!(SendAt::Millis(i64::MAX).resolve().is_err());
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"schedule_message","conversationId":"c1","content":"hi","sendAt":1714550400000}"#,
        )
        .unwrap();
        let ClientMessage::ScheduleMessage { send_at, .. } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(send_at, SendAt::Millis(1_714_550_400_000));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"list_conversations"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::ListConversations));
    }

    #[test]
    fn test_event_message_shape() {
        let event = ServiceEvent::status("Starting session", StatusKind::Info);
        let json = serde_json::to_value(ServerMessage::from(&event)).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "status");
        assert_eq!(json["payload"]["type"], "info");
    }
}
