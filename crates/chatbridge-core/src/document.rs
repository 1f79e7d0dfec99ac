//! The persisted document and the records it holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Which way a logged message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Delivery status of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Received,
}

/// Entry in the append-only message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessageRecord {
    /// Provider-assigned message id.
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sent_at_timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub status: MessageStatus,
}

impl SentMessageRecord {
    /// Record for a message this session sent.
    #[must_use]
    pub fn outbound(
        id: String,
        conversation_id: String,
        content: String,
        sent_at_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            content,
            sent_at_timestamp,
            direction: Direction::Outbound,
            status: MessageStatus::Sent,
        }
    }
}

/// Queued message awaiting (or past) delivery.
///
/// Entries are kept after delivery as an audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub send_at_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ScheduledMessage {
    /// Unsent and at or past its send time.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.sent && self.send_at_timestamp <= now
    }
}

/// The single durable document: message log, scheduled queue, session records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    #[serde(default)]
    pub messages: Vec<SentMessageRecord>,
    #[serde(default)]
    pub scheduled_messages: Vec<ScheduledMessage>,
    /// Reserved for provider session records.
    #[serde(default)]
    pub sessions: Vec<Value>,
}

impl PersistedDocument {
    /// Parse stored content, repairing whatever is unusable.
    ///
    /// Returns the document and whether any repair happened. Non-object
    /// content yields the default document; each missing or malformed
    /// collection is replaced by an empty one.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> (Self, bool) {
        let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(raw) else {
            return (Self::default(), true);
        };

        let mut repaired = false;
        let doc = Self {
            messages: take_collection(&mut map, "messages", &mut repaired),
            scheduled_messages: take_collection(&mut map, "scheduledMessages", &mut repaired),
            sessions: take_collection(&mut map, "sessions", &mut repaired),
        };
        (doc, repaired)
    }
}

fn take_collection<T: DeserializeOwned>(
    map: &mut Map<String, Value>,
    key: &str,
    repaired: &mut bool,
) -> Vec<T> {
    match map.remove(key) {
        Some(value @ Value::Array(_)) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(collection = key, "Discarding malformed collection: {e}");
            *repaired = true;
            Vec::new()
        }),
        _ => {
            *repaired = true;
            Vec::new()
        }
    }
}
