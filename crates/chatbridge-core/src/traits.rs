//! Collaborator traits for the session provider, document store and broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{PersistedDocument, ServiceEvent};

/// Lifecycle state of the single external session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No handle has been created yet.
    Uninitialized,
    /// A connect attempt is in flight.
    Starting,
    /// The provider issued a pairing challenge and is waiting for it to be used.
    AwaitingChallenge,
    /// Credentials were accepted; the session is still syncing.
    Authenticated,
    /// The session can serve queries and sends.
    Ready,
    /// Authentication failed. Needs an explicit restart.
    Failed,
    /// The connection dropped; a reconnect is pending.
    Disconnected,
}

impl SessionState {
    /// Whether the session may serve conversation queries and sends.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Pairing artifact issued during authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// MIME type of the artifact, e.g. `image/png`.
    pub mime: String,
    /// Raw artifact bytes.
    pub data: Vec<u8>,
}

impl Challenge {
    /// Create a PNG challenge.
    #[must_use]
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            mime: "image/png".to_string(),
            data,
        }
    }

    /// Render as a `data:` URL suitable for an `<img>` tag.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.data))
    }
}

/// Conversation as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConversation {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    /// Broadcast lists are not real conversations.
    pub is_broadcast: bool,
    /// Status feeds are not real conversations.
    pub is_status: bool,
    pub unread_count: u32,
}

/// Receipt returned by the provider for a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    /// Provider-assigned message id.
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// Message observed on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Echo of a message this session sent itself.
    pub from_me: bool,
}

/// Events emitted by the provider over the life of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    ChallengeIssued(Challenge),
    Authenticated,
    Ready,
    AuthFailed(String),
    Disconnected(String),
    Message(IncomingMessage),
}

/// Channel the provider pushes lifecycle events into.
pub type EventSink = mpsc::UnboundedSender<ProviderEvent>;

/// Provider error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Transient provider error: {0}")]
    Transient(String),
    #[error("Provider rejected request: {0}")]
    Rejected(String),
    #[error("Session handle closed")]
    Closed,
}

/// Factory for external session handles.
///
/// The provider supports a single live handle per identity; callers are
/// responsible for never holding two at once.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Create a handle and begin initialization.
    ///
    /// Returns once the handle exists. Lifecycle progress (challenge,
    /// authentication, readiness) is reported through `events`.
    async fn connect(&self, events: EventSink) -> Result<Arc<dyn ProviderSession>, ProviderError>;
}

/// A live external session handle. Not safe for concurrent protocol use.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Full conversation list, ordered by the provider (typically recency).
    async fn conversations(&self) -> Result<Vec<ProviderConversation>, ProviderError>;

    /// Send a text message.
    async fn send(&self, conversation_id: &str, content: &str)
    -> Result<ProviderMessage, ProviderError>;

    /// Tear down the handle.
    async fn destroy(&self);
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Durable holder of the single persisted document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the document. Never fails; unusable content yields a repaired default.
    async fn load(&self) -> PersistedDocument;

    /// Atomically replace the whole document.
    async fn write(&self, doc: &PersistedDocument) -> Result<(), StoreError>;
}

/// Fire-and-forget fan-out to connected observers.
pub trait Broadcast: Send + Sync {
    fn publish(&self, event: ServiceEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_data_url() {
        let challenge = Challenge::png(b"hi".to_vec());
        assert_eq!(challenge.to_data_url(), "data:image/png;base64,aGk=");
    }

    #[test]
    fn test_only_ready_is_ready() {
        assert!(SessionState::Ready.is_ready());
        assert!(!SessionState::Authenticated.is_ready());
        assert!(!SessionState::Disconnected.is_ready());
    }
}
