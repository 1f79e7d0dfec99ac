//! Core types and collaborator traits for the chat session bridge.
//!
//! This crate provides the fundamental building blocks:
//! - `PersistedDocument` - The durable message log and scheduled queue
//! - `ServiceEvent` - Typed events published to observers
//! - `EventHub` - Broadcast + history for late-joining observers
//! - `BridgeConfig` - File-backed service configuration
//! - Provider, store and broadcast traits

pub mod config;
pub mod document;
pub mod event;
pub mod hub;
pub mod traits;

pub use config::{BridgeConfig, ConfigError, TimerConfig, load_config};
pub use document::{Direction, MessageStatus, PersistedDocument, ScheduledMessage, SentMessageRecord};
pub use event::{MessageOrigin, ServiceEvent, StatusKind};
pub use hub::EventHub;
pub use traits::{
    Broadcast, Challenge, DocumentStore, EventSink, IncomingMessage, ProviderConversation,
    ProviderError, ProviderEvent, ProviderMessage, ProviderSession, SessionProvider, SessionState,
    StoreError,
};
