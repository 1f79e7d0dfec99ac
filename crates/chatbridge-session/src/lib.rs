//! Session orchestration for the chat bridge.
//!
//! Provides:
//! - `SessionManager` - Lifecycle of the single external session
//! - `ConversationCache` - Bounded, activity-gated conversation listing
//! - `DeliveryEngine` - Durable scheduled-message queue
//! - `BackgroundTasks` - Refresh and delivery timers
//! - Storage implementations (JSON file, memory) and a loopback provider

pub mod cache;
pub mod manager;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod tasks;

pub use cache::{ConversationCache, ConversationSummary};
pub use manager::{RefreshOutcome, SessionError, SessionManager, SessionStatus};
pub use scheduler::{DeliveryEngine, TickOutcome, TickReport};
pub use storage::{JsonFileStore, Journal};
pub use tasks::BackgroundTasks;
