//! Bounded, activity-gated cache of conversation summaries.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use chatbridge_core::ProviderConversation;
use serde::Serialize;

/// Default number of conversations kept.
pub const DEFAULT_CONVERSATION_LIMIT: usize = 100;

/// Client-facing summary of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub display_name: String,
    pub is_group: bool,
    pub unread_count: u32,
}

impl From<ProviderConversation> for ConversationSummary {
    fn from(conversation: ProviderConversation) -> Self {
        let display_name = conversation
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| conversation.id.clone());
        Self {
            id: conversation.id,
            display_name,
            is_group: conversation.is_group,
            unread_count: conversation.unread_count,
        }
    }
}

/// Drop pseudo-conversations and keep the first `limit` in provider order.
#[must_use]
pub fn summarize(conversations: Vec<ProviderConversation>, limit: usize) -> Vec<ConversationSummary> {
    conversations
        .into_iter()
        .filter(|c| !c.is_broadcast && !c.is_status)
        .take(limit)
        .map(ConversationSummary::from)
        .collect()
}

/// Snapshot shared with readers.
pub type Snapshot = Arc<[ConversationSummary]>;

/// In-memory conversation cache.
///
/// Holds no snapshot until the session first becomes ready. After that,
/// each refresh swaps in a whole new snapshot; readers keep whatever
/// snapshot they already hold.
pub struct ConversationCache {
    snapshot: RwLock<Option<Snapshot>>,
    last_activity: RwLock<Instant>,
    limit: usize,
}

impl ConversationCache {
    /// Create an empty cache keeping at most `limit` entries.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            snapshot: RwLock::new(None),
            last_activity: RwLock::new(Instant::now()),
            limit,
        }
    }

    /// Current snapshot, or `None` if the session never reached ready.
    #[must_use]
    pub fn get(&self) -> Option<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install an empty snapshot if none exists yet.
    pub(crate) fn mark_available(&self) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if snapshot.is_none() {
            *snapshot = Some(Arc::from(Vec::new()));
        }
    }

    /// Replace the snapshot with the filtered, truncated provider list.
    ///
    /// Returns the number of cached entries.
    pub(crate) fn replace(&self, conversations: Vec<ProviderConversation>) -> usize {
        let fresh: Snapshot = summarize(conversations, self.limit).into();
        let len = fresh.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(fresh);
        len
    }

    /// Record client activity.
    pub fn touch(&self) {
        *self.last_activity.write().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Whether any client activity happened within `window`.
    #[must_use]
    pub fn active_within(&self, window: Duration) -> bool {
        self.last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            <= window
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERSATION_LIMIT)
    }
}
