//! In-process session provider.
//!
//! Useful for development and tests. Plays a scripted sequence of
//! lifecycle events on connect and records every send.

use std::{
    collections::HashSet,
    sync::{
        Arc, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chatbridge_core::{
    EventSink, ProviderConversation, ProviderError, ProviderEvent, ProviderMessage,
    ProviderSession, SessionProvider,
};
use chrono::Utc;

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    live_handles: AtomicUsize,
    next_message: AtomicU64,
    connect_delay: std::sync::Mutex<Duration>,
    connect_error: std::sync::Mutex<Option<ProviderError>>,
    script: std::sync::Mutex<Vec<ProviderEvent>>,
    conversations: std::sync::Mutex<Vec<ProviderConversation>>,
    failing: std::sync::Mutex<HashSet<String>>,
    sent: std::sync::Mutex<Vec<(String, String)>>,
    /// Event sink of the most recent handle, tagged with its connect number.
    sink: std::sync::Mutex<Option<(usize, EventSink)>>,
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loopback provider. Clones share state, so a test can keep one clone
/// for inspection while the manager owns another.
#[derive(Clone)]
pub struct LoopbackProvider {
    shared: Arc<Shared>,
}

impl LoopbackProvider {
    /// Provider that authenticates and becomes ready on every connect.
    #[must_use]
    pub fn new() -> Self {
        Self::with_script(vec![ProviderEvent::Authenticated, ProviderEvent::Ready])
    }

    /// Provider that emits `script` on every connect.
    #[must_use]
    pub fn with_script(script: Vec<ProviderEvent>) -> Self {
        let shared = Shared::default();
        *lock(&shared.script) = script;
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Delay each connect by `delay`.
    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *lock(&self.shared.connect_delay) = delay;
        self
    }

    /// Make connects fail with `error` (or succeed again with `None`).
    pub fn set_connect_error(&self, error: Option<ProviderError>) {
        *lock(&self.shared.connect_error) = error;
    }

    /// Replace the conversation listing.
    pub fn set_conversations(&self, conversations: Vec<ProviderConversation>) {
        *lock(&self.shared.conversations) = conversations;
    }

    /// Make sends to `conversation_id` fail (or succeed again).
    pub fn set_failing(&self, conversation_id: &str, failing: bool) {
        let mut set = lock(&self.shared.failing);
        if failing {
            set.insert(conversation_id.to_string());
        } else {
            set.remove(conversation_id);
        }
    }

    /// Inject an event into the live handle's stream.
    ///
    /// Returns false if no handle is listening.
    pub fn emit(&self, event: ProviderEvent) -> bool {
        lock(&self.shared.sink)
            .as_ref()
            .is_some_and(|(_, sink)| sink.send(event).is_ok())
    }

    /// Number of handles ever created.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of handles created and not yet destroyed.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::SeqCst)
    }

    /// Every successful send as `(conversation_id, content)`.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.shared.sent).clone()
    }
}

impl Default for LoopbackProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for LoopbackProvider {
    async fn connect(&self, events: EventSink) -> Result<Arc<dyn ProviderSession>, ProviderError> {
        let number = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *lock(&self.shared.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = lock(&self.shared.connect_error).clone() {
            return Err(error);
        }

        for event in lock(&self.shared.script).iter().cloned() {
            let _ = events.send(event);
        }
        *lock(&self.shared.sink) = Some((number, events));
        self.shared.live_handles.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(LoopbackSession {
            shared: Arc::clone(&self.shared),
            number,
            alive: AtomicBool::new(true),
        }))
    }
}

struct LoopbackSession {
    shared: Arc<Shared>,
    number: usize,
    alive: AtomicBool,
}

impl LoopbackSession {
    fn check_alive(&self) -> Result<(), ProviderError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Closed)
        }
    }
}

#[async_trait]
impl ProviderSession for LoopbackSession {
    async fn conversations(&self) -> Result<Vec<ProviderConversation>, ProviderError> {
        self.check_alive()?;
        Ok(lock(&self.shared.conversations).clone())
    }

    async fn send(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ProviderMessage, ProviderError> {
        self.check_alive()?;
        if lock(&self.shared.failing).contains(conversation_id) {
            return Err(ProviderError::Transient(format!(
                "delivery to {conversation_id} failed"
            )));
        }

        lock(&self.shared.sent).push((conversation_id.to_string(), content.to_string()));
        let n = self.shared.next_message.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderMessage {
            id: format!("loopback-{n}"),
            timestamp: Utc::now(),
        })
    }

    async fn destroy(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.shared.live_handles.fetch_sub(1, Ordering::SeqCst);
            let mut sink = lock(&self.shared.sink);
            if sink.as_ref().is_some_and(|(number, _)| *number == self.number) {
                sink.take();
            }
        }
    }
}
