//! Session lifecycle manager for the single external session.

use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicU64, Ordering},
};

use chatbridge_core::{
    Broadcast, MessageOrigin, ProviderError, ProviderEvent, ProviderMessage, ProviderSession,
    SentMessageRecord, ServiceEvent, SessionProvider, SessionState, StatusKind, StoreError,
    TimerConfig,
    document::{Direction, MessageStatus},
};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use serde::Serialize;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};

use crate::{
    cache::{ConversationCache, Snapshot},
    storage::Journal,
};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session is not ready")]
    NotReady,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Session start failed: {0}")]
    Start(ProviderError),
    #[error("Session failed; an explicit restart is required")]
    RestartRequired,
}

/// Reject blank required fields.
pub(crate) fn require(field: &str, value: &str) -> Result<(), SessionError> {
    if value.trim().is_empty() {
        return Err(SessionError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

/// Result of a conversation refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The session is not ready; the cache was left untouched.
    NotReady,
    /// The cache was replaced with this many entries.
    Refreshed(usize),
}

/// Client-facing view of the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub ready: bool,
    pub challenge: Option<String>,
}

type StartAttempt = Shared<BoxFuture<'static, Result<(), ProviderError>>>;

struct Lifecycle {
    state: SessionState,
    challenge: Option<String>,
    handle: Option<Arc<dyn ProviderSession>>,
}

struct Inner {
    provider: Arc<dyn SessionProvider>,
    broadcast: Arc<dyn Broadcast>,
    journal: Arc<Journal>,
    cache: ConversationCache,
    timers: TimerConfig,
    lifecycle: RwLock<Lifecycle>,
    /// Serializes every protocol operation on the handle.
    ops: Mutex<()>,
    starting: Mutex<Option<StartAttempt>>,
    reconnect: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Bumped whenever a handle is created or retired; stale events are dropped.
    generation: AtomicU64,
}

/// Owns the external session handle and drives its lifecycle.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a new session manager. Nothing is started until
    /// [`ensure_started`](Self::ensure_started) is called.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        broadcast: Arc<dyn Broadcast>,
        journal: Arc<Journal>,
        timers: TimerConfig,
        conversation_limit: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                broadcast,
                journal,
                cache: ConversationCache::new(conversation_limit),
                timers,
                lifecycle: RwLock::new(Lifecycle {
                    state: SessionState::Uninitialized,
                    challenge: None,
                    handle: None,
                }),
                ops: Mutex::new(()),
                starting: Mutex::new(None),
                reconnect: std::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lifecycle().state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Outstanding pairing challenge as a `data:` URL.
    #[must_use]
    pub fn current_challenge(&self) -> Option<String> {
        self.lifecycle().challenge.clone()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let lifecycle = self.lifecycle();
        SessionStatus {
            state: lifecycle.state,
            ready: lifecycle.state.is_ready(),
            challenge: lifecycle.challenge.clone(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ConversationCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn journal(&self) -> &Arc<Journal> {
        &self.inner.journal
    }

    #[must_use]
    pub fn broadcast(&self) -> &Arc<dyn Broadcast> {
        &self.inner.broadcast
    }

    #[must_use]
    pub fn timers(&self) -> &TimerConfig {
        &self.inner.timers
    }

    /// Record client activity, keeping the conversation refresh timer alive.
    pub fn touch(&self) {
        self.inner.cache.touch();
    }

    /// Start the session unless a handle exists or a start is in flight.
    ///
    /// Concurrent callers share one attempt, so at most one handle is
    /// ever created. Resolves once the handle exists, not once it is ready.
    /// A failed session stays failed until [`restart`](Self::restart).
    ///
    /// # Errors
    /// Returns error if the session has failed or the provider fails to
    /// create a handle.
    pub async fn ensure_started(&self) -> Result<(), SessionError> {
        let attempt = {
            let mut starting = self.inner.starting.lock().await;
            {
                let lifecycle = self.lifecycle();
                if lifecycle.handle.is_some() {
                    return Ok(());
                }
                if lifecycle.state == SessionState::Failed {
                    return Err(SessionError::RestartRequired);
                }
            }
            if let Some(attempt) = starting.as_ref() {
                attempt.clone()
            } else {
                self.cancel_reconnect();
                let manager = self.clone();
                let attempt = async move { manager.start().await }.boxed().shared();
                *starting = Some(attempt.clone());
                attempt
            }
        };

        attempt.await.map_err(SessionError::Start)
    }

    /// Leave the failed state and start again.
    ///
    /// # Errors
    /// Returns error if the provider fails to create a handle.
    pub async fn restart(&self) -> Result<(), SessionError> {
        {
            let mut lifecycle = self.lifecycle_mut();
            if lifecycle.state == SessionState::Failed {
                tracing::info!("Restarting failed session");
                lifecycle.state = SessionState::Uninitialized;
            }
        }
        self.ensure_started().await
    }

    async fn start(self) -> Result<(), ProviderError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.transition(SessionState::Starting);
        self.inner
            .broadcast
            .publish(ServiceEvent::status("Starting session", StatusKind::Info));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = self.inner.provider.connect(events_tx).await;

        let result = if self.inner.generation.load(Ordering::SeqCst) == generation {
            match connected {
                Ok(session) => {
                    self.lifecycle_mut().handle = Some(session);
                    // Events buffer in the channel until the handle is installed.
                    tokio::spawn(self.clone().dispatch(generation, events_rx));
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Failed to start session: {e}");
                    self.transition(SessionState::Disconnected);
                    self.inner.broadcast.publish(ServiceEvent::status(
                        format!("Failed to start session: {e}"),
                        StatusKind::Error,
                    ));
                    self.schedule_reconnect();
                    Err(e)
                }
            }
        } else {
            tracing::debug!(generation, "Session retired while connecting");
            if let Ok(session) = connected {
                session.destroy().await;
            }
            Err(ProviderError::Closed)
        };

        *self.inner.starting.lock().await = None;
        result
    }

    async fn dispatch(self, generation: u64, mut events: mpsc::UnboundedReceiver<ProviderEvent>) {
        while let Some(event) = events.recv().await {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(generation, "Dropping events from retired session");
                break;
            }
            self.handle_event(event).await;
        }
    }

    /// Single dispatch point for provider events.
    async fn handle_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::ChallengeIssued(challenge) => {
                let image = challenge.to_data_url();
                {
                    let mut lifecycle = self.lifecycle_mut();
                    if !matches!(
                        lifecycle.state,
                        SessionState::Starting | SessionState::AwaitingChallenge
                    ) {
                        tracing::warn!(state = ?lifecycle.state, "Ignoring challenge outside pairing");
                        return;
                    }
                    lifecycle.state = SessionState::AwaitingChallenge;
                    lifecycle.challenge = Some(image.clone());
                }
                tracing::info!("Pairing challenge issued");
                self.inner
                    .broadcast
                    .publish(ServiceEvent::ChallengeIssued { image });
                self.inner.broadcast.publish(ServiceEvent::status(
                    "Scan the code to link this session",
                    StatusKind::Info,
                ));
            }
            ProviderEvent::Authenticated => {
                {
                    let mut lifecycle = self.lifecycle_mut();
                    if !matches!(
                        lifecycle.state,
                        SessionState::Starting | SessionState::AwaitingChallenge
                    ) {
                        tracing::warn!(state = ?lifecycle.state, "Ignoring late authentication event");
                        return;
                    }
                    lifecycle.state = SessionState::Authenticated;
                }
                tracing::info!("Session authenticated");
                self.inner
                    .broadcast
                    .publish(ServiceEvent::status("Authenticated", StatusKind::Success));
            }
            ProviderEvent::Ready => {
                {
                    let mut lifecycle = self.lifecycle_mut();
                    lifecycle.state = SessionState::Ready;
                    lifecycle.challenge = None;
                }
                tracing::info!("Session ready");
                self.inner.cache.mark_available();
                self.inner.broadcast.publish(ServiceEvent::Ready {
                    message: "Session is ready".to_string(),
                });

                let manager = self.clone();
                tokio::spawn(async move {
                    match manager.refresh_conversations().await {
                        Ok(outcome) => tracing::debug!(?outcome, "Initial conversation refresh"),
                        Err(e) => tracing::warn!("Initial conversation refresh failed: {e}"),
                    }
                });
            }
            ProviderEvent::AuthFailed(reason) => {
                tracing::error!(%reason, "Authentication failed");
                self.cancel_reconnect();
                self.retire(SessionState::Failed);
                self.inner.broadcast.publish(ServiceEvent::status(
                    format!("Authentication failed: {reason}"),
                    StatusKind::Error,
                ));
            }
            ProviderEvent::Disconnected(reason) => {
                tracing::warn!(%reason, "Session disconnected");
                self.retire(SessionState::Disconnected);
                self.inner.broadcast.publish(ServiceEvent::status(
                    "Connection lost, reconnecting...",
                    StatusKind::Warning,
                ));
                self.schedule_reconnect();
            }
            ProviderEvent::Message(message) => {
                if message.from_me {
                    tracing::debug!(id = %message.id, "Ignoring echo of own message");
                    return;
                }

                self.inner.broadcast.publish(ServiceEvent::NewMessage {
                    conversation_id: message.conversation_id.clone(),
                    content: message.content.clone(),
                    from_me: false,
                    sender: message.sender,
                    origin: MessageOrigin::Incoming,
                    timestamp: message.timestamp,
                });

                let record = SentMessageRecord {
                    id: message.id,
                    conversation_id: message.conversation_id,
                    content: message.content,
                    sent_at_timestamp: message.timestamp,
                    direction: Direction::Inbound,
                    status: MessageStatus::Received,
                };
                if let Err(e) = self
                    .inner
                    .journal
                    .update(move |doc| doc.messages.push(record))
                    .await
                {
                    tracing::warn!("Failed to log incoming message: {e}");
                }
            }
        }
    }

    /// Drop the current handle, clear the challenge and move to `next`.
    ///
    /// The retired handle is destroyed in the background.
    fn retire(&self, next: SessionState) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let retired = {
            let mut lifecycle = self.lifecycle_mut();
            let previous = std::mem::replace(&mut lifecycle.state, next);
            lifecycle.challenge = None;
            tracing::info!(from = ?previous, to = ?next, "Session state changed");
            lifecycle.handle.take()
        };

        if let Some(session) = retired {
            tokio::spawn(async move { session.destroy().await });
        }
    }

    fn schedule_reconnect(&self) {
        let delay = self.inner.timers.reconnect_delay();
        let manager = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(manager.reconnect_slot().take());
            tracing::info!("Attempting reconnect");
            if let Err(e) = manager.ensure_started().await {
                tracing::warn!("Reconnect failed: {e}");
            }
        });

        if let Some(previous) = self.reconnect_slot().replace(task) {
            previous.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect_slot().take() {
            tracing::debug!("Cancelling pending reconnect");
            task.abort();
        }
    }

    /// Cancel any pending reconnect and destroy the handle.
    pub async fn shutdown(&self) {
        self.cancel_reconnect();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let retired = {
            let mut lifecycle = self.lifecycle_mut();
            lifecycle.state = SessionState::Uninitialized;
            lifecycle.challenge = None;
            lifecycle.handle.take()
        };
        if let Some(session) = retired {
            tracing::info!("Destroying session");
            session.destroy().await;
        }
    }

    /// Cached conversations. Never queries the provider.
    ///
    /// # Errors
    /// Returns `NotReady` if the session has never been ready.
    pub fn conversations(&self) -> Result<Snapshot, SessionError> {
        self.touch();
        self.inner.cache.get().ok_or(SessionError::NotReady)
    }

    /// Replace the cache with a fresh provider listing.
    ///
    /// # Errors
    /// Returns error if the provider query fails; the cache is untouched.
    pub async fn refresh_conversations(&self) -> Result<RefreshOutcome, SessionError> {
        let conversations = {
            let _op = self.inner.ops.lock().await;
            let Some(session) = self.ready_handle() else {
                return Ok(RefreshOutcome::NotReady);
            };
            session.conversations().await?
        };

        let cached = self.inner.cache.replace(conversations);
        tracing::debug!(cached, "Conversation cache refreshed");
        Ok(RefreshOutcome::Refreshed(cached))
    }

    /// Send a message now and append it to the log.
    ///
    /// # Errors
    /// Returns error on blank input, when not ready, if the provider
    /// rejects the send, or if the log cannot be written.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<SentMessageRecord, SessionError> {
        require("conversationId", conversation_id)?;
        require("content", content)?;
        self.touch();

        let receipt = self.deliver(conversation_id, content).await.inspect_err(|e| {
            tracing::warn!(conversation_id, "Send failed: {e}");
        })?;

        let record = SentMessageRecord::outbound(
            receipt.id,
            conversation_id.to_string(),
            content.to_string(),
            receipt.timestamp,
        );

        // Announce only what made it into the log
        let logged = record.clone();
        self.inner
            .journal
            .update(move |doc| doc.messages.push(logged))
            .await
            .inspect_err(|e| tracing::error!(conversation_id, "Sent message not logged: {e}"))?;

        self.inner.broadcast.publish(ServiceEvent::NewMessage {
            conversation_id: record.conversation_id.clone(),
            content: record.content.clone(),
            from_me: true,
            sender: "me".to_string(),
            origin: MessageOrigin::Direct,
            timestamp: record.sent_at_timestamp,
        });

        Ok(record)
    }

    /// Send through the handle under the operation lock.
    pub(crate) async fn deliver(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ProviderMessage, SessionError> {
        let _op = self.inner.ops.lock().await;
        let session = self.ready_handle().ok_or(SessionError::NotReady)?;
        Ok(session.send(conversation_id, content).await?)
    }

    fn ready_handle(&self) -> Option<Arc<dyn ProviderSession>> {
        let lifecycle = self.lifecycle();
        if lifecycle.state.is_ready() {
            lifecycle.handle.clone()
        } else {
            None
        }
    }

    fn transition(&self, next: SessionState) {
        let previous = std::mem::replace(&mut self.lifecycle_mut().state, next);
        tracing::info!(from = ?previous, to = ?next, "Session state changed");
    }

    fn lifecycle(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle_mut(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reconnect_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
