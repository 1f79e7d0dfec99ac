//! Broadcast + history event hub for late-joining observers.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Broadcast, ServiceEvent};

/// Default history size limit (1 MB).
const HISTORY_BYTES: usize = 1024 * 1024;

/// Capacity of the live channel before slow observers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
struct StoredEvent {
    event: ServiceEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
}

/// Event hub with broadcast and bounded history.
///
/// New observers receive the history first, then live events. Publishing
/// never blocks and never fails; observers that fall behind miss events.
pub struct EventHub {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<ServiceEvent>,
    history_bytes: usize,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create a new hub.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(HISTORY_BYTES)
    }

    /// Create a hub whose replay history is capped at `history_bytes`.
    #[must_use]
    pub fn with_history_limit(history_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
            history_bytes,
        }
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<ServiceEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ServiceEvent> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!("Observer lagged: {e}");
                    None
                }
            }
        });

        Box::pin(hist.chain(live))
    }

    /// SSE stream (requires `sse` feature).
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn sse_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<axum::response::sse::Event, std::convert::Infallible>>
    {
        self.history_plus_stream()
            .map(|event| Ok(event.to_sse_event()))
            .boxed()
    }
}

impl Broadcast for EventHub {
    fn publish(&self, event: ServiceEvent) {
        tracing::debug!(event = event.name(), "Publishing event");
        let _ = self.sender.send(event.clone()); // live listeners
        let bytes = event.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > self.history_bytes {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent { event, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }
}
