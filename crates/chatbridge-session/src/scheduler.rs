//! Durable scheduled-message queue with polling delivery.
//!
//! Delivery is at-least-once: a failed send records `lastError` and the
//! entry is retried on every following tick, without backoff or cap.

use std::sync::Arc;

use chatbridge_core::{
    Broadcast, MessageOrigin, PersistedDocument, ScheduledMessage, SentMessageRecord, ServiceEvent,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    manager::{SessionError, SessionManager, require},
    storage::Journal,
};

/// Counts from one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Result of a delivery tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is not ready; nothing was loaded or sent.
    NotReady,
    /// Another tick is still running.
    Busy,
    Completed(TickReport),
}

enum Attempt {
    Delivered(SentMessageRecord),
    Failed(String),
}

/// Scans the persisted queue and delivers due entries one at a time.
#[derive(Clone)]
pub struct DeliveryEngine {
    session: SessionManager,
    journal: Arc<Journal>,
    broadcast: Arc<dyn Broadcast>,
    running: Arc<Mutex<()>>,
}

impl DeliveryEngine {
    /// Create an engine sharing the session's journal and broadcast.
    #[must_use]
    pub fn new(session: SessionManager) -> Self {
        let journal = Arc::clone(session.journal());
        let broadcast = Arc::clone(session.broadcast());
        Self {
            session,
            journal,
            broadcast,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Queue a message for delivery at `send_at`.
    ///
    /// # Errors
    /// Returns error on blank input or if the queue cannot be persisted.
    pub async fn schedule(
        &self,
        conversation_id: &str,
        content: &str,
        send_at: DateTime<Utc>,
    ) -> Result<ScheduledMessage, SessionError> {
        require("conversationId", conversation_id)?;
        require("content", content)?;
        self.session.touch();

        let entry = ScheduledMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            send_at_timestamp: send_at,
            sent: false,
            sent_at_timestamp: None,
            last_error: None,
        };

        let queued = entry.clone();
        self.journal
            .update(move |doc| doc.scheduled_messages.push(queued))
            .await?;

        tracing::info!(scheduled_id = %entry.id, conversation_id, %send_at, "Message scheduled");
        Ok(entry)
    }

    /// Every queued entry, sent ones included, in insertion order.
    pub async fn scheduled(&self) -> Vec<ScheduledMessage> {
        self.session.touch();
        self.journal.snapshot().await.scheduled_messages
    }

    /// Deliver everything due now.
    ///
    /// # Errors
    /// Returns error if the outcomes cannot be persisted.
    pub async fn tick(&self) -> Result<TickOutcome, SessionError> {
        self.tick_at(Utc::now()).await
    }

    /// Deliver everything due at `now`.
    ///
    /// # Errors
    /// Returns error if the outcomes cannot be persisted. Messages sent
    /// during this tick will then be sent again on the next one.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome, SessionError> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!("Delivery tick already running");
            return Ok(TickOutcome::Busy);
        };
        if !self.session.is_ready() {
            return Ok(TickOutcome::NotReady);
        }

        let due: Vec<ScheduledMessage> = self
            .journal
            .snapshot()
            .await
            .scheduled_messages
            .into_iter()
            .filter(|entry| entry.is_due(now))
            .collect();
        if due.is_empty() {
            return Ok(TickOutcome::Completed(TickReport::default()));
        }

        let mut attempts = Vec::with_capacity(due.len());
        for entry in &due {
            match self
                .session
                .deliver(&entry.conversation_id, &entry.content)
                .await
            {
                Ok(receipt) => {
                    tracing::info!(scheduled_id = %entry.id, "Scheduled message delivered");
                    self.broadcast.publish(ServiceEvent::NewMessage {
                        conversation_id: entry.conversation_id.clone(),
                        content: entry.content.clone(),
                        from_me: true,
                        sender: "me".to_string(),
                        origin: MessageOrigin::Scheduled,
                        timestamp: receipt.timestamp,
                    });
                    let record = SentMessageRecord::outbound(
                        receipt.id,
                        entry.conversation_id.clone(),
                        entry.content.clone(),
                        receipt.timestamp,
                    );
                    attempts.push((entry.id.clone(), Attempt::Delivered(record)));
                }
                Err(SessionError::NotReady) => {
                    tracing::warn!("Session lost readiness mid-tick, deferring remaining entries");
                    break;
                }
                Err(e) => {
                    tracing::warn!(scheduled_id = %entry.id, "Scheduled delivery failed: {e}");
                    attempts.push((entry.id.clone(), Attempt::Failed(e.to_string())));
                }
            }
        }

        let report = self
            .journal
            .update(move |doc| apply_attempts(doc, attempts))
            .await
            .inspect_err(|e| tracing::error!("Failed to persist delivery outcomes: {e}"))?;

        Ok(TickOutcome::Completed(report))
    }
}

fn apply_attempts(
    doc: &mut PersistedDocument,
    attempts: Vec<(String, Attempt)>,
) -> TickReport {
    let mut report = TickReport {
        attempted: attempts.len(),
        ..TickReport::default()
    };

    for (id, attempt) in attempts {
        let Some(entry) = doc
            .scheduled_messages
            .iter_mut()
            .find(|entry| entry.id == id && !entry.sent)
        else {
            tracing::warn!(scheduled_id = %id, "Scheduled entry vanished or already sent");
            continue;
        };
        match attempt {
            Attempt::Delivered(record) => {
                entry.sent = true;
                entry.sent_at_timestamp = Some(record.sent_at_timestamp);
                doc.messages.push(record);
                report.delivered += 1;
            }
            Attempt::Failed(error) => {
                entry.last_error = Some(error);
                report.failed += 1;
            }
        }
    }

    report
}
