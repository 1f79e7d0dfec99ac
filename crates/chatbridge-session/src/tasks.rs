//! Background timers: conversation refresh and scheduled delivery.

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{manager::SessionManager, scheduler::DeliveryEngine};

/// Handles to the periodic tasks. Aborted on drop.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn the refresh and delivery loops using the session's timer config.
    ///
    /// Each loop awaits its own work before the next tick, so invocations
    /// never overlap.
    #[must_use]
    pub fn spawn(session: &SessionManager, engine: &DeliveryEngine) -> Self {
        let timers = *session.timers();
        let refresh = tokio::spawn(refresh_loop(
            session.clone(),
            timers.conversation_refresh(),
            timers.activity_window(),
        ));
        let delivery = tokio::spawn(delivery_loop(engine.clone(), timers.delivery_tick()));

        Self {
            handles: vec![refresh, delivery],
        }
    }

    /// Stop all loops.
    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Floor for timer periods; `interval_at` panics on zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

fn interval_after(period: Duration) -> time::Interval {
    let period = period.max(MIN_PERIOD);
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn refresh_loop(session: SessionManager, period: Duration, activity_window: Duration) {
    let mut interval = interval_after(period);
    loop {
        interval.tick().await;
        if !session.cache().active_within(activity_window) {
            tracing::debug!("No recent client activity, skipping conversation refresh");
            continue;
        }
        if let Err(e) = session.refresh_conversations().await {
            tracing::warn!("Conversation refresh failed: {e}");
        }
    }
}

async fn delivery_loop(engine: DeliveryEngine, period: Duration) {
    let mut interval = interval_after(period);
    loop {
        interval.tick().await;
        match engine.tick().await {
            Ok(outcome) => tracing::trace!(?outcome, "Delivery tick"),
            Err(e) => tracing::error!("Delivery tick failed: {e}"),
        }
    }
}

#[cfg(all(test, feature = "memory", feature = "loopback"))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        provider::LoopbackProvider,
        storage::{Journal, MemoryStore},
    };
    use chatbridge_core::{EventHub, ProviderConversation, TimerConfig};
    use chrono::Utc;

    fn session(provider: &LoopbackProvider, timers: TimerConfig) -> SessionManager {
        SessionManager::new(
            Arc::new(provider.clone()),
            Arc::new(EventHub::new()),
            Arc::new(Journal::new(Arc::new(MemoryStore::new()))),
            timers,
            100,
        )
    }

    async fn until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_delivery_loop_sends_due_messages() {
        let provider = LoopbackProvider::new();
        let session = session(
            &provider,
            TimerConfig {
                delivery_tick_ms: 10,
                ..TimerConfig::default()
            },
        );
        let engine = DeliveryEngine::new(session.clone());
        session.ensure_started().await.unwrap();
        assert!(until(|| session.is_ready()).await);

        engine.schedule("c1", "tick tock", Utc::now()).await.unwrap();
        let tasks = BackgroundTasks::spawn(&session, &engine);

        assert!(until(|| provider.sent().len() == 1).await);
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_zero_periods_are_clamped() {
        let provider = LoopbackProvider::new();
        let session = session(
            &provider,
            TimerConfig {
                delivery_tick_ms: 0,
                conversation_refresh_ms: 0,
                ..TimerConfig::default()
            },
        );
        let engine = DeliveryEngine::new(session.clone());
        session.ensure_started().await.unwrap();
        assert!(until(|| session.is_ready()).await);

        let tasks = BackgroundTasks::spawn(&session, &engine);
        time::sleep(Duration::from_millis(20)).await;
        assert!(tasks.handles.iter().all(|handle| !handle.is_finished()));

        engine.schedule("c1", "still running", Utc::now()).await.unwrap();
        assert!(until(|| provider.sent().len() == 1).await);
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_refresh_loop_requires_activity() {
        let provider = LoopbackProvider::new();
        let session = session(
            &provider,
            TimerConfig {
                conversation_refresh_ms: 10,
                activity_window_ms: 30,
                ..TimerConfig::default()
            },
        );
        let engine = DeliveryEngine::new(session.clone());
        session.ensure_started().await.unwrap();
        assert!(until(|| session.cache().get().is_some()).await);

        // Let the activity window lapse before the listing changes
        time::sleep(Duration::from_millis(60)).await;
        provider.set_conversations(vec![ProviderConversation {
            id: "c1".into(),
            name: None,
            is_group: false,
            is_broadcast: false,
            is_status: false,
            unread_count: 0,
        }]);
        let tasks = BackgroundTasks::spawn(&session, &engine);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.cache().get().map(|c| c.len()), Some(0));

        session.touch();
        assert!(until(|| session.cache().get().is_some_and(|c| c.len() == 1)).await);
        drop(tasks);
    }
}
