#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use chatbridge_core::{EventHub, ProviderConversation, ServiceEvent, TimerConfig};
use chatbridge_session::{
    DeliveryEngine, Journal, SessionManager, provider::LoopbackProvider, storage::MemoryStore,
};

pub const RECONNECT_MS: u64 = 50;

pub struct Harness {
    pub provider: LoopbackProvider,
    pub hub: Arc<EventHub>,
    pub store: Arc<MemoryStore>,
    pub session: SessionManager,
    pub engine: DeliveryEngine,
}

pub fn harness(provider: LoopbackProvider) -> Harness {
    let hub = Arc::new(EventHub::new());
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(Journal::new(store.clone()));
    let timers = TimerConfig {
        reconnect_delay_ms: RECONNECT_MS,
        ..TimerConfig::default()
    };
    let session = SessionManager::new(
        Arc::new(provider.clone()),
        hub.clone(),
        journal,
        timers,
        100,
    );
    let engine = DeliveryEngine::new(session.clone());

    Harness {
        provider,
        hub,
        store,
        session,
        engine,
    }
}

/// Harness whose session is already ready.
pub async fn ready_harness() -> Harness {
    let h = harness(LoopbackProvider::new());
    h.session.ensure_started().await.unwrap();
    wait_for(|| h.session.is_ready()).await;
    h
}

pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

pub fn conversation(id: &str) -> ProviderConversation {
    ProviderConversation {
        id: id.to_string(),
        name: Some(format!("Chat {id}")),
        is_group: false,
        is_broadcast: false,
        is_status: false,
        unread_count: 0,
    }
}

pub fn events_named(hub: &EventHub, name: &str) -> Vec<ServiceEvent> {
    hub.history()
        .into_iter()
        .filter(|event| event.name() == name)
        .collect()
}
