//! Chat bridge server backed by the loopback provider.
//!
//! Run with: cargo run -p chatbridge-server [config.toml]
//!
//! Then open http://localhost:3000 in your browser.

use std::{path::Path, sync::Arc};

use anyhow::Context;
use axum::{response::Html, routing::get};
use chatbridge_core::{BridgeConfig, EventHub, ProviderConversation, load_config};
use chatbridge_session::{
    BackgroundTasks, DeliveryEngine, Journal, JsonFileStore, SessionManager,
    provider::LoopbackProvider,
};
use chatbridge_transport::AppState;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => BridgeConfig::from_env()?,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_filter))
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = JsonFileStore::open(&config.data_file)
        .await
        .with_context(|| format!("Failed to open store at {}", config.data_file.display()))?;
    tracing::info!(path = %store.path().display(), "Document store ready");

    let provider = LoopbackProvider::new();
    provider.set_conversations(sample_conversations());

    let hub = Arc::new(EventHub::new());
    let session = SessionManager::new(
        Arc::new(provider),
        hub.clone(),
        Arc::new(Journal::new(Arc::new(store))),
        config.timers,
        config.conversation_limit,
    );
    let engine = DeliveryEngine::new(session.clone());
    let tasks = BackgroundTasks::spawn(&session, &engine);

    let app = chatbridge_transport::router(AppState::new(session.clone(), engine, hub))
        .route("/", get(index_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!("Server listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.shutdown();
    session.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

fn sample_conversations() -> Vec<ProviderConversation> {
    [("family", "Family", true), ("alice", "Alice", false), ("bob", "Bob", false)]
        .into_iter()
        .map(|(id, name, is_group)| ProviderConversation {
            id: id.to_string(),
            name: Some(name.to_string()),
            is_group,
            is_broadcast: false,
            is_status: false,
            unread_count: 0,
        })
        .collect()
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Chat Bridge</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .ready { color: #4a4; }
        #log { font-family: Menlo, Monaco, monospace; font-size: 13px; white-space: pre-wrap; }
        img { max-width: 240px; background: #fff; }
    </style>
</head>
<body>
    <h1>Chat Bridge</h1>
    <div class="status" id="status">Connecting...</div>
    <img id="challenge" hidden />
    <form id="send">
        <select id="conversation"></select>
        <input id="content" placeholder="Message" />
        <input id="sendAt" type="datetime-local" />
        <button type="submit">Send</button>
    </form>
    <div id="log"></div>

    <script>
        const status = document.getElementById('status');
        const log = document.getElementById('log');
        const challenge = document.getElementById('challenge');
        const select = document.getElementById('conversation');

        async function loadConversations() {
            const resp = await fetch('/api/conversations');
            if (!resp.ok) return;
            select.innerHTML = '';
            for (const c of await resp.json()) {
                select.add(new Option(c.displayName, c.id));
            }
        }

        const events = new EventSource('/api/events');
        events.addEventListener('status', (e) => {
            status.textContent = JSON.parse(e.data).message;
        });
        events.addEventListener('challenge-issued', (e) => {
            challenge.src = JSON.parse(e.data).image;
            challenge.hidden = false;
        });
        events.addEventListener('ready', (e) => {
            status.textContent = JSON.parse(e.data).message;
            status.className = 'status ready';
            challenge.hidden = true;
            setTimeout(loadConversations, 500);
        });
        events.addEventListener('new-message', (e) => {
            const m = JSON.parse(e.data);
            log.textContent += `[${m.type}] ${m.sender} -> ${m.conversationId}: ${m.content}\n`;
        });

        document.getElementById('send').addEventListener('submit', async (e) => {
            e.preventDefault();
            const body = {
                conversationId: select.value,
                content: document.getElementById('content').value,
            };
            const sendAt = document.getElementById('sendAt').value;
            const url = sendAt ? '/api/scheduled' : '/api/messages';
            if (sendAt) body.sendAt = new Date(sendAt).getTime();
            const resp = await fetch(url, {
                method: 'POST',
                headers: { 'content-type': 'application/json' },
                body: JSON.stringify(body),
            });
            if (!resp.ok) {
                log.textContent += `[error] ${(await resp.json()).error}\n`;
            }
        });
    </script>
</body>
</html>
"#;
