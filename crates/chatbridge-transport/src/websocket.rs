//! WebSocket transport for live clients.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{
    api::AppState,
    protocol::{ClientMessage, ServerMessage},
};

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    state.kick();
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Replay history, then follow live events
    let events_tx = tx.clone();
    let mut events = state.hub.history_plus_stream();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if events_tx.send(ServerMessage::from(&event)).is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => dispatch(&state, client_msg).await,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                }
            }
        };
        if tx.send(reply).is_err() {
            break;
        }
    }

    event_task.abort();
    send_task.abort();
    tracing::debug!("WebSocket client disconnected");
}

/// Execute one client command and build the reply.
pub async fn dispatch(state: &AppState, msg: ClientMessage) -> ServerMessage {
    if !matches!(msg, ClientMessage::Ping) {
        state.kick();
    }

    let result = match msg {
        ClientMessage::Ping => return ServerMessage::Pong,
        ClientMessage::ListConversations => state
            .session
            .conversations()
            .map(|snapshot| ServerMessage::Conversations {
                conversations: snapshot.to_vec(),
            }),
        ClientMessage::SendMessage {
            conversation_id,
            content,
        } => state
            .session
            .send_message(&conversation_id, &content)
            .await
            .map(|message| ServerMessage::MessageSent { message }),
        ClientMessage::ScheduleMessage {
            conversation_id,
            content,
            send_at,
        } => match send_at.resolve() {
            Ok(send_at) => state
                .engine
                .schedule(&conversation_id, &content, send_at)
                .await
                .map(|scheduled| ServerMessage::MessageScheduled { scheduled }),
            Err(message) => return ServerMessage::Error { message },
        },
    };

    result.unwrap_or_else(|e| ServerMessage::Error {
        message: e.to_string(),
    })
}
