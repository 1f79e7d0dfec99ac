//! REST and SSE surface.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use chatbridge_core::{EventHub, ScheduledMessage, SentMessageRecord, SessionState};
use chatbridge_session::{
    ConversationSummary, DeliveryEngine, SessionError, SessionManager, SessionStatus,
};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::protocol::SendAt;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionManager,
    pub engine: DeliveryEngine,
    pub hub: Arc<EventHub>,
}

impl AppState {
    #[must_use]
    pub fn new(session: SessionManager, engine: DeliveryEngine, hub: Arc<EventHub>) -> Self {
        Self {
            session,
            engine,
            hub,
        }
    }

    /// Count a client call as activity and make sure the session is coming up.
    ///
    /// A failed session is left alone; only `POST /api/restart` revives it.
    pub fn kick(&self) {
        self.session.touch();
        if self.session.state() == SessionState::Failed {
            return;
        }
        let session = self.session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.ensure_started().await {
                tracing::warn!("Background start failed: {e}");
            }
        });
    }
}

/// Error returned by API handlers.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] SessionError);

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            SessionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SessionError::NotReady | SessionError::RestartRequired => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SessionError::Provider(_) | SessionError::Start(_) => StatusCode::BAD_GATEWAY,
            SessionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(%status, "Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Body of `POST /api/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub content: String,
}

/// Body of `POST /api/scheduled`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub content: String,
    pub send_at: Option<SendAt>,
}

#[derive(Serialize)]
struct ChallengeBody {
    challenge: Option<String>,
    ready: bool,
}

/// Build the API router.
#[must_use]
pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/status", get(status))
        .route("/api/restart", axum::routing::post(restart))
        .route("/api/challenge", get(challenge))
        .route("/api/conversations", get(conversations))
        .route("/api/messages", axum::routing::post(send_message))
        .route("/api/scheduled", get(list_scheduled).post(schedule_message))
        .route("/api/events", get(events));

    #[cfg(feature = "websocket")]
    let router = router.route("/ws", get(crate::websocket::ws_handler));

    router.with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<SessionStatus> {
    state.kick();
    Json(state.session.status())
}

async fn restart(State(state): State<AppState>) -> Result<Json<SessionStatus>, ApiError> {
    state.session.touch();
    state.session.restart().await?;
    Ok(Json(state.session.status()))
}

async fn challenge(State(state): State<AppState>) -> Json<ChallengeBody> {
    state.kick();
    Json(ChallengeBody {
        challenge: state.session.current_challenge(),
        ready: state.session.is_ready(),
    })
}

async fn conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    state.kick();
    let snapshot = state.session.conversations()?;
    Ok(Json(snapshot.to_vec()))
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SentMessageRecord>, ApiError> {
    state.kick();
    let record = state
        .session
        .send_message(&req.conversation_id, &req.content)
        .await?;
    Ok(Json(record))
}

async fn list_scheduled(State(state): State<AppState>) -> Json<Vec<ScheduledMessage>> {
    state.kick();
    Json(state.engine.scheduled().await)
}

async fn schedule_message(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduledMessage>), ApiError> {
    state.kick();
    let send_at = req
        .send_at
        .ok_or_else(|| SessionError::InvalidInput("sendAt is required".into()))?
        .resolve()
        .map_err(SessionError::InvalidInput)?;
    let entry = state
        .engine
        .schedule(&req.conversation_id, &req.content, send_at)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.kick();
    Sse::new(state.hub.sse_stream()).keep_alive(KeepAlive::default())
}
