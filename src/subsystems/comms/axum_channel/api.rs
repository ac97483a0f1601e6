//! Axum handlers for `/api/*` routes.
//!
//! Every handler returns either `{ "success": true, ...payload }` or an
//! [`ApiError`], which renders the matching error envelope. Bodies are
//! read through [`LenientJson`]: an empty or `null` body counts as `{}`.

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Path, Request, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::{SecondsFormat, Utc};
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::AxumState;
use crate::error::ApiError;
use crate::subsystems::gateway::StreamEvent;
use crate::subsystems::sessions::{SettingsPatch, catalog};

// ── Envelope & extractor ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub(super) struct Envelope<T> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

fn ok<T: Serialize>(payload: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, payload })
}

/// JSON body extractor that tolerates a missing body.
pub(super) struct LenientJson<T>(pub T);

impl<S, T> FromRequest<S> for LenientJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?;

        let value = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice::<Value>(&bytes)
                .map_err(|e| ApiError::Validation(format!("Invalid JSON body: {e}")))?
        };
        let value = match value {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        serde_json::from_value(value)
            .map(LenientJson)
            .map_err(|e| ApiError::Validation(format!("Invalid request body: {e}")))
    }
}

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct CreateTokenRequest {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct CreateSessionRequest {
    #[serde(default)]
    settings: Option<SettingsPatch>,
}

#[derive(Deserialize)]
pub(super) struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

impl ChatRequest {
    fn into_message(self) -> Result<String, ApiError> {
        self.message
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ApiError::Validation("No message provided".into()))
    }
}

// ── Tokens ────────────────────────────────────────────────────────────────────

/// POST /api/tokens
pub(super) async fn create_token(
    State(state): State<AxumState>,
    LenientJson(req): LenientJson<CreateTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state.tokens.clone();
    let description = req.description.unwrap_or_default();

    // The store does blocking file I/O under a std mutex.
    let token = tokio::task::spawn_blocking(move || tokens.create(&description))
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save token: {e}")))??;

    Ok(ok(token))
}

/// GET /api/tokens: values are masked.
pub(super) async fn list_tokens(State(state): State<AxumState>) -> Result<impl IntoResponse, ApiError> {
    let tokens = state.tokens.clone();
    let listed = tokio::task::spawn_blocking(move || tokens.list())
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to load tokens: {e}")))?;

    Ok(ok(json!({ "tokens": listed })))
}

// ── Catalog & health ──────────────────────────────────────────────────────────

/// GET /api/models
pub(super) async fn models() -> impl IntoResponse {
    ok(json!({ "models": catalog::MODELS }))
}

/// GET /api/health
pub(super) async fn health(State(state): State<AxumState>) -> impl IntoResponse {
    ok(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.gateway.primary().name(),
        "active_sessions": state.registry.len().await,
        "features": ["token_auth", "sessions", "streaming", "fallback"],
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// GET /api/sessions
pub(super) async fn list_sessions(State(state): State<AxumState>) -> impl IntoResponse {
    let sessions: Vec<_> = state.registry.list().await.iter().map(|s| s.summary()).collect();
    ok(json!({ "sessions": sessions }))
}

/// POST /api/sessions
pub(super) async fn create_session(
    State(state): State<AxumState>,
    LenientJson(req): LenientJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.registry.create(req.settings).await?;
    Ok(ok(json!({ "session_id": session.id, "settings": session.settings })))
}

/// GET /api/sessions/{session_id}
pub(super) async fn session_info(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.registry.get(&session_id).await?;
    Ok(ok(session.summary()))
}

/// DELETE /api/sessions/{session_id}
pub(super) async fn delete_session(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete(&session_id).await?;
    Ok(ok(json!({ "message": format!("Session {session_id} deleted") })))
}

/// PUT /api/sessions/{session_id}/settings
pub(super) async fn update_settings(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
    LenientJson(patch): LenientJson<SettingsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.registry.update_settings(&session_id, patch).await?;
    Ok(ok(json!({ "settings": settings })))
}

/// GET /api/sessions/{session_id}/history
pub(super) async fn history(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.registry.history(&session_id).await?;
    Ok(ok(json!({ "history": history })))
}

/// DELETE /api/sessions/{session_id}/history
pub(super) async fn clear_history(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.clear_history(&session_id).await?;
    Ok(ok(json!({ "message": "History cleared" })))
}

// ── Chat ──────────────────────────────────────────────────────────────────────

/// POST /api/sessions/{session_id}/chat
pub(super) async fn chat(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
    LenientJson(req): LenientJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.chat_session(&session_id).await?;
    let message = req.into_message()?;

    debug!(session_id = %session_id, chars = message.len(), "buffered chat");
    let turn = state.gateway.complete(&session_id, Some(message)).await?;

    Ok(ok(json!({ "response": turn.response, "history": turn.history })))
}

/// POST /api/sessions/{session_id}/chat/stream
///
/// Events emitted:
/// - `start`: {"session_id": "..."}
/// - `chunk`: {"content": "..."} (repeated)
/// - `end`:   {"history": [...]}
pub(super) async fn chat_stream(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
    LenientJson(req): LenientJson<ChatRequest>,
) -> Result<Response, ApiError> {
    state.chat_session(&session_id).await?;
    let message = req.into_message()?;

    info!(session_id = %session_id, "streaming chat");
    let rx = state.gateway.stream(&session_id, Some(message)).await?;

    let start = stream::once(std::future::ready(
        Event::default().event("start").json_data(json!({ "session_id": session_id })),
    ));
    let body = ReceiverStream::new(rx).map(|event| match event {
        StreamEvent::Chunk(content) => {
            Event::default().event("chunk").json_data(json!({ "content": content }))
        }
        StreamEvent::Finished { history } => {
            Event::default().event("end").json_data(json!({ "history": history }))
        }
    });

    let keep_alive = KeepAlive::new().interval(state.keep_alive).text("keep-alive");
    Ok(Sse::new(start.chain(body)).keep_alive(keep_alive).into_response())
}
