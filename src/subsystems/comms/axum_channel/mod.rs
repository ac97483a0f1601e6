//! Axum-based HTTP channel: the REST/SSE surface of the gateway.
//!
//! `run()` drives the axum event loop; the supplied [`CancellationToken`]
//! is wired to axum's graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET    /                                  → root HTML
//! POST   /api/tokens                        (open)
//! GET    /api/tokens                        (open, masked)
//! GET    /api/health                        (open)
//! GET    /api/models                        (bearer)
//! GET    /api/sessions                      (bearer)
//! POST   /api/sessions                      (bearer)
//! GET    /api/sessions/{id}                 (bearer)
//! DELETE /api/sessions/{id}                 (bearer)
//! PUT    /api/sessions/{id}/settings        (bearer)
//! GET    /api/sessions/{id}/history         (bearer)
//! DELETE /api/sessions/{id}/history         (bearer)
//! POST   /api/sessions/{id}/chat            (bearer)
//! POST   /api/sessions/{id}/chat/stream     (bearer, SSE)
//! *      anything else, or a known path with  → 404 with endpoint listing
//!        an unsupported method
//! ```

mod api;
mod auth;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::Config;
use crate::error::{ApiError, AppError};
use crate::subsystems::auth::TokenStore;
use crate::subsystems::gateway::CompletionGateway;
use crate::subsystems::sessions::{Session, SessionRegistry};

// ── Shared request state ──────────────────────────────────────────────────────

/// Axum router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone: all fields are reference-counted or `Copy`.
#[derive(Clone)]
pub struct AxumState {
    pub tokens: Arc<TokenStore>,
    pub registry: Arc<SessionRegistry>,
    pub gateway: Arc<CompletionGateway>,
    /// Chat endpoints create unknown sessions on first use instead of 404.
    pub auto_create: bool,
    pub keep_alive: Duration,
}

impl AxumState {
    pub fn new(config: &Config, tokens: Arc<TokenStore>, gateway: CompletionGateway) -> Self {
        Self {
            tokens,
            registry: gateway.registry().clone(),
            gateway: Arc::new(gateway),
            auto_create: config.sessions.auto_create,
            keep_alive: Duration::from_secs(config.stream.keep_alive_seconds.max(1)),
        }
    }

    /// Look up the session a chat request targets, honouring `auto_create`.
    pub(crate) async fn chat_session(&self, id: &str) -> Result<Session, ApiError> {
        if self.auto_create {
            Ok(self.registry.get_or_create(id).await)
        } else {
            self.registry.get(id).await
        }
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

pub async fn run(
    bind_addr: &str,
    state: AxumState,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "http channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("axum server error: {e}")))?;

    info!("http channel shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: AxumState) -> Router {
    let protected = Router::new()
        .route("/api/models",                           get(api::models))
        .route("/api/sessions",                         get(api::list_sessions).post(api::create_session))
        .route("/api/sessions/{session_id}",            get(api::session_info).delete(api::delete_session))
        .route("/api/sessions/{session_id}/settings",   put(api::update_settings))
        .route("/api/sessions/{session_id}/history",    get(api::history).delete(api::clear_history))
        .route("/api/sessions/{session_id}/chat",       post(api::chat))
        .route("/api/sessions/{session_id}/chat/stream", post(api::chat_stream))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_token));

    Router::new()
        .route("/",            get(ui::root))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/api/tokens",  get(api::list_tokens).post(api::create_token))
        .route("/api/health",  get(api::health))
        .merge(protected)
        .method_not_allowed_fallback(ui::not_found)
        .fallback(ui::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
