//! Application-wide error types.
//!
//! [`AppError`] covers process-level failures (startup, config, serving).
//! [`ApiError`] is the request-level taxonomy every handler returns; it
//! renders itself as the `{ "success": false, "error": ... }` envelope.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Request errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad or missing input.
    #[error("{0}")]
    Validation(String),

    /// Missing, malformed, or unknown bearer token.
    #[error("{0}")]
    Auth(String),

    /// Unknown session (or other resource).
    #[error("{0}")]
    NotFound(String),

    /// Both the primary and the fallback completion attempts failed.
    #[error("{0}")]
    Generation(String),

    /// Anything else that went wrong on our side (token persistence, ...).
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn session_not_found() -> Self {
        ApiError::NotFound("Session not found".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Generation(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        } else {
            debug!(%status, error = %self, "request rejected");
        }
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
