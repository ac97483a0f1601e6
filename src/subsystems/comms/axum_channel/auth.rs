//! Bearer token guard for the protected `/api/*` routes.
//!
//! Runs as route-layer middleware, so a rejected request never reaches a
//! handler and has no side effect.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AxumState;
use crate::error::ApiError;
use crate::subsystems::auth::TokenStore;

/// Pull the token out of `Authorization: Bearer <token>`.
fn bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Auth("Authorization header required".into()))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Auth("Invalid authorization format. Use 'Bearer <token>'".into()))
}

/// Check the bearer token against the store. The lookup reads the token
/// file, so it runs on the blocking pool.
pub(super) async fn authorize(tokens: &Arc<TokenStore>, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = bearer(headers)?.to_string();
    let tokens = tokens.clone();

    let valid = tokio::task::spawn_blocking(move || tokens.is_valid(&token))
        .await
        .map_err(|e| ApiError::Internal(format!("token check failed: {e}")))?;

    if valid {
        Ok(())
    } else {
        Err(ApiError::Auth("Invalid or expired token".into()))
    }
}

pub(super) async fn require_token(
    State(state): State<AxumState>,
    request: Request,
    next: Next,
) -> Response {
    match authorize(&state.tokens, request.headers()).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
