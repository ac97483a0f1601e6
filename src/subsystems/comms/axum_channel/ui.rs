//! Non-API routes: the static root page and the JSON 404 fallback.

use axum::{
    Json,
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

/// Paths advertised by the 404 fallback.
pub(super) const AVAILABLE_ENDPOINTS: &[&str] = &[
    "/",
    "/api/tokens",
    "/api/models",
    "/api/sessions",
    "/api/sessions/{session_id}",
    "/api/sessions/{session_id}/settings",
    "/api/sessions/{session_id}/history",
    "/api/sessions/{session_id}/chat",
    "/api/sessions/{session_id}/chat/stream",
    "/api/health",
];

// ── Root page ─────────────────────────────────────────────────────────────────

const ROOT_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>chatgate</title>
  <style>
    *, *::before, *::after { box-sizing: border-box; margin: 0; padding: 0; }
    body {
      font-family: system-ui, -apple-system, sans-serif;
      background: #0f0f0f; color: #e0e0e0;
      display: flex; align-items: center; justify-content: center;
      min-height: 100vh;
    }
    .card {
      padding: 2rem 3rem; max-width: 40rem;
      border: 1px solid #333; border-radius: 12px;
      background: #1a1a1a;
    }
    h1 { font-size: 1.5rem; margin-bottom: 0.5rem; }
    p  { font-size: 0.9rem; color: #888; margin-bottom: 1rem; }
    code { font-size: 0.85rem; color: #c0c0e0; }
    li { list-style: none; margin: 0.25rem 0; }
  </style>
</head>
<body>
  <div class="card">
    <h1>chatgate</h1>
    <p>Chat completion gateway is running. Create a token, then send it as
       <code>Authorization: Bearer &lt;token&gt;</code>.</p>
    <ul>
      <li><code>POST /api/tokens</code> issue a token</li>
      <li><code>POST /api/sessions</code> open a session</li>
      <li><code>POST /api/sessions/{id}/chat</code> buffered reply</li>
      <li><code>POST /api/sessions/{id}/chat/stream</code> SSE reply</li>
      <li><code>GET  /api/health</code> liveness</li>
    </ul>
  </div>
</body>
</html>
"#;

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /: static welcome page.
pub(super) async fn root() -> Html<&'static str> {
    Html(ROOT_INDEX_HTML)
}

/// Any unmatched path or method.
pub(super) async fn not_found(uri: Uri) -> Response {
    debug!(path = %uri.path(), "no route");
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": format!("Endpoint not found: {}", uri.path()),
            "available_endpoints": AVAILABLE_ENDPOINTS,
        })),
    )
        .into_response()
}
