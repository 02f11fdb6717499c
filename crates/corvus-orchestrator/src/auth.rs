//! Bearer-token guard for the knowledge-engine HTTP surface. `/health` and
//! `/status` stay unauthenticated — they're local-only operational probes.

use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

use crate::app::AppState;

pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = &state.config.knowledge.bearer_token else {
        // No token configured: the operator has chosen to run this surface open.
        return Ok(next.run(req).await);
    };

    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match header_value {
        Some(token) if token == expected => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
