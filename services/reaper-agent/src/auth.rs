//! Shared-secret bearer-token guard. Pass-through when the service is
//! configured without a token (explicit development mode, surfaced by
//! `status`/`health`); UNAUTHENTICATED on any mismatch otherwise.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AgentState;

pub async fn require_bearer_token(
    State(state): State<AgentState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = &state.config.bearer_token else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let matches = match provided {
        Some(token) if token.len() == expected.len() => {
            bool::from(token.as_bytes().ct_eq(expected.as_bytes()))
        }
        _ => false,
    };

    if matches {
        Ok(next.run(request).await)
    } else {
        Err(ApiError(reaper_core::ReaperError::Unauthenticated))
    }
}
