//! Private-key authentication middleware.
//!
//! Every endpoint is gated by the `Private-Key` header matching the
//! configured secret: a missing key is a 400, a mismatch a 403.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

/// Header carrying the shared secret.
pub const PRIVATE_KEY_HEADER: &str = "Private-Key";

/// Reject requests without the correct private key.
pub async fn private_key_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get(PRIVATE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() {
        return Err(ApiError::BadRequest("Private key is required".to_string()));
    }

    if provided != state.config.server.private_key {
        return Err(ApiError::Forbidden("Invalid private key".to_string()));
    }

    Ok(next.run(req).await)
}
