//! Route configuration.

use crate::auth::private_key_middleware;
use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Slack on top of the configured file limit for multipart framing and the
/// other form fields.
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.upload.file_max_size)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_OVERHEAD);

    Router::new()
        .route(
            "/api/v2/upload/file",
            get(handlers::get_file)
                .post(handlers::upload_file)
                .delete(handlers::delete_file),
        )
        .route("/api/v2/upload/files/list", get(handlers::list_files))
        // Middleware layers are applied in reverse order (outermost first):
        // TraceLayer -> body limit -> private key -> handler.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            private_key_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
