//! HTTP surface. Handlers stay thin: parse, build messages, hand off to the
//! streaming pipeline or the file analyzer.

mod file_context;
mod guidance;
pub mod health;
pub(crate) mod streaming;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::routing::normalize_base_path;
use crate::state::AppState;

/// Build the application router, nested under `server.base_path`.
///
/// JSON bodies share the per-file upload cap as their limit. `/file-context`
/// is capped at every allowed file at full size, and checks each file while
/// reading it.
pub fn build_router(state: Arc<AppState>) -> Router {
    let json_limit = state.config.server.max_upload_bytes;
    let upload_limit = state.config.server.upload_body_limit();
    let routes = Router::new()
        .route("/step", post(guidance::step_handler))
        .route("/help", post(guidance::help_handler))
        .route("/check", post(guidance::check_handler))
        .route("/coordinates", post(guidance::coordinates_handler))
        .layer(DefaultBodyLimit::max(json_limit))
        .route(
            "/file-context",
            post(file_context::file_context_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/health", get(health::health_handler));

    let base_path = normalize_base_path(&state.config.server.base_path);
    let router = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    };
    router.with_state(state)
}
