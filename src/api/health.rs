use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Reports which provider credentials are present; never their values.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "vision-gateway is running",
        "providers": state.credentials.configured(),
        "config": {
            "base_path": config.server.base_path,
            "max_upload_bytes": config.server.max_upload_bytes,
            "tools_count": state.tools().len(),
            "log_level": config.features.log_level,
        }
    }))
}
