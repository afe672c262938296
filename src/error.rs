/// Error type shared by the gateway modules.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream timed out: {0}")]
    Timeout(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    PayloadTooLarge,
    Unavailable,
    UpstreamFailure,
    ServerError,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::PayloadTooLarge(_) => ErrorCategory::PayloadTooLarge,
            GatewayError::Config(_) => ErrorCategory::Unavailable,
            GatewayError::Upstream { .. }
            | GatewayError::Transport(_)
            | GatewayError::Timeout(_) => ErrorCategory::UpstreamFailure,
            GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Map a reqwest failure onto the gateway taxonomy.
    ///
    /// Timeouts are kept distinct so logs can tell them apart from resets;
    /// both end the stream the same way.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::from_reqwest(&err)
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::PayloadTooLarge => http::StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCategory::Unavailable => http::StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::UpstreamFailure => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn category_type_name(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::PayloadTooLarge => "payload_too_large",
        ErrorCategory::Unavailable => "service_unavailable",
        ErrorCategory::UpstreamFailure => "upstream_error",
        ErrorCategory::ServerError => "server_error",
    }
}

/// Format an error for a non-streaming response, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let body = serde_json::json!({
        "error": {
            "type": category_type_name(cat),
            "message": err.to_string(),
        }
    });
    (http_status_for_category(cat), body)
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
