//! Streaming guidance endpoints: `/step`, `/help`, `/check`, `/coordinates`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::streaming::sse_response;
use crate::error::GatewayError;
use crate::fc::ToolCallExtractor;
use crate::observability::StreamTimer;
use crate::protocol::canonical::CanonicalMessage;
use crate::protocol::dashscope::encoder::encode_dashscope_request;
use crate::protocol::dashscope::stream::DashscopeAdapter;
use crate::protocol::dashscope::dashscope_headers;
use crate::protocol::gemini::encoder::encode_gemini_request;
use crate::protocol::gemini::stream::GeminiAdapter;
use crate::protocol::gemini::{gemini_headers, stream_generate_url};
use crate::protocol::messages::{
    build_check_messages, build_coordinates_messages, build_help_messages, build_step_messages,
    CheckRequest, CoordinatesRequest, HelpRequest, StepRequest,
};
use crate::protocol::openai_chat::encoder::encode_openai_chat_request;
use crate::protocol::openai_chat::stream::OpenAiChatAdapter;
use crate::protocol::openai_chat::chat_completions_url;
use crate::routing::{Operation, Provider};
use crate::state::AppState;
use crate::stream::{adapt_stream, failed_stream, line_stream, sse_frame_stream};
use crate::transport::bearer_json_headers;

fn rejection_to_error(rejection: &JsonRejection) -> GatewayError {
    GatewayError::InvalidRequest(rejection.body_text())
}

pub(crate) async fn step_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StepRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => stream_operation(&state, Operation::Step, build_step_messages(&req)).await,
        Err(rejection) => rejection_to_error(&rejection).into_response(),
    }
}

pub(crate) async fn help_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<HelpRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => stream_operation(&state, Operation::Help, build_help_messages(&req)).await,
        Err(rejection) => rejection_to_error(&rejection).into_response(),
    }
}

pub(crate) async fn check_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => stream_operation(&state, Operation::Check, build_check_messages(&req)).await,
        Err(rejection) => rejection_to_error(&rejection).into_response(),
    }
}

pub(crate) async fn coordinates_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CoordinatesRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => {
            stream_operation(&state, Operation::Coordinates, build_coordinates_messages(&req)).await
        }
        Err(rejection) => rejection_to_error(&rejection).into_response(),
    }
}

fn encode_body<T: Serialize>(request: &T) -> Result<bytes::Bytes, GatewayError> {
    serde_json::to_vec(request)
        .map(bytes::Bytes::from)
        .map_err(|err| GatewayError::Internal(format!("encode upstream request: {err}")))
}

/// Route, send and adapt. Every failure after body validation is reported
/// in-stream as `error` followed by `done`.
async fn stream_operation(
    state: &AppState,
    operation: Operation,
    messages: Vec<CanonicalMessage>,
) -> Response {
    let timer = StreamTimer::new(operation.as_str());
    let route = match state.route(operation) {
        Ok(route) => route,
        Err(err) => {
            tracing::warn!(operation = operation.as_str(), error = %err, "no usable route");
            return sse_response(failed_stream(err));
        }
    };
    tracing::info!(
        operation = operation.as_str(),
        provider = route.provider.as_str(),
        model = %route.model,
        "forwarding request"
    );

    // Tools are only offered on the conversational endpoints.
    let extractor: Option<ToolCallExtractor> = match operation {
        Operation::Step | Operation::Help => state.tool_extractor(),
        _ => None,
    };

    match route.provider {
        Provider::OpenAi | Provider::OpenRouter => {
            let base_url = if route.provider == Provider::OpenAi {
                &state.config.providers.openai_base_url
            } else {
                &state.config.providers.openrouter_base_url
            };
            let url = chat_completions_url(base_url);
            let request = encode_openai_chat_request(&messages, &route, true);
            match send(state, &url, bearer_json_headers(route.api_key.expose()), &request).await {
                Ok(response) => sse_response(adapt_stream(
                    sse_frame_stream(response.bytes_stream()),
                    OpenAiChatAdapter::new(route.model),
                    extractor,
                    timer,
                )),
                Err(err) => sse_response(failed_stream(err)),
            }
        }
        Provider::Gemini => {
            let url = stream_generate_url(&state.config.providers.gemini_base_url, &route.model);
            let request = encode_gemini_request(&messages, &route);
            match send(state, &url, gemini_headers(route.api_key.expose()), &request).await {
                Ok(response) => sse_response(adapt_stream(
                    sse_frame_stream(response.bytes_stream()),
                    GeminiAdapter::new(route.model),
                    extractor,
                    timer,
                )),
                Err(err) => sse_response(failed_stream(err)),
            }
        }
        Provider::Dashscope => {
            let request = encode_dashscope_request(&messages, &route);
            let url = state.config.providers.dashscope_url.clone();
            match send(state, &url, dashscope_headers(route.api_key.expose()), &request).await {
                Ok(response) => sse_response(adapt_stream(
                    line_stream(response.bytes_stream()),
                    DashscopeAdapter::new(route.model),
                    extractor,
                    timer,
                )),
                Err(err) => sse_response(failed_stream(err)),
            }
        }
    }
}

async fn send<T: Serialize>(
    state: &AppState,
    url: &str,
    headers: http::HeaderMap,
    request: &T,
) -> Result<reqwest::Response, GatewayError> {
    let body = encode_body(request)?;
    state.transport.post(url, headers, body).await.inspect_err(|err| {
        tracing::warn!(upstream = url, error = %err, "upstream request failed");
    })
}

