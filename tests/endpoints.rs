use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;
use vision_gateway::api::build_router;
use vision_gateway::config::{AppConfig, ToolConfig};
use vision_gateway::replies::{accumulate_text, parse_check_verdict, parse_coordinates, Coordinates};
use vision_gateway::routing::Credentials;
use vision_gateway::state::AppState;
use vision_gateway::transport::HttpTransport;

const SCREENSHOT: &str = "data:image/png;base64,iVBORw0KGgo=";

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

impl Captured {
    fn record(&self, headers: HeaderMap, body: Value) {
        self.requests
            .lock()
            .expect("capture lock")
            .push((headers, body));
    }

    fn take(&self) -> Vec<(HeaderMap, Value)> {
        std::mem::take(&mut *self.requests.lock().expect("capture lock"))
    }
}

fn sse_body(body: String) -> Response {
    ([("content-type", "text/event-stream")], body).into_response()
}

async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn build_app(config: AppConfig, keys: &[(&str, &str)]) -> Router {
    let keys: HashMap<String, String> = keys
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let credentials = Credentials::from_lookup(|name| keys.get(name).cloned());
    let transport = HttpTransport::new(&config.server).expect("transport");
    build_router(Arc::new(AppState::new(config, credentials, transport)))
}

fn json_request(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize")))
        .expect("build request")
}

async fn read_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}

/// Event types of every JSON frame, with the sentinel count.
fn frame_kinds(wire: &str) -> (Vec<String>, usize) {
    let mut kinds = Vec::new();
    let mut done = 0;
    for frame in wire.split("\n\n").filter(|f| !f.is_empty()) {
        let payload = frame.strip_prefix("data: ").expect("data frame");
        if payload == "[DONE]" {
            done += 1;
            continue;
        }
        let value: Value = serde_json::from_str(payload).expect("json frame");
        kinds.push(value["type"].as_str().unwrap_or_default().to_string());
    }
    (kinds, done)
}

fn dashscope_app(base: &str) -> Router {
    let mut config = AppConfig::default();
    config.providers.dashscope_url = format!("{base}/generation");
    build_app(config, &[("DASHSCOPE_API_KEY", "ds-key")])
}

fn coordinates_request() -> Request<Body> {
    json_request(
        "/api/coordinates",
        &json!({"instruction": "Click the Export button", "image": SCREENSHOT}),
    )
}

#[tokio::test]
async fn test_coordinates_stream_from_dashscope() {
    let captured = Captured::default();
    let mock = Router::new().route(
        "/generation",
        post({
            let captured = captured.clone();
            move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    captured.record(headers, body);
                    sse_body(
                        concat!(
                            "id:1\nevent:result\n:HTTP_STATUS/200\n",
                            "data:{\"output\":{\"choices\":[{\"message\":{\"role\":\"assistant\",\"content\":[{\"text\":\"412\"}]}}]}}\n\n",
                            "id:2\nevent:result\n:HTTP_STATUS/200\n",
                            "data:{\"output\":{\"choices\":[{\"message\":{\"role\":\"assistant\",\"content\":[{\"text\":\",87\"}]}}]},\"usage\":{\"input_tokens\":1000,\"output_tokens\":6}}\n\n",
                        )
                        .to_string(),
                    )
                }
            }
        }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let mut config = AppConfig::default();
    config.providers.dashscope_url = format!("{base}/generation");
    let app = build_app(config, &[("DASHSCOPE_API_KEY", "ds-key")]);

    let response = app
        .oneshot(json_request(
            "/api/coordinates",
            &json!({"instruction": "Click the Save button", "image": SCREENSHOT}),
        ))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let wire = read_text(response).await;
    assert!(wire.starts_with("data: {\"type\":\"start\""));
    assert!(wire.ends_with("data: [DONE]\n\n"));
    assert_eq!(parse_coordinates(&accumulate_text(&wire)), Some(Coordinates { x: 412, y: 87 }));

    let requests = captured.take();
    assert_eq!(requests.len(), 1);
    let (headers, body) = &requests[0];
    assert_eq!(headers["authorization"], "Bearer ds-key");
    assert_eq!(headers["x-dashscope-sse"], "enable");
    assert_eq!(body["model"], "qwen3-vl-flash");
    assert_eq!(body["parameters"]["incremental_output"], true);
    let messages = body["input"]["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"][0]["image"], SCREENSHOT);

    server.abort();
}

#[tokio::test]
async fn test_coordinates_without_target_is_none() {
    let mock = Router::new().route(
        "/generation",
        post(|| async {
            sse_body(
                concat!(
                    "id:1\nevent:result\n:HTTP_STATUS/200\n",
                    "data:{\"output\":{\"choices\":[{\"message\":{\"role\":\"assistant\",\"content\":[{\"text\":\"No\"}]}}]}}\n\n",
                    "id:2\nevent:result\n:HTTP_STATUS/200\n",
                    "data:{\"output\":{\"choices\":[{\"message\":{\"role\":\"assistant\",\"content\":[{\"text\":\"ne\"}]}}]}}\n\n",
                )
                .to_string(),
            )
        }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let response = dashscope_app(&base)
        .oneshot(coordinates_request())
        .await
        .expect("router response");
    let wire = read_text(response).await;
    assert_eq!(accumulate_text(&wire), "None");
    assert_eq!(parse_coordinates(&accumulate_text(&wire)), None);
    let (kinds, done) = frame_kinds(&wire);
    assert_eq!(kinds.first().map(String::as_str), Some("start"));
    assert_eq!(kinds.last().map(String::as_str), Some("finish"));
    assert_eq!(done, 1);

    server.abort();
}

#[tokio::test]
async fn test_dashscope_failure_status_is_error_without_start() {
    let mock = Router::new().route(
        "/generation",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"code":"InternalError","message":"model overloaded"}"#,
            )
        }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let response = dashscope_app(&base)
        .oneshot(coordinates_request())
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    let wire = read_text(response).await;
    let (kinds, done) = frame_kinds(&wire);
    assert_eq!(kinds, vec!["error"]);
    assert_eq!(done, 1);
    assert!(wire.contains("status=500"));
    assert!(wire.ends_with("data: [DONE]\n\n"));
    assert_eq!(accumulate_text(&wire), "");

    server.abort();
}

#[tokio::test]
async fn test_stalled_upstream_times_out_with_single_error() {
    let mock = Router::new().route(
        "/generation",
        post(|| async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            sse_body(String::new())
        }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let mut config = AppConfig::default();
    config.server.timeout = 1;
    config.providers.dashscope_url = format!("{base}/generation");
    let app = build_app(config, &[("DASHSCOPE_API_KEY", "ds-key")]);

    let started = std::time::Instant::now();
    let response = app
        .oneshot(coordinates_request())
        .await
        .expect("router response");
    let wire = read_text(response).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(4));

    let (kinds, done) = frame_kinds(&wire);
    assert_eq!(kinds, vec!["error"]);
    assert_eq!(done, 1);
    assert!(wire.ends_with("data: [DONE]\n\n"));

    server.abort();
}

#[tokio::test]
async fn test_check_stream_from_gemini() {
    let captured = Captured::default();
    let mock = Router::new().route(
        "/models/{action}",
        post({
            let captured = captured.clone();
            move |axum::extract::Path(action): axum::extract::Path<String>,
                  headers: HeaderMap,
                  Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    assert_eq!(action, "gemini-3-flash-preview:streamGenerateContent");
                    captured.record(headers, body);
                    let frames = [
                        json!({"candidates":[{"content":{"role":"model","parts":[{"text":"```json\n{\"reasoning\": \"The dialog closed\", "}]}}]}),
                        json!({"candidates":[{"content":{"role":"model","parts":[{"text":"\"status\": \"Yes\"}\n```"}]}}],
                               "usageMetadata":{"promptTokenCount":2000,"candidatesTokenCount":20,"totalTokenCount":2020}}),
                    ];
                    sse_body(frames.iter().map(|f| format!("data: {f}\r\n\r\n")).collect())
                }
            }
        }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let mut config = AppConfig::default();
    config.providers.gemini_base_url = format!("{base}/models");
    let app = build_app(config, &[("GEMINI_API_KEY", "g-key")]);

    let response = app
        .oneshot(json_request(
            "/api/check",
            &json!({
                "instruction": "Close the dialog",
                "before_image": SCREENSHOT,
                "after_image": "gs://bucket/after.jpg",
            }),
        ))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    let wire = read_text(response).await;
    let verdict = parse_check_verdict(&accumulate_text(&wire)).expect("verdict");
    assert!(verdict.is_complete());
    assert_eq!(verdict.reasoning, "The dialog closed");
    assert!(wire.contains("\"totalTokens\":2020"));

    let requests = captured.take();
    let (headers, body) = &requests[0];
    assert_eq!(headers["x-goog-api-key"], "g-key");
    assert!(body["systemInstruction"]["parts"][0]["text"].is_string());
    let contents = body["contents"].as_array().expect("contents");
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0]["role"], "user");
    let parts = contents[0]["parts"].as_array().expect("parts");
    assert!(parts.iter().any(|p| p["inlineData"]["mimeType"] == "image/png"));
    assert!(parts
        .iter()
        .any(|p| p["fileData"]["fileUri"] == "gs://bucket/after.jpg"));
    assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingLevel"], "MINIMAL");

    server.abort();
}

#[tokio::test]
async fn test_check_falls_back_to_openrouter() {
    let captured = Captured::default();
    let mock = Router::new().route(
        "/api/v1/chat/completions",
        post({
            let captured = captured.clone();
            move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    captured.record(headers, body);
                    sse_body(
                        [
                            json!({"choices":[{"delta":{"content":"{\"reasoning\":\"still open\",\"status\":\"No\"}"}}]}),
                            json!({"model":"google/gemini-3-flash-preview","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15,"cost":0.0001}}),
                        ]
                        .iter()
                        .map(|f| format!("data: {f}\n\n"))
                        .chain(std::iter::once("data: [DONE]\n\n".to_string()))
                        .collect(),
                    )
                }
            }
        }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let mut config = AppConfig::default();
    config.providers.openrouter_base_url = format!("{base}/api/v1");
    let app = build_app(config, &[("OPENROUTER_API_KEY", "or-key")]);

    let response = app
        .oneshot(json_request(
            "/api/check",
            &json!({"instruction": "Close it", "before_image": SCREENSHOT, "after_image": SCREENSHOT}),
        ))
        .await
        .expect("router response");
    let wire = read_text(response).await;
    let verdict = parse_check_verdict(&accumulate_text(&wire)).expect("verdict");
    assert!(!verdict.is_complete());
    assert!(wire.contains("\"cost\":0.0001"));

    let requests = captured.take();
    let (headers, body) = &requests[0];
    assert_eq!(headers["authorization"], "Bearer or-key");
    assert_eq!(body["model"], "google/gemini-3-flash-preview");
    assert_eq!(body["stream"], true);
    assert_eq!(body["provider"]["order"], json!(["Google AI Studio"]));
    assert_eq!(body["provider"]["allow_fallbacks"], true);
    assert_eq!(body["reasoning_effort"], "minimal");

    server.abort();
}

#[tokio::test]
async fn test_step_with_follow_up_extracts_tool_call() {
    let captured = Captured::default();
    let mock = Router::new().route(
        "/v1/chat/completions",
        post({
            let captured = captured.clone();
            move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    captured.record(headers, body);
                    sse_body(
                        [
                            json!({"choices":[{"delta":{"content":"Open the guide: <invoke name=\"open_url\">"}}]}),
                            json!({"choices":[{"delta":{"content":"{\"url\":\"https://example.com/guide\"}</invoke>"}}]}),
                        ]
                        .iter()
                        .map(|f| format!("data: {f}\n\n"))
                        .collect(),
                    )
                }
            }
        }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let mut config = AppConfig::default();
    config.providers.openai_base_url = format!("{base}/v1");
    config.tools = vec![ToolConfig {
        name: "open_url".to_string(),
        argument_schema: json!({"type": "object"}),
    }];
    let app = build_app(config, &[("OPENAI_API_KEY", "sk-test")]);

    let response = app
        .oneshot(json_request(
            "/api/step",
            &json!({
                "goal": "Install the extension",
                "image": SCREENSHOT,
                "os_name": "macOS",
                "completed_steps": ["Opened the browser"],
                "follow_up_context": {
                    "previous_image": SCREENSHOT,
                    "previous_instruction": "Click Extensions",
                    "follow_up_message": "I can't find it"
                }
            }),
        ))
        .await
        .expect("router response");
    let wire = read_text(response).await;
    assert!(wire.contains("\"type\":\"tool-call-start\""));
    assert!(wire.contains("\"name\":\"open_url\""));
    assert_eq!(accumulate_text(&wire), "Open the guide: ");

    let requests = captured.take();
    let (headers, body) = &requests[0];
    assert_eq!(headers["authorization"], "Bearer sk-test");
    assert_eq!(body["model"], "gpt-5-mini-2025-08-07");
    assert_eq!(body["reasoning_effort"], "low");
    assert!(body.get("provider").is_none());
    let messages = body["messages"].as_array().expect("messages");
    let roles: Vec<&str> = messages.iter().filter_map(|m| m["role"].as_str()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    // Only the current screenshot is sent.
    assert_eq!(body.to_string().matches("iVBORw0KGgo=").count(), 1);

    server.abort();
}

#[tokio::test]
async fn test_missing_credentials_stream_error_then_done() {
    let app = build_app(AppConfig::default(), &[]);
    let response = app
        .oneshot(json_request(
            "/api/help",
            &json!({"goal": "g", "image": SCREENSHOT, "user_question": "where?"}),
        ))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    let wire = read_text(response).await;
    let frames: Vec<&str> = wire.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].starts_with("data: {\"type\":\"error\""));
    assert!(frames[0].contains("OPENAI_API_KEY"));
    assert_eq!(frames[1], "data: [DONE]");
}

#[tokio::test]
async fn test_upstream_failure_status_becomes_error_frame() {
    let mock = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
    );
    let (base, server) = spawn_upstream(mock).await;

    let mut config = AppConfig::default();
    config.providers.openai_base_url = format!("{base}/v1");
    let app = build_app(config, &[("OPENAI_API_KEY", "sk-test")]);

    let response = app
        .oneshot(json_request(
            "/api/step",
            &json!({"goal": "g", "image": SCREENSHOT}),
        ))
        .await
        .expect("router response");
    let wire = read_text(response).await;
    assert!(wire.contains("\"type\":\"error\""));
    assert!(wire.contains("status=429"));
    assert!(wire.ends_with("data: [DONE]\n\n"));

    server.abort();
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = build_app(AppConfig::default(), &[("DASHSCOPE_API_KEY", "k")]);
    let response = app
        .oneshot(json_request("/api/coordinates", &json!({"instruction": "x"})))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&read_text(response).await).expect("json");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_health_lists_configured_providers() {
    let app = build_app(AppConfig::default(), &[("GEMINI_API_KEY", "g"), ("OPENAI_API_KEY", " ")]);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&read_text(response).await).expect("json");
    assert_eq!(body["providers"], json!(["gemini"]));
}
