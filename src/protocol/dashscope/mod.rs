pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

/// Multimodal generation request.
#[derive(Debug, Clone, Serialize)]
pub struct DashscopeRequest {
    pub model: String,
    pub input: DashscopeInput,
    pub parameters: DashscopeParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashscopeInput {
    pub messages: Vec<DashscopeMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashscopeParameters {
    pub incremental_output: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashscopeMessage {
    pub role: &'static str,
    pub content: Vec<DashscopeContentItem>,
}

/// `{"text": ...}` or `{"image": url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DashscopeContentItem {
    Text(String),
    Image(String),
}

/// One `data:` payload of the response stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashscopeChunk {
    #[serde(default)]
    pub output: Option<DashscopeOutput>,
    #[serde(default)]
    pub usage: Option<DashscopeUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashscopeOutput {
    #[serde(default)]
    pub choices: Vec<DashscopeChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashscopeChoice {
    #[serde(default)]
    pub message: Option<DashscopeResponseMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashscopeResponseMessage {
    /// Items other than `{"text": ...}` are kept as raw JSON and ignored.
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashscopeUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

/// Headers for the SSE variant of the generation endpoint.
#[must_use]
pub fn dashscope_headers(api_key: &str) -> http::HeaderMap {
    let mut headers = crate::transport::bearer_json_headers(api_key);
    headers.insert("x-dashscope-sse", http::HeaderValue::from_static("enable"));
    headers
}
