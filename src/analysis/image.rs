use base64::Engine as _;

use super::{AnalysisError, UploadedFile, MAX_ANALYSIS_CHARS};
use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalMessage, CanonicalRole, ContentPart, ImageSource};
use crate::protocol::openai_chat::encoder::encode_openai_chat_request;
use crate::protocol::openai_chat::{chat_completions_url, OpenAiChatResponse};
use crate::routing::{Operation, Provider};
use crate::state::AppState;
use crate::transport::bearer_json_headers;
use crate::util::truncate_text;

const IMAGE_SYSTEM_PROMPT: &str =
    "Summarize this uploaded image for task guidance. Focus on actionable, concise details.";

fn missing_credential_note(name: &str) -> String {
    format!("Image attached: {name}. Set OPENAI_API_KEY for automated visual analysis.")
}

fn vision_messages(file: &UploadedFile) -> [CanonicalMessage; 2] {
    let data = base64::engine::general_purpose::STANDARD.encode(&file.bytes);
    [
        CanonicalMessage::text(CanonicalRole::System, IMAGE_SYSTEM_PROMPT),
        CanonicalMessage::with_parts(
            CanonicalRole::User,
            [
                ContentPart::Text(format!("Analyze image: {}", file.name)),
                ContentPart::Image(ImageSource::InlineBase64 {
                    mime_type: file.mime_type.clone(),
                    data,
                }),
            ],
        ),
    ]
}

/// Ask the vision model for a short summary of an uploaded image.
///
/// Without a credential this returns a placeholder note instead of failing.
///
/// # Errors
///
/// Returns [`AnalysisError::Upstream`] for transport or status failures and
/// [`AnalysisError::Malformed`] when the reply has no text.
pub async fn analyze_image(state: &AppState, file: &UploadedFile) -> Result<String, AnalysisError> {
    let route = match state.route(Operation::ImageAnalysis) {
        Ok(route) => route,
        Err(GatewayError::Config(reason)) => {
            tracing::debug!(file = %file.name, %reason, "image analysis skipped");
            return Ok(missing_credential_note(&file.name));
        }
        Err(err) => return Err(err.into()),
    };

    let base_url = match route.provider {
        Provider::OpenRouter => &state.config.providers.openrouter_base_url,
        _ => &state.config.providers.openai_base_url,
    };
    let request = encode_openai_chat_request(&vision_messages(file), &route, false);
    let body = serde_json::to_vec(&request)
        .map_err(|err| GatewayError::Internal(format!("encode vision request: {err}")))?;

    let response = state
        .transport
        .post(
            &chat_completions_url(base_url),
            bearer_json_headers(route.api_key.expose()),
            body.into(),
        )
        .await?;
    let bytes = response.bytes().await.map_err(GatewayError::from)?;
    let reply: OpenAiChatResponse = serde_json::from_slice(&bytes)
        .map_err(|err| AnalysisError::Malformed(format!("vision reply: {err}")))?;

    let content = reply
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| AnalysisError::Malformed("vision reply had no text".to_string()))?;
    Ok(truncate_text(&content, MAX_ANALYSIS_CHARS))
}
