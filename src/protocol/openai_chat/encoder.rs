use crate::protocol::canonical::{CanonicalMessage, ContentPart};
use crate::routing::{Provider, Route};

use super::{
    OpenAiChatRequest, OpenAiContent, OpenAiContentPart, OpenAiImageUrl, OpenAiMessage,
    OpenAiStreamOptions, OpenRouterProviderPrefs,
};

/// Encode canonical messages into a Chat Completions request for `route`.
///
/// Sub-provider preferences are only sent to OpenRouter.
#[must_use]
pub fn encode_openai_chat_request(
    messages: &[CanonicalMessage],
    route: &Route,
    stream: bool,
) -> OpenAiChatRequest {
    let provider = if route.provider == Provider::OpenRouter
        && (!route.provider_order.is_empty() || route.allow_fallbacks.is_some())
    {
        Some(OpenRouterProviderPrefs {
            order: route.provider_order.clone(),
            allow_fallbacks: route.allow_fallbacks,
        })
    } else {
        None
    };

    OpenAiChatRequest {
        model: route.model.clone(),
        messages: messages.iter().map(encode_message).collect(),
        stream,
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
        reasoning_effort: route.reasoning_effort.clone(),
        provider,
    }
}

fn encode_message(msg: &CanonicalMessage) -> OpenAiMessage {
    let role = msg.role.as_str();
    if let [ContentPart::Text(text)] = msg.parts.as_slice() {
        return OpenAiMessage {
            role,
            content: OpenAiContent::Text(text.clone()),
        };
    }

    let parts = msg
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => OpenAiContentPart::Text { text: text.clone() },
            ContentPart::Image(source) => OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl {
                    url: source.to_url(),
                },
            },
        })
        .collect();
    OpenAiMessage {
        role,
        content: OpenAiContent::Parts(parts),
    }
}
