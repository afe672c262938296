use base64::Engine as _;

use crate::protocol::canonical::{CanonicalMessage, CanonicalRole, ContentPart, ImageSource};
use crate::routing::Route;

use super::{
    GeminiBlob, GeminiContent, GeminiFileData, GeminiGenerationConfig, GeminiPart, GeminiRequest,
    GeminiThinkingConfig,
};

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Encode canonical messages for Gemini.
///
/// System text moves to `systemInstruction`; `user` stays `user` and every
/// other role becomes `model`. Image parts that cannot be expressed are
/// logged and dropped; messages left empty are omitted.
#[must_use]
pub fn encode_gemini_request(messages: &[CanonicalMessage], route: &Route) -> GeminiRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::with_capacity(messages.len());

    for msg in messages {
        if msg.role == CanonicalRole::System {
            system_parts.extend(msg.parts.iter().filter_map(|part| match part {
                ContentPart::Text(text) => Some(GeminiPart::text(text.clone())),
                ContentPart::Image(_) => None,
            }));
            continue;
        }

        let parts: Vec<GeminiPart> = msg.parts.iter().filter_map(encode_part).collect();
        if parts.is_empty() {
            continue;
        }
        let role = if msg.role == CanonicalRole::User {
            "user"
        } else {
            "model"
        };
        contents.push(GeminiContent {
            role: Some(role.to_string()),
            parts,
        });
    }

    let system_instruction = (!system_parts.is_empty()).then(|| GeminiContent {
        role: None,
        parts: system_parts,
    });
    let generation_config = route.thinking_level.as_ref().map(|level| GeminiGenerationConfig {
        thinking_config: Some(GeminiThinkingConfig {
            thinking_level: Some(level.to_uppercase()),
        }),
    });

    GeminiRequest {
        contents,
        system_instruction,
        generation_config,
    }
}

fn encode_part(part: &ContentPart) -> Option<GeminiPart> {
    match part {
        ContentPart::Text(text) => Some(GeminiPart::text(text.clone())),
        ContentPart::Image(ImageSource::InlineBase64 { mime_type, data }) => {
            let bytes = match base64::engine::general_purpose::STANDARD.decode(data.trim()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(error = %err, mime_type = %mime_type, "dropping undecodable inline image");
                    return None;
                }
            };
            Some(GeminiPart {
                inline_data: Some(GeminiBlob {
                    mime_type: mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                }),
                ..GeminiPart::default()
            })
        }
        ContentPart::Image(ImageSource::Uri(uri)) => {
            if !is_storage_uri(uri) {
                tracing::warn!(uri = %uri, "image URL form not supported by Gemini, dropping part");
                return None;
            }
            Some(GeminiPart {
                file_data: Some(GeminiFileData {
                    mime_type: mime_from_extension(uri).unwrap_or(DEFAULT_IMAGE_MIME).to_string(),
                    file_uri: uri.clone(),
                }),
                ..GeminiPart::default()
            })
        }
    }
}

/// `scheme://...` where the scheme is not plain web transport.
fn is_storage_uri(uri: &str) -> bool {
    match uri.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && !rest.is_empty()
                && scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
                && !scheme.eq_ignore_ascii_case("http")
                && !scheme.eq_ignore_ascii_case("https")
        }
        None => false,
    }
}

fn mime_from_extension(uri: &str) -> Option<&'static str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let (_, ext) = path.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ApiKey, Provider};

    fn route() -> Route {
        Route {
            provider: Provider::Gemini,
            model: "gemini-3-flash-preview".into(),
            reasoning_effort: None,
            thinking_level: Some("minimal".into()),
            provider_order: Vec::new(),
            allow_fallbacks: None,
            api_key: ApiKey::new("k").unwrap(),
        }
    }

    fn image(url: &str) -> ContentPart {
        ContentPart::Image(ImageSource::from_client_url(url))
    }

    #[test]
    fn test_roles_and_system_instruction() {
        let messages = vec![
            CanonicalMessage::text(CanonicalRole::System, "judge"),
            CanonicalMessage::text(CanonicalRole::User, "hi"),
            CanonicalMessage::text(CanonicalRole::Assistant, "hello"),
        ];
        let req = encode_gemini_request(&messages, &route());
        let roles: Vec<_> = req.contents.iter().map(|c| c.role.clone().unwrap()).collect();
        assert_eq!(roles, vec!["user", "model"]);
        let system = req.system_instruction.unwrap();
        assert_eq!(system.parts, vec![GeminiPart::text("judge")]);

        let json = serde_json::to_value(encode_gemini_request(&messages, &route())).unwrap();
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingLevel"], "MINIMAL");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "judge");
    }

    #[test]
    fn test_image_sources() {
        let messages = vec![CanonicalMessage::with_parts(
            CanonicalRole::User,
            [
                ContentPart::Text("before".into()),
                image("data:image/jpeg;base64,AAEC"),
                image("gs://bucket/shot.webp"),
                image("gs://bucket/raw"),
                image("https://example.com/a.png"),
            ],
        )];
        let req = encode_gemini_request(&messages, &route());
        let parts = &req.contents[0].parts;
        assert_eq!(parts.len(), 4);
        assert_eq!(
            parts[1].inline_data,
            Some(GeminiBlob {
                mime_type: "image/jpeg".into(),
                data: "AAEC".into()
            })
        );
        assert_eq!(parts[2].file_data.as_ref().unwrap().mime_type, "image/webp");
        assert_eq!(parts[3].file_data.as_ref().unwrap().mime_type, "image/png");
    }

    #[test]
    fn test_bad_base64_drops_only_that_part() {
        let messages = vec![
            CanonicalMessage::with_parts(
                CanonicalRole::User,
                [ContentPart::Text("keep".into()), image("data:image/png;base64,!!!")],
            ),
            CanonicalMessage::with_parts(CanonicalRole::User, [image("https://example.com/x.png")]),
        ];
        let req = encode_gemini_request(&messages, &route());
        assert_eq!(req.contents.len(), 1);
        assert_eq!(req.contents[0].parts, vec![GeminiPart::text("keep")]);
    }
}
