use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
}

impl CanonicalRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalRole::System => "system",
            CanonicalRole::User => "user",
            CanonicalRole::Assistant => "assistant",
        }
    }
}

/// Where an image part points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Payload carried in a `data:<mime>;base64,<data>` URL.
    InlineBase64 { mime_type: String, data: String },
    /// Anything else: remote `https://` URL, storage URI, ...
    Uri(String),
}

impl ImageSource {
    /// Classify an image reference sent by the client.
    ///
    /// Only well-formed base64 data URLs become [`ImageSource::InlineBase64`];
    /// everything else is kept verbatim as a URI so no information is lost.
    #[must_use]
    pub fn from_client_url(url: &str) -> Self {
        parse_data_url(url).map_or_else(
            || ImageSource::Uri(url.to_string()),
            |(mime_type, data)| ImageSource::InlineBase64 {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            },
        )
    }

    /// Render the source back into a URL string (`data:` or the original URI).
    #[must_use]
    pub fn to_url(&self) -> String {
        match self {
            ImageSource::InlineBase64 { mime_type, data } => {
                let mut out = String::with_capacity(mime_type.len() + data.len() + 13);
                out.push_str("data:");
                out.push_str(mime_type);
                out.push_str(";base64,");
                out.push_str(data);
                out
            }
            ImageSource::Uri(uri) => uri.clone(),
        }
    }
}

/// Split `data:<mime>;base64,<payload>` into `(mime, payload)`.
#[must_use]
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    if mime_type.is_empty() || mime_type.contains(';') {
        return None;
    }
    Some((mime_type, payload))
}

/// A single part of a message's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(ImageSource),
}

/// A single message in the canonical conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    pub parts: SmallVec<[ContentPart; 2]>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn text(role: CanonicalRole, text: impl Into<String>) -> Self {
        let mut parts = SmallVec::new();
        parts.push(ContentPart::Text(text.into()));
        Self { role, parts }
    }

    #[must_use]
    pub fn with_parts(role: CanonicalRole, parts: impl IntoIterator<Item = ContentPart>) -> Self {
        Self {
            role,
            parts: parts.into_iter().collect(),
        }
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text(text) = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Metadata attached to the `finish` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl FinishMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.usage.is_none() && self.cost.is_none() && self.model.is_none()
    }
}

/// A single event in a canonical stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Start { message_id: String },
    TextStart { block_id: String },
    TextDelta { block_id: String, delta: String },
    TextEnd { block_id: String },
    ToolCallStart { call_id: String, name: String },
    ToolCallDelta { call_id: String, args_fragment: String },
    ToolCallEnd { call_id: String },
    Error { message: String },
    Finish { metadata: FinishMetadata },
    Done,
}

impl StreamEvent {
    /// Wire `type` tag of the event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::TextStart { .. } => "text-start",
            StreamEvent::TextDelta { .. } => "text-delta",
            StreamEvent::TextEnd { .. } => "text-end",
            StreamEvent::ToolCallStart { .. } => "tool-call-start",
            StreamEvent::ToolCallDelta { .. } => "tool-call-delta",
            StreamEvent::ToolCallEnd { .. } => "tool-call-end",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Finish { .. } => "finish",
            StreamEvent::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_is_inline() {
        let source = ImageSource::from_client_url("data:image/jpeg;base64,AAEC");
        assert_eq!(
            source,
            ImageSource::InlineBase64 {
                mime_type: "image/jpeg".into(),
                data: "AAEC".into()
            }
        );
        assert_eq!(source.to_url(), "data:image/jpeg;base64,AAEC");
    }

    #[test]
    fn test_non_base64_data_url_stays_uri() {
        let url = "data:text/plain,hello";
        assert_eq!(
            ImageSource::from_client_url(url),
            ImageSource::Uri(url.into())
        );
    }

    #[test]
    fn test_remote_url_stays_uri() {
        let url = "https://example.com/shot.png";
        assert_eq!(
            ImageSource::from_client_url(url),
            ImageSource::Uri(url.into())
        );
    }

    #[test]
    fn test_finish_metadata_serializes_camel_case() {
        let metadata = FinishMetadata {
            usage: Some(CanonicalUsage {
                input_tokens: Some(3),
                output_tokens: Some(4),
                total_tokens: None,
            }),
            cost: None,
            model: None,
        };
        assert_eq!(
            serde_json::to_string(&metadata).unwrap(),
            r#"{"usage":{"inputTokens":3,"outputTokens":4}}"#
        );
        assert!(FinishMetadata::default().is_empty());
    }
}
