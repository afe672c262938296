use crate::protocol::canonical::{CanonicalMessage, ContentPart};
use crate::routing::Route;

use super::{
    DashscopeContentItem, DashscopeInput, DashscopeMessage, DashscopeParameters, DashscopeRequest,
};

/// Encode canonical messages for the multimodal generation endpoint.
///
/// Images are sent by URL, inline data URLs included.
#[must_use]
pub fn encode_dashscope_request(messages: &[CanonicalMessage], route: &Route) -> DashscopeRequest {
    let messages = messages
        .iter()
        .map(|msg| DashscopeMessage {
            role: msg.role.as_str(),
            content: msg
                .parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => DashscopeContentItem::Text(text.clone()),
                    ContentPart::Image(source) => DashscopeContentItem::Image(source.to_url()),
                })
                .collect(),
        })
        .collect();

    DashscopeRequest {
        model: route.model.clone(),
        input: DashscopeInput { messages },
        parameters: DashscopeParameters {
            incremental_output: true,
        },
    }
}
