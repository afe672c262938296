//! Endpoint request bodies and their translation into canonical messages.
//!
//! Everything here is pure: same request in, same message list out.

use serde::Deserialize;
use smallvec::SmallVec;

use super::canonical::{CanonicalMessage, CanonicalRole, ContentPart, ImageSource};
use super::prompts;

/// Stand-in for the previous screenshot in follow-up conversations.
pub const PREVIOUS_SCREENSHOT_PLACEHOLDER: &str =
    "[Previous screenshot of my screen was provided here]";
pub const BEFORE_LABEL: &str = "Before screenshot:";
pub const AFTER_LABEL: &str = "After screenshot:";

#[derive(Debug, Clone, Deserialize)]
pub struct FollowUpContext {
    /// Accepted for client compatibility; never forwarded upstream.
    #[serde(default)]
    pub previous_image: Option<String>,
    pub previous_instruction: String,
    pub follow_up_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepRequest {
    pub goal: String,
    pub image: String,
    #[serde(default)]
    pub os_name: Option<String>,
    #[serde(default)]
    pub completed_steps: Option<Vec<String>>,
    #[serde(default)]
    pub chat_context: Option<String>,
    #[serde(default)]
    pub follow_up_context: Option<FollowUpContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelpRequest {
    pub goal: String,
    pub image: String,
    pub user_question: String,
    #[serde(default)]
    pub previous_message: Option<String>,
    #[serde(default)]
    pub chat_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub instruction: String,
    pub before_image: String,
    pub after_image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatesRequest {
    pub instruction: String,
    pub image: String,
}

fn image(url: &str) -> ContentPart {
    ContentPart::Image(ImageSource::from_client_url(url.trim()))
}

fn user_with_image(text: Option<&str>, url: &str) -> CanonicalMessage {
    let mut parts: SmallVec<[ContentPart; 2]> = SmallVec::new();
    if let Some(text) = text {
        parts.push(ContentPart::Text(text.to_string()));
    }
    parts.push(image(url));
    CanonicalMessage {
        role: CanonicalRole::User,
        parts,
    }
}

/// Two messages, or four with a follow-up: the previous image is replaced by
/// a textual placeholder so it is never re-sent.
#[must_use]
pub fn build_step_messages(req: &StepRequest) -> Vec<CanonicalMessage> {
    let system = prompts::build_action_prompt(
        &req.goal,
        req.os_name.as_deref(),
        req.completed_steps.as_deref().unwrap_or_default(),
        req.chat_context.as_deref(),
    );

    match &req.follow_up_context {
        Some(follow_up) => vec![
            CanonicalMessage::text(CanonicalRole::System, system),
            CanonicalMessage::text(CanonicalRole::User, PREVIOUS_SCREENSHOT_PLACEHOLDER),
            CanonicalMessage::text(CanonicalRole::Assistant, follow_up.previous_instruction.clone()),
            user_with_image(Some(&follow_up.follow_up_message), &req.image),
        ],
        None => vec![
            CanonicalMessage::text(CanonicalRole::System, system),
            user_with_image(None, &req.image),
        ],
    }
}

#[must_use]
pub fn build_help_messages(req: &HelpRequest) -> Vec<CanonicalMessage> {
    let system = prompts::build_help_prompt(
        &req.goal,
        req.previous_message.as_deref(),
        req.chat_context.as_deref(),
    );
    vec![
        CanonicalMessage::text(CanonicalRole::System, system),
        user_with_image(Some(&req.user_question), &req.image),
    ]
}

#[must_use]
pub fn build_check_messages(req: &CheckRequest) -> Vec<CanonicalMessage> {
    let system = prompts::build_check_prompt(&req.instruction);
    let user = CanonicalMessage::with_parts(
        CanonicalRole::User,
        [
            ContentPart::Text(BEFORE_LABEL.to_string()),
            image(&req.before_image),
            ContentPart::Text(AFTER_LABEL.to_string()),
            image(&req.after_image),
        ],
    );
    vec![CanonicalMessage::text(CanonicalRole::System, system), user]
}

#[must_use]
pub fn build_coordinates_messages(req: &CoordinatesRequest) -> Vec<CanonicalMessage> {
    vec![
        CanonicalMessage::text(
            CanonicalRole::System,
            prompts::build_coordinate_prompt(&req.instruction),
        ),
        user_with_image(None, &req.image),
    ]
}
