//! Client-side view of a finished stream: rebuild the reply text from wire
//! frames and read the structured answers `/check`, `/coordinates` and
//! `/help` promise.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Deserialize;

use crate::stream::DONE_FRAME;

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*```[A-Za-z]*\s*|\s*```\s*$").ok());
static COORDINATES: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\(?\s*(\d+)(?:\.\d+)?\s*,\s*(\d+)(?:\.\d+)?\s*\)?$").ok()
});
static REGENERATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\W*regenerate\W*$").ok());

/// Concatenate every `text-delta` delta found in a wire body.
///
/// Frames that are not JSON, or not text deltas, are skipped.
#[must_use]
pub fn accumulate_text(wire: &str) -> String {
    let done = DONE_FRAME.trim();
    let mut out = String::new();
    for line in wire.lines().map(str::trim) {
        if line.is_empty() || line == done {
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        match serde_json::from_str::<serde_json::Value>(data.trim_start()) {
            Ok(frame) if frame["type"] == "text-delta" => {
                if let Some(delta) = frame["delta"].as_str() {
                    out.push_str(delta);
                }
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "skipping unparsable wire frame"),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CheckStatus {
    Yes,
    No,
}

/// The `/check` judge's answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckVerdict {
    #[serde(default)]
    pub reasoning: String,
    pub status: CheckStatus,
}

impl CheckVerdict {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == CheckStatus::Yes
    }
}

fn strip_code_fence(text: &str) -> String {
    match CODE_FENCE.as_ref() {
        Some(fence) => fence.replace_all(text.trim(), "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Parse the judge's JSON, tolerating surrounding whitespace and a
/// markdown code fence.
#[must_use]
pub fn parse_check_verdict(text: &str) -> Option<CheckVerdict> {
    serde_json::from_str(&strip_code_fence(text)).ok()
}

/// Whether the step is judged done. Falls back to a substring check when the
/// reply is not valid JSON.
#[must_use]
pub fn is_step_complete(text: &str) -> bool {
    parse_check_verdict(text).map_or_else(
        || text.contains("\"status\": \"Yes\"") || text.contains("\"status\":\"Yes\""),
        |verdict| verdict.is_complete(),
    )
}

/// Pixel position on the screenshot, in original-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinates {
    pub x: u32,
    pub y: u32,
}

/// Parse an `x,y` reply. `None` (the literal) and anything unparsable give
/// `None`; fractional parts are truncated.
#[must_use]
pub fn parse_coordinates(text: &str) -> Option<Coordinates> {
    let captures = COORDINATES.as_ref()?.captures(text.trim())?;
    let x = captures.get(1)?.as_str().parse().ok()?;
    let y = captures.get(2)?.as_str().parse().ok()?;
    Some(Coordinates { x, y })
}

/// Whether a `/help` reply asks the client to regenerate the instruction.
#[must_use]
pub fn is_regenerate(text: &str) -> bool {
    REGENERATE
        .as_ref()
        .is_some_and(|re| re.is_match(text.trim()))
}
