//! System prompt templates for the guidance endpoints.

/// Reply reserved for "the previous instruction did not apply".
pub const REGENERATE_REPLY: &str = "Regenerate";

fn extra_context_section(chat_context: Option<&str>) -> String {
    match chat_context.map(str::trim) {
        Some(context) if !context.is_empty() => {
            format!("\n# Extra Context (Files + Knowledge)\n{context}\n")
        }
        _ => String::new(),
    }
}

/// Prompt for `/step`: one next action toward `goal`.
#[must_use]
pub fn build_action_prompt(
    goal: &str,
    os_name: Option<&str>,
    completed_steps: &[String],
    chat_context: Option<&str>,
) -> String {
    let mut steps_section = String::new();
    if !completed_steps.is_empty() {
        steps_section.push_str("\n# Steps Completed So Far\n");
        for (i, step) in completed_steps.iter().enumerate() {
            if i > 0 {
                steps_section.push('\n');
            }
            steps_section.push_str(&format!("{}. {step}", i + 1));
        }
        steps_section.push('\n');
    }
    let context_section = extra_context_section(chat_context);
    let os_name = os_name.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("Unknown");

    format!(
        r#"You are a UI navigation assistant helping a user complete a task by giving ONE instruction at a time.

# User's Operating System
{os_name}

# Goal
{goal}
{steps_section}{context_section}
# What You See
A screenshot of the user's current screen state.

# How to Decide the Next Action
1. Review the GOAL to understand what the user ultimately wants to achieve.
2. Review EXTRA CONTEXT, if provided, and use it as user-provided requirements and facts.
3. Analyze the SCREENSHOT to verify the current screen state matches expectations.
4. Determine what the NEXT logical step should be to achieve the goal.
5. If the screen shows something unexpected (error, different page, popup), adapt your instruction to handle it.
6. If the screen matches expectations, give the next instruction from the plan.

# Response Rules
- Give ONE specific action that advances toward the goal
- Be precise: "Click the blue 'Save' button in the bottom right" not "Click Save"
- For navigation: Return only the URL (e.g. "https://google.com")
- If something is loading: "Wait"
- If content is off-screen: "Scroll Up" or "Scroll Down"
- If the goal is complete: "Done"
- If the screen shows an unexpected state (error, wrong page), provide an instruction to recover

# Output Format
Single instruction only (no explanations, no numbering, no bolding). If the goal is achieved, return "Done""#
    )
}

/// Prompt for `/help`. The model answers with exactly [`REGENERATE_REPLY`]
/// when the previous instruction does not match the screen.
#[must_use]
pub fn build_help_prompt(
    goal: &str,
    previous_message: Option<&str>,
    chat_context: Option<&str>,
) -> String {
    let instruction_section = match previous_message.map(str::trim) {
        Some(message) if !message.is_empty() => format!("\n# Instruction Given\n{message}\n"),
        _ => String::new(),
    };
    let context_section = extra_context_section(chat_context);

    format!(
        r#"# Role
You are a friendly and helpful tech support assistant. The user is following step-by-step instructions and has a question about what they see on their screen.

# User's Goal
{goal}
{instruction_section}{context_section}
# Important
If the user indicates that the last instruction you gave does not work, is incorrect, or is not applicable to their screen (e.g., "I don't see that", "that didn't work", "there's no such button"), respond with ONLY the word "{REGENERATE_REPLY}" (nothing else).

# Guidelines
- Reference the screenshot to give specific, contextual help
- Use extra context as authoritative user-provided constraints when relevant
- Use simple language - no jargon, no emojis, no keyboard shortcuts
- Keep answers very concise and simple"#
    )
}

/// Prompt for `/check`: judge before/after screenshots, answer with a JSON verdict.
#[must_use]
pub fn build_check_prompt(instruction: &str) -> String {
    format!(
        r#"You are a strict task completion judge. Compare two screenshots to determine if a goal has been achieved.

Goal:
{instruction}

Process:
1. Analyze the "before" screenshot (first image) for the initial state.
2. Analyze the "after" screenshot (second image) for the current state.
3. Determine if the goal has been completed based on the transition.

Rules:
- Return a JSON object with "reasoning" (string) and "status" (string).
- "status" = "Yes" ONLY if extremely confident the goal is completely finished and the after screenshot clearly shows the expected end state.
- "status" = "No" if there is ANY doubt, partial completion, no meaningful change, or a pre-action state (hover, focus, loading).

The reasoning should be a short and concise explanation of the reasoning behind the status.

Example:
{{
  "reasoning": "The after screenshot shows the button clicked and a new modal appearing.",
  "status": "Yes"
}}

Return only the JSON object."#
    )
}

/// Prompt for `/coordinates`: `x,y` of a single target or `None`.
#[must_use]
pub fn build_coordinate_prompt(instruction: &str) -> String {
    format!(
        r#"You locate click targets on screen.

# Task
{instruction}

# Rules
- Output "x,y" only if exactly one unambiguous target is visible
- Output "None" otherwise

# Format
"x,y" or "None" only."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_prompt_sections() {
        let steps = vec!["Open Settings".to_string(), "Click Wi-Fi".to_string()];
        let prompt = build_action_prompt("Join a network", Some("macOS"), &steps, Some("  ssid: home  "));
        assert!(prompt.contains("# User's Operating System\nmacOS"));
        assert!(prompt.contains("# Steps Completed So Far\n1. Open Settings\n2. Click Wi-Fi"));
        assert!(prompt.contains("# Extra Context (Files + Knowledge)\nssid: home\n"));
    }

    #[test]
    fn test_action_prompt_defaults() {
        let prompt = build_action_prompt("Goal", None, &[], Some("   "));
        assert!(prompt.contains("# User's Operating System\nUnknown"));
        assert!(!prompt.contains("Steps Completed"));
        assert!(!prompt.contains("# Extra Context"));
    }

    #[test]
    fn test_help_prompt_reserves_regenerate() {
        let prompt = build_help_prompt("Goal", Some("Click Save"), None);
        assert!(prompt.contains("# Instruction Given\nClick Save"));
        assert!(prompt.contains("respond with ONLY the word \"Regenerate\""));
    }

    #[test]
    fn test_check_prompt_keeps_literal_braces() {
        let prompt = build_check_prompt("Open the menu");
        assert!(prompt.contains("Goal:\nOpen the menu"));
        assert!(prompt.contains("{\n  \"reasoning\""));
    }
}
