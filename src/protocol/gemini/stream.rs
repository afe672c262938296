use crate::observability::log_usage;
use crate::protocol::canonical::{CanonicalUsage, FinishMetadata, StreamEvent};
use crate::stream::{SseEvent, StreamAdapter, StreamState};

use super::GeminiResponse;

/// Adapter for `streamGenerateContent?alt=sse` chunks.
///
/// Each chunk contributes the joined text of its first candidate; thought
/// parts are skipped.
#[derive(Debug)]
pub struct GeminiAdapter {
    model: String,
    metadata: FinishMetadata,
}

impl GeminiAdapter {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            metadata: FinishMetadata::default(),
        }
    }
}

/// Visible text of the first candidate, or `None` when it has none.
#[must_use]
pub fn candidate_text(chunk: &GeminiResponse) -> Option<String> {
    let content = chunk.candidates.first()?.content.as_ref()?;
    let mut text = String::new();
    for part in &content.parts {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(t) = &part.text {
            text.push_str(t);
        }
    }
    (!text.is_empty()).then_some(text)
}

impl StreamAdapter for GeminiAdapter {
    type Chunk = SseEvent;

    fn on_chunk(&mut self, frame: SseEvent, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        if frame.is_done() || frame.data.trim().is_empty() {
            return;
        }
        let chunk: GeminiResponse = match serde_json::from_str(&frame.data) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed Gemini chunk");
                return;
            }
        };

        if let Some(text) = candidate_text(&chunk) {
            state.push_text(&text, out);
        }

        if let Some(usage) = chunk.usage_metadata {
            self.metadata.usage = Some(CanonicalUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            });
            if chunk.model_version.is_some() {
                self.metadata.model = chunk.model_version;
            }
        }
    }

    fn on_end(&mut self, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        if let Some(usage) = &self.metadata.usage {
            log_usage("gemini", &self.model, usage);
        }
        state.finish(std::mem::take(&mut self.metadata), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(frames: &[&str]) -> Vec<StreamEvent> {
        let mut adapter = GeminiAdapter::new("gemini-test");
        let mut state = StreamState::new("msg-1".into());
        let mut out = Vec::new();
        for data in frames {
            adapter.on_chunk(
                SseEvent {
                    event: None,
                    data: (*data).to_string(),
                },
                &mut state,
                &mut out,
            );
        }
        adapter.on_end(&mut state, &mut out);
        out
    }

    #[test]
    fn test_single_block_with_usage() {
        let events = run(&[
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"thinking...","thought":true}]}}]}"#,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{\"reasoning\":"}]}}]}"#,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"\"ok\","},{"text":"\"status\":\"Yes\"}"}]}}]}"#,
            r#"{"candidates":[{"content":{"role":"model","parts":[]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":100,"candidatesTokenCount":9,"totalTokenCount":109},"modelVersion":"gemini-3-flash-preview"}"#,
        ]);
        let expected_head = vec![
            StreamEvent::TextStart { block_id: "text-1".into() },
            StreamEvent::TextDelta { block_id: "text-1".into(), delta: "{\"reasoning\":".into() },
            StreamEvent::TextDelta {
                block_id: "text-1".into(),
                delta: "\"ok\",\"status\":\"Yes\"}".into(),
            },
            StreamEvent::TextEnd { block_id: "text-1".into() },
        ];
        assert_eq!(events[..4], expected_head[..]);
        let StreamEvent::Finish { metadata } = &events[4] else {
            panic!("expected finish");
        };
        assert_eq!(metadata.usage.as_ref().unwrap().total_tokens, Some(109));
        assert_eq!(metadata.model.as_deref(), Some("gemini-3-flash-preview"));
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn test_no_text_means_no_block() {
        let events = run(&[r#"{"candidates":[]}"#]);
        assert_eq!(
            events,
            vec![StreamEvent::Finish {
                metadata: FinishMetadata::default()
            }]
        );
    }
}
