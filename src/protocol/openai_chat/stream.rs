use rustc_hash::FxHashMap;

use crate::observability::log_usage;
use crate::protocol::canonical::{CanonicalUsage, FinishMetadata, StreamEvent};
use crate::stream::{SseEvent, StreamAdapter, StreamState};
use crate::util::next_call_id;

use super::{OpenAiStreamChunk, OpenAiStreamToolCall, OpenAiUsage};

/// Adapter for Chat Completions delta streams (`OpenAI` and OpenRouter).
///
/// Native tool-call fragments are grouped by `index`. Each index maps to one
/// call for the whole response, so a fragment that follows text or another
/// index still extends its own call. Usage and OpenRouter `cost` from the
/// final chunk land in `finish`.
#[derive(Debug)]
pub struct OpenAiChatAdapter {
    model: String,
    calls: FxHashMap<u32, String>,
    metadata: FinishMetadata,
}

impl OpenAiChatAdapter {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            calls: FxHashMap::default(),
            metadata: FinishMetadata::default(),
        }
    }

    fn on_tool_fragment(
        &mut self,
        fragment: OpenAiStreamToolCall,
        state: &mut StreamState,
        out: &mut Vec<StreamEvent>,
    ) {
        let (name, arguments) = fragment
            .function
            .map(|function| (function.name, function.arguments))
            .unwrap_or_default();

        let call_id = match self.calls.get(&fragment.index) {
            Some(call_id) => call_id.clone(),
            None => {
                let call_id = fragment.id.filter(|id| !id.is_empty()).unwrap_or_else(next_call_id);
                state.open_tool_call(call_id.clone(), name.unwrap_or_default(), out);
                self.calls.insert(fragment.index, call_id.clone());
                call_id
            }
        };

        if let Some(arguments) = arguments {
            state.push_tool_args(&call_id, &arguments, out);
        }
    }

    fn on_usage(&mut self, usage: OpenAiUsage, model: Option<String>) {
        let total = usage.total_tokens.or_else(|| {
            usage
                .prompt_tokens
                .zip(usage.completion_tokens)
                .map(|(input, output)| input + output)
        });
        self.metadata.usage = Some(CanonicalUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: total,
        });
        if usage.cost.is_some() {
            self.metadata.cost = usage.cost;
        }
        if model.is_some() {
            self.metadata.model = model;
        }
    }
}

impl StreamAdapter for OpenAiChatAdapter {
    type Chunk = SseEvent;

    fn on_chunk(&mut self, frame: SseEvent, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        if frame.is_done() || frame.data.trim().is_empty() {
            return;
        }
        let chunk: OpenAiStreamChunk = match serde_json::from_str(&frame.data) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed chat completion chunk");
                return;
            }
        };

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                state.push_text(&content, out);
            }
            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                self.on_tool_fragment(fragment, state, out);
            }
        }

        if let Some(usage) = chunk.usage {
            self.on_usage(usage, chunk.model);
        }
    }

    fn on_end(&mut self, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        if let Some(usage) = &self.metadata.usage {
            log_usage("openai_chat", &self.model, usage);
        }
        state.finish(std::mem::take(&mut self.metadata), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    fn run(frames: &[&str]) -> Vec<StreamEvent> {
        let mut adapter = OpenAiChatAdapter::new("gpt-test");
        let mut state = StreamState::new("msg-1".into());
        let mut out = Vec::new();
        for data in frames {
            adapter.on_chunk(frame(data), &mut state, &mut out);
        }
        adapter.on_end(&mut state, &mut out);
        out
    }

    #[test]
    fn test_text_then_usage_with_cost() {
        let events = run(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":"Hi"}}]}"#,
            r#"{"choices":[{"delta":{"content":" there"}}]}"#,
            r#"{"model":"openai/gpt-5-mini","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12,"cost":0.0004}}"#,
            "[DONE]",
        ]);
        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(kinds, vec!["text-start", "text-delta", "text-delta", "text-end", "finish"]);
        let StreamEvent::Finish { metadata } = &events[4] else {
            panic!("expected finish");
        };
        let usage = metadata.usage.as_ref().unwrap();
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.total_tokens, Some(12));
        assert_eq!(metadata.cost, Some(0.0004));
        assert_eq!(metadata.model.as_deref(), Some("openai/gpt-5-mini"));
    }

    #[test]
    fn test_fragments_accumulate_per_index() {
        let events = run(&[
            r#"{"choices":[{"delta":{"content":"Opening"}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"open_url","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"url\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"x\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"open_url","arguments":"{}"}}]}}]}"#,
        ]);
        let expected = vec![
            StreamEvent::TextStart { block_id: "text-1".into() },
            StreamEvent::TextDelta { block_id: "text-1".into(), delta: "Opening".into() },
            StreamEvent::TextEnd { block_id: "text-1".into() },
            StreamEvent::ToolCallStart { call_id: "call_a".into(), name: "open_url".into() },
            StreamEvent::ToolCallDelta { call_id: "call_a".into(), args_fragment: "{\"url\":".into() },
            StreamEvent::ToolCallDelta { call_id: "call_a".into(), args_fragment: "\"x\"}".into() },
            StreamEvent::ToolCallStart { call_id: "call_b".into(), name: "open_url".into() },
            StreamEvent::ToolCallDelta { call_id: "call_b".into(), args_fragment: "{}".into() },
            StreamEvent::ToolCallEnd { call_id: "call_a".into() },
            StreamEvent::ToolCallEnd { call_id: "call_b".into() },
            StreamEvent::Finish { metadata: FinishMetadata::default() },
        ];
        assert_eq!(events, expected);
    }

    #[test]
    fn test_text_after_tool_call_opens_new_block() {
        let events = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"f","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"content":"done"}}]}"#,
        ]);
        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "tool-call-start",
                "tool-call-delta",
                "text-start",
                "text-delta",
                "text-end",
                "tool-call-end",
                "finish"
            ]
        );
    }

    #[test]
    fn test_revisited_index_extends_its_own_call() {
        let events = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"click","arguments":"{\"x\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"click","arguments":"{\"x\":2}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#,
        ]);
        let starts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallStart { call_id, name } => Some((call_id.as_str(), name.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![("call_a", "click"), ("call_b", "click")]);
        assert_eq!(
            events[4],
            StreamEvent::ToolCallDelta { call_id: "call_a".into(), args_fragment: "1}".into() }
        );
    }

    #[test]
    fn test_malformed_chunk_is_skipped() {
        let events = run(&[
            r#"{"choices":[{"delta":{"content":"a"}}]}"#,
            "{not json",
            r#"{"choices":[{"delta":{"content":"b"}}]}"#,
        ]);
        let deltas: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["a", "b"]);
    }
}
