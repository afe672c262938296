use crate::observability::log_usage;
use crate::protocol::canonical::{CanonicalUsage, FinishMetadata, StreamEvent};
use crate::stream::{StreamAdapter, StreamState};
use crate::util::extract_sse_data_payload;

use super::DashscopeChunk;

/// Adapter over the raw `data:` lines of a Dashscope SSE response.
///
/// Lines that are not `data:`, blank, `[DONE]` or undecodable are skipped.
/// Every non-empty `text` under `output.choices[0].message.content` becomes a
/// delta of one text block.
#[derive(Debug)]
pub struct DashscopeAdapter {
    model: String,
    usage: Option<CanonicalUsage>,
}

impl DashscopeAdapter {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            usage: None,
        }
    }
}

impl StreamAdapter for DashscopeAdapter {
    type Chunk = String;

    fn on_chunk(&mut self, line: String, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        let Some(payload) = extract_sse_data_payload(&line) else {
            return;
        };
        let chunk: DashscopeChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::debug!(error = %err, "skipping undecodable dashscope line");
                return;
            }
        };

        let items = chunk
            .output
            .and_then(|output| output.choices.into_iter().next())
            .and_then(|choice| choice.message)
            .map(|message| message.content)
            .unwrap_or_default();
        for item in &items {
            if let Some(text) = item.get("text").and_then(serde_json::Value::as_str) {
                state.push_text(text, out);
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(CanonicalUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage
                    .input_tokens
                    .zip(usage.output_tokens)
                    .map(|(input, output)| input + output),
            });
        }
    }

    fn on_end(&mut self, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        if let Some(usage) = &self.usage {
            log_usage("dashscope", &self.model, usage);
        }
        let metadata = FinishMetadata {
            usage: self.usage.take(),
            ..FinishMetadata::default()
        };
        state.finish(metadata, out);
    }
}
