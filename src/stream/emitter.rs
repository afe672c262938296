use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::error::GatewayError;
use crate::protocol::canonical::StreamEvent;
use crate::util::push_json_string_escaped;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Append one `data: <json>\n\n` frame for `event` to `out`.
pub fn encode_event(event: &StreamEvent, out: &mut String) {
    if matches!(event, StreamEvent::Done) {
        out.push_str(DONE_FRAME);
        return;
    }

    out.push_str("data: {\"type\":\"");
    out.push_str(event.kind());
    out.push('"');
    match event {
        StreamEvent::Start { message_id } => push_field(out, "messageId", message_id),
        StreamEvent::TextStart { block_id } | StreamEvent::TextEnd { block_id } => {
            push_field(out, "id", block_id);
        }
        StreamEvent::TextDelta { block_id, delta } => {
            push_field(out, "id", block_id);
            push_field(out, "delta", delta);
        }
        StreamEvent::ToolCallStart { call_id, name } => {
            push_field(out, "id", call_id);
            push_field(out, "name", name);
        }
        StreamEvent::ToolCallDelta {
            call_id,
            args_fragment,
        } => {
            push_field(out, "id", call_id);
            push_field(out, "argsFragment", args_fragment);
        }
        StreamEvent::ToolCallEnd { call_id } => push_field(out, "id", call_id),
        StreamEvent::Error { message } => push_field(out, "error", message),
        StreamEvent::Finish { metadata } => {
            if !metadata.is_empty() {
                if let Ok(json) = serde_json::to_string(metadata) {
                    out.push_str(",\"messageMetadata\":");
                    out.push_str(&json);
                }
            }
        }
        StreamEvent::Done => {}
    }
    out.push_str("}\n\n");
}

#[inline]
fn push_field(out: &mut String, key: &str, value: &str) {
    out.push_str(",\"");
    out.push_str(key);
    out.push_str("\":");
    push_json_string_escaped(out, value);
}

pin_project! {
    /// Serializes a canonical event sequence into SSE wire frames.
    ///
    /// A terminal `Err` becomes an `error` frame. The `[DONE]` sentinel is
    /// written exactly once, appended if the inner sequence never produced it.
    pub struct Emitter<S> {
        #[pin]
        inner: S,
        done_sent: bool,
        exhausted: bool,
    }
}

impl<S> Emitter<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            done_sent: false,
            exhausted: false,
        }
    }
}

impl<S> Stream for Emitter<S>
where
    S: Stream<Item = Result<StreamEvent, GatewayError>>,
{
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.exhausted {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(event))) => {
                if *this.done_sent {
                    // Nothing may follow the sentinel.
                    *this.exhausted = true;
                    return Poll::Ready(None);
                }
                if matches!(event, StreamEvent::Done) {
                    *this.done_sent = true;
                }
                let mut frame = String::with_capacity(64);
                encode_event(&event, &mut frame);
                Poll::Ready(Some(Ok(Bytes::from(frame))))
            }
            Poll::Ready(Some(Err(err))) => {
                tracing::warn!(error = %err, "stream ended with error");
                let mut frame = String::with_capacity(64);
                encode_event(
                    &StreamEvent::Error {
                        message: err.to_string(),
                    },
                    &mut frame,
                );
                Poll::Ready(Some(Ok(Bytes::from(frame))))
            }
            Poll::Ready(None) => {
                *this.exhausted = true;
                if *this.done_sent {
                    Poll::Ready(None)
                } else {
                    *this.done_sent = true;
                    Poll::Ready(Some(Ok(Bytes::from_static(DONE_FRAME.as_bytes()))))
                }
            }
        }
    }
}
