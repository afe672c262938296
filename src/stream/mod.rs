//! Streaming core: upstream chunk sources, the per-request [`StreamState`],
//! the [`StreamAdapter`] contract and the generic pipeline that drives an
//! adapter into a canonical event sequence.

pub mod emitter;
pub mod lines;
pub mod sse;

pub use emitter::{encode_event, Emitter, DONE_FRAME};
pub use lines::line_stream;
pub use sse::{sse_frame_stream, SseEvent, SseParser};

use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};

use crate::error::GatewayError;
use crate::fc::extractor::ToolCallExtractor;
use crate::observability::StreamTimer;
use crate::protocol::canonical::{FinishMetadata, StreamEvent};
use crate::util::next_message_id;

/// Item type produced by [`adapt_stream`]. An `Err` is always the last item.
pub type EventResult = Result<StreamEvent, GatewayError>;

/// Translator from one provider-native chunk type to canonical events.
///
/// Adapters are synchronous: all I/O happens in the pipeline that feeds them.
/// Block bookkeeping goes through the [`StreamState`] handed in on every call.
pub trait StreamAdapter: Send {
    type Chunk: Send;

    fn on_chunk(&mut self, chunk: Self::Chunk, state: &mut StreamState, out: &mut Vec<StreamEvent>);

    /// Upstream exhausted cleanly. Must end with [`StreamState::finish`].
    fn on_end(&mut self, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        state.finish(FinishMetadata::default(), out);
    }
}

/// Per-request block bookkeeping shared by the adapter and the extractor.
///
/// At most one text block is open at a time. Tool calls stay open until the
/// stream ends, so fragments for an earlier call may follow text or another
/// call.
#[derive(Debug)]
pub struct StreamState {
    message_id: String,
    text_block: Option<String>,
    block_counter: u32,
    tool_calls: Vec<String>,
    finished: bool,
}

impl StreamState {
    #[must_use]
    pub fn new(message_id: String) -> Self {
        Self {
            message_id,
            text_block: None,
            block_counter: 0,
            tool_calls: Vec::new(),
            finished: false,
        }
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Allocate the next text block id (`text-1`, `text-2`, ...).
    pub fn next_block_id(&mut self) -> String {
        self.block_counter += 1;
        let mut id = String::with_capacity(8);
        id.push_str("text-");
        id.push_str(&self.block_counter.to_string());
        id
    }

    /// Append text, opening a block first when none is open.
    pub fn push_text(&mut self, delta: &str, out: &mut Vec<StreamEvent>) {
        if delta.is_empty() {
            return;
        }
        let block_id = match &self.text_block {
            Some(id) => id.clone(),
            None => {
                let id = self.next_block_id();
                out.push(StreamEvent::TextStart {
                    block_id: id.clone(),
                });
                self.text_block = Some(id.clone());
                id
            }
        };
        out.push(StreamEvent::TextDelta {
            block_id,
            delta: delta.to_string(),
        });
    }

    pub fn close_text(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(block_id) = self.text_block.take() {
            out.push(StreamEvent::TextEnd { block_id });
        }
    }

    /// Open a tool call, closing any open text block first.
    pub fn open_tool_call(&mut self, call_id: String, name: String, out: &mut Vec<StreamEvent>) {
        self.close_text(out);
        out.push(StreamEvent::ToolCallStart {
            call_id: call_id.clone(),
            name,
        });
        self.tool_calls.push(call_id);
    }

    /// Emit an argument fragment for the open call `call_id`.
    ///
    /// Fragments for calls that were never opened or already ended are
    /// dropped.
    pub fn push_tool_args(&mut self, call_id: &str, fragment: &str, out: &mut Vec<StreamEvent>) {
        if fragment.is_empty() {
            return;
        }
        if !self.tool_calls.iter().any(|open| open == call_id) {
            tracing::warn!(call_id, "dropping argument fragment for a call that is not open");
            return;
        }
        out.push(StreamEvent::ToolCallDelta {
            call_id: call_id.to_string(),
            args_fragment: fragment.to_string(),
        });
    }

    /// End every open call in the order they were started.
    pub fn close_tool_calls(&mut self, out: &mut Vec<StreamEvent>) {
        out.extend(
            self.tool_calls
                .drain(..)
                .map(|call_id| StreamEvent::ToolCallEnd { call_id }),
        );
    }

    /// Close whatever is still open without emitting `finish`.
    pub fn close_blocks(&mut self, out: &mut Vec<StreamEvent>) {
        self.close_text(out);
        self.close_tool_calls(out);
    }

    /// Close open blocks and emit the single `finish` event.
    pub fn finish(&mut self, metadata: FinishMetadata, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }
        self.close_blocks(out);
        self.finished = true;
        out.push(StreamEvent::Finish { metadata });
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

struct Pipeline<A: StreamAdapter> {
    chunks: std::pin::Pin<Box<dyn Stream<Item = Result<A::Chunk, GatewayError>> + Send>>,
    adapter: A,
    extractor: Option<ToolCallExtractor>,
    state: StreamState,
    scratch: Vec<StreamEvent>,
    pending: VecDeque<EventResult>,
    timer: StreamTimer,
    ended: bool,
}

impl<A: StreamAdapter> Pipeline<A> {
    fn flush_scratch(&mut self) {
        if let Some(extractor) = self.extractor.as_mut() {
            let mut routed = Vec::with_capacity(self.scratch.len() + 2);
            extractor.process(self.scratch.drain(..), &mut self.state, &mut routed);
            self.pending.extend(routed.into_iter().map(Ok));
        } else {
            self.pending.extend(self.scratch.drain(..).map(Ok));
        }
    }
}

/// Drive `adapter` over `chunks`, producing the canonical event sequence.
///
/// The sequence always opens with `start`. A clean end yields the adapter's
/// closing events, `finish` and `done`. A chunk error closes open blocks and
/// yields the error as the final item; the emitter writes the sentinel.
pub fn adapt_stream<S, A>(
    chunks: S,
    adapter: A,
    extractor: Option<ToolCallExtractor>,
    timer: StreamTimer,
) -> impl Stream<Item = EventResult> + Send
where
    S: Stream<Item = Result<A::Chunk, GatewayError>> + Send + 'static,
    A: StreamAdapter + 'static,
{
    let state = StreamState::new(next_message_id());
    let mut pending = VecDeque::with_capacity(8);
    pending.push_back(Ok(StreamEvent::Start {
        message_id: state.message_id().to_string(),
    }));

    let pipeline = Pipeline {
        chunks: Box::pin(chunks),
        adapter,
        extractor,
        state,
        scratch: Vec::with_capacity(8),
        pending,
        timer,
        ended: false,
    };

    futures_util::stream::unfold(pipeline, |mut p| async move {
        loop {
            if let Some(item) = p.pending.pop_front() {
                return Some((item, p));
            }
            if p.ended {
                return None;
            }

            match p.chunks.next().await {
                Some(Ok(chunk)) => {
                    p.timer.mark_chunk();
                    p.adapter.on_chunk(chunk, &mut p.state, &mut p.scratch);
                    p.flush_scratch();
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "upstream stream failed mid-flight");
                    p.state.close_blocks(&mut p.scratch);
                    p.flush_scratch();
                    p.pending.push_back(Err(err));
                    p.ended = true;
                    p.timer.complete();
                }
                None => {
                    p.adapter.on_end(&mut p.state, &mut p.scratch);
                    if !p.state.is_finished() {
                        p.state.finish(FinishMetadata::default(), &mut p.scratch);
                    }
                    p.flush_scratch();
                    p.pending.push_back(Ok(StreamEvent::Done));
                    p.ended = true;
                    p.timer.complete();
                }
            }
        }
    })
}

/// A sequence holding a single failure, for errors raised before streaming.
pub fn failed_stream(err: GatewayError) -> impl Stream<Item = EventResult> + Send {
    futures_util::stream::iter([Err(err)])
}

/// Collect every `Ok` event of a finite stream, stopping at the first `Err`.
///
/// Used by tests and by non-streaming callers that need the whole reply.
pub async fn collect_events<S>(stream: S) -> (Vec<StreamEvent>, Option<GatewayError>)
where
    S: Stream<Item = EventResult>,
{
    let mut stream = std::pin::pin!(stream);
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(err) => return (events, Some(err)),
        }
    }
    (events, None)
}
