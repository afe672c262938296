use std::sync::{Arc, LazyLock};

use memchr::memmem;

use crate::fc::registry::ToolRegistry;
use crate::json_scan::{complete_object_len, could_start_object};
use crate::protocol::canonical::StreamEvent;
use crate::stream::StreamState;
use crate::util::next_call_id;

// Inline tool invocations look like
//
//     <invoke name="TOOL">{"json": "arguments"}</invoke>
//
// with the closing tag optional. Text is scanned as it streams: anything that
// cannot be part of the opening trigger is released at once, and a possible
// trigger prefix at the end of a delta is held back until the next delta
// settles it.

const TRIGGER: &str = "<invoke name=\"";
const CLOSE_TAG: &str = "</invoke>";
const MAX_NAME_LEN: usize = 128;
/// Cap on a single invocation's buffered arguments.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

static TRIGGER_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(TRIGGER.as_bytes()));

/// Output of the scanner, before block ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    Text(String),
    CallStart(String),
    CallArgs(String),
    CallEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    /// Trigger seen, waiting for `NAME">`.
    Header,
    /// Inside a registered call, buffering arguments.
    Args,
    /// Arguments complete; swallowing an optional `</invoke>`.
    AfterArgs,
}

#[derive(Debug)]
struct PendingCall {
    name: String,
    args: String,
}

/// Text-level state machine that splits a text stream into plain text and
/// inline tool invocations.
#[derive(Debug)]
pub(crate) struct InvocationScanner {
    registry: Arc<ToolRegistry>,
    buffer: String,
    mode: Mode,
    call: Option<PendingCall>,
}

impl InvocationScanner {
    pub(crate) fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            buffer: String::new(),
            mode: Mode::Text,
            call: None,
        }
    }

    pub(crate) fn feed(&mut self, text: &str, out: &mut Vec<Piece>) {
        if text.is_empty() {
            return;
        }
        if self.mode == Mode::Text && self.buffer.is_empty() && memchr::memchr(b'<', text.as_bytes()).is_none() {
            out.push(Piece::Text(text.to_string()));
            return;
        }

        self.buffer.push_str(text);
        loop {
            match self.mode {
                Mode::Text => {
                    if let Some(at) = TRIGGER_FINDER.find(self.buffer.as_bytes()) {
                        self.release_text(at, out);
                        self.mode = Mode::Header;
                        continue;
                    }
                    let keep = held_prefix_len(&self.buffer, TRIGGER);
                    self.release_text(self.buffer.len() - keep, out);
                    return;
                }
                Mode::Header => {
                    if !self.step_header(out) {
                        return;
                    }
                }
                Mode::Args => {
                    if !self.step_args(out) {
                        return;
                    }
                }
                Mode::AfterArgs => {
                    let trimmed = self.buffer.trim_start();
                    if trimmed.is_empty() {
                        return;
                    }
                    if trimmed.starts_with(CLOSE_TAG) {
                        let consumed = self.buffer.len() - trimmed.len() + CLOSE_TAG.len();
                        self.buffer.drain(..consumed);
                    } else if CLOSE_TAG.starts_with(trimmed) {
                        return;
                    }
                    self.mode = Mode::Text;
                }
            }
        }
    }

    /// Flush everything held. An unfinished call is closed with the
    /// arguments received so far.
    pub(crate) fn finalize(&mut self, out: &mut Vec<Piece>) {
        match self.mode {
            Mode::Text | Mode::Header => {
                let len = self.buffer.len();
                self.release_text(len, out);
            }
            Mode::Args => {
                if !self.buffer.is_empty() {
                    let rest = std::mem::take(&mut self.buffer);
                    if let Some(call) = self.call.as_mut() {
                        call.args.push_str(&rest);
                    }
                    out.push(Piece::CallArgs(rest));
                }
                if let Some(call) = self.call.take() {
                    tracing::warn!(
                        tool = %call.name,
                        buffered = call.args.len(),
                        "tool call finalized before its arguments completed"
                    );
                }
                out.push(Piece::CallEnd);
            }
            Mode::AfterArgs => {
                if self.buffer.trim().is_empty() {
                    self.buffer.clear();
                } else {
                    let len = self.buffer.len();
                    self.release_text(len, out);
                }
            }
        }
        self.mode = Mode::Text;
    }

    fn release_text(&mut self, upto: usize, out: &mut Vec<Piece>) {
        if upto == 0 {
            return;
        }
        let text: String = self.buffer.drain(..upto).collect();
        out.push(Piece::Text(text));
    }

    /// Returns `false` when more input is needed.
    fn step_header(&mut self, out: &mut Vec<Piece>) -> bool {
        let name_start = TRIGGER.len();
        let Some(rel_quote) = self.buffer[name_start..].find('"') else {
            if self.buffer.len() - name_start > MAX_NAME_LEN {
                self.reject_header(out);
                return true;
            }
            return false;
        };
        let quote = name_start + rel_quote;
        match self.buffer.as_bytes().get(quote + 1) {
            None => false,
            Some(b'>') => {
                let name = self.buffer[name_start..quote].to_string();
                if self.registry.contains(&name) {
                    self.buffer.drain(..quote + 2);
                    out.push(Piece::CallStart(name.clone()));
                    self.call = Some(PendingCall {
                        name,
                        args: String::new(),
                    });
                    self.mode = Mode::Args;
                } else {
                    tracing::debug!(tool = %name, "unregistered tool invocation kept as text");
                    self.release_text(quote + 2, out);
                    self.mode = Mode::Text;
                }
                true
            }
            Some(_) => {
                self.reject_header(out);
                true
            }
        }
    }

    /// Not an invocation after all: release the `<` and rescan the rest.
    fn reject_header(&mut self, out: &mut Vec<Piece>) {
        self.release_text(1, out);
        self.mode = Mode::Text;
    }

    /// Returns `false` when more input is needed.
    fn step_args(&mut self, out: &mut Vec<Piece>) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        let Some(call) = self.call.as_mut() else {
            self.mode = Mode::Text;
            return true;
        };

        let before = call.args.len();
        call.args.push_str(&self.buffer);

        if let Some(end) = complete_object_len(&call.args) {
            let fragment: String = self.buffer.drain(..end - before).collect();
            call.args.truncate(end);
            out.push(Piece::CallArgs(fragment));
            check_arguments(&self.registry, call);
            self.call = None;
            out.push(Piece::CallEnd);
            self.mode = Mode::AfterArgs;
            return true;
        }

        if !could_start_object(&call.args) {
            call.args.truncate(before);
            tracing::warn!(tool = %call.name, "tool call arguments are not a JSON object");
            self.call = None;
            out.push(Piece::CallEnd);
            self.mode = Mode::Text;
            return true;
        }

        let fragment = std::mem::take(&mut self.buffer);
        out.push(Piece::CallArgs(fragment));
        if call.args.len() > MAX_PENDING_BYTES {
            tracing::warn!(
                tool = %call.name,
                buffered = call.args.len(),
                "tool call arguments exceeded buffer cap, closing call"
            );
            self.call = None;
            out.push(Piece::CallEnd);
            self.mode = Mode::Text;
        }
        false
    }
}

fn check_arguments(registry: &ToolRegistry, call: &PendingCall) {
    match serde_json::from_str::<serde_json::Value>(&call.args) {
        Ok(arguments) => {
            for error in registry.validate_arguments(&call.name, &arguments) {
                tracing::warn!(tool = %call.name, %error, "tool call arguments do not match schema");
            }
        }
        Err(err) => {
            tracing::warn!(tool = %call.name, error = %err, "tool call arguments are not valid JSON");
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `pattern`.
fn held_prefix_len(text: &str, pattern: &str) -> usize {
    let max = text.len().min(pattern.len() - 1);
    (1..=max)
        .rev()
        .find(|&k| text.as_bytes().ends_with(&pattern.as_bytes()[..k]))
        .unwrap_or(0)
}

/// Rewrites an adapter's text events so inline invocations of registered
/// tools become tool-call events.
///
/// Native tool-call events and every non-text event pass through unchanged.
#[derive(Debug)]
pub struct ToolCallExtractor {
    scanner: InvocationScanner,
    pieces: Vec<Piece>,
    out_block: Option<String>,
    reusable_block_id: Option<String>,
    call_id: Option<String>,
}

impl ToolCallExtractor {
    /// `None` when no tools are registered.
    #[must_use]
    pub fn for_registry(registry: &Arc<ToolRegistry>) -> Option<Self> {
        if registry.is_empty() {
            return None;
        }
        Some(Self {
            scanner: InvocationScanner::new(Arc::clone(registry)),
            pieces: Vec::with_capacity(4),
            out_block: None,
            reusable_block_id: None,
            call_id: None,
        })
    }

    pub fn process<I>(&mut self, events: I, state: &mut StreamState, out: &mut Vec<StreamEvent>)
    where
        I: IntoIterator<Item = StreamEvent>,
    {
        for event in events {
            match event {
                StreamEvent::TextStart { block_id } => {
                    self.reusable_block_id = Some(block_id);
                }
                StreamEvent::TextDelta { delta, .. } => {
                    self.scanner.feed(&delta, &mut self.pieces);
                    self.apply_pieces(state, out);
                }
                StreamEvent::TextEnd { .. } => self.flush(state, out),
                event @ StreamEvent::Finish { .. } => {
                    self.flush(state, out);
                    out.push(event);
                }
                other => out.push(other),
            }
        }
    }

    fn flush(&mut self, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        self.scanner.finalize(&mut self.pieces);
        self.apply_pieces(state, out);
        self.close_text(out);
        self.reusable_block_id = None;
    }

    fn close_text(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(block_id) = self.out_block.take() {
            out.push(StreamEvent::TextEnd { block_id });
        }
    }

    fn apply_pieces(&mut self, state: &mut StreamState, out: &mut Vec<StreamEvent>) {
        for piece in self.pieces.drain(..) {
            match piece {
                Piece::Text(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    let block_id = match &self.out_block {
                        Some(id) => id.clone(),
                        None => {
                            let id = self
                                .reusable_block_id
                                .take()
                                .unwrap_or_else(|| state.next_block_id());
                            out.push(StreamEvent::TextStart {
                                block_id: id.clone(),
                            });
                            self.out_block = Some(id.clone());
                            id
                        }
                    };
                    out.push(StreamEvent::TextDelta { block_id, delta });
                }
                Piece::CallStart(name) => {
                    if let Some(block_id) = self.out_block.take() {
                        out.push(StreamEvent::TextEnd { block_id });
                    }
                    let call_id = next_call_id();
                    self.call_id = Some(call_id.clone());
                    out.push(StreamEvent::ToolCallStart { call_id, name });
                }
                Piece::CallArgs(args_fragment) => {
                    if let Some(call_id) = &self.call_id {
                        out.push(StreamEvent::ToolCallDelta {
                            call_id: call_id.clone(),
                            args_fragment,
                        });
                    }
                }
                Piece::CallEnd => {
                    if let Some(call_id) = self.call_id.take() {
                        out.push(StreamEvent::ToolCallEnd { call_id });
                    }
                }
            }
        }
    }
}
