//! Incremental SSE parsing for upstream response bodies.
//!
//! Frames are split on blank lines; `data:` lines are joined with `\n`,
//! `event:` names the frame, comments and unknown fields are dropped.

use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;

use crate::error::GatewayError;

/// One complete SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE line parser.
///
/// Feed it text chunks split at arbitrary boundaries; complete frames come
/// out once their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed text and append complete frames into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut frame = FrameBuilder {
            event_type: &mut self.event_type,
            data_buffer: &mut self.data_buffer,
            has_data: &mut self.has_data,
        };
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            frame.process_line(line.strip_suffix('\r').unwrap_or(line), out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= 8 * 1024 || self.read_offset >= self.buffer.len() / 2 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Emit a frame left without its terminating blank line at end of body.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let mut frame = FrameBuilder {
            event_type: &mut self.event_type,
            data_buffer: &mut self.data_buffer,
            has_data: &mut self.has_data,
        };
        let rest = &self.buffer[self.read_offset..];
        if !rest.is_empty() {
            frame.process_line(rest.strip_suffix('\r').unwrap_or(rest), &mut Vec::new());
        }
        self.buffer.clear();
        self.read_offset = 0;
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            event: self.event_type.take(),
            data: std::mem::take(&mut self.data_buffer),
        })
    }
}

/// Field state of the frame being assembled, borrowed apart from the line buffer.
struct FrameBuilder<'a> {
    event_type: &'a mut Option<String>,
    data_buffer: &'a mut String,
    has_data: &'a mut bool,
}

impl FrameBuilder<'_> {
    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if *self.has_data {
                out.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(self.data_buffer),
                });
                *self.has_data = false;
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *self.has_data {
                self.data_buffer.push('\n');
            } else {
                *self.has_data = true;
            }
            self.data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *self.event_type = Some(value.to_string());
        }
    }
}

/// Carries an incomplete UTF-8 sequence over to the next body chunk.
#[derive(Debug, Default)]
pub(crate) struct Utf8Carry {
    remainder: Vec<u8>,
}

impl Utf8Carry {
    /// Decode as much of `bytes` as forms complete characters.
    ///
    /// Invalid sequences (as opposed to truncated ones) are replaced lossily.
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.remainder.extend_from_slice(bytes);
        let (text, consumed) = match std::str::from_utf8(&self.remainder) {
            Ok(text) => (text.to_string(), self.remainder.len()),
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                (
                    String::from_utf8_lossy(&self.remainder[..valid]).into_owned(),
                    valid,
                )
            }
            Err(_) => (
                String::from_utf8_lossy(&self.remainder).into_owned(),
                self.remainder.len(),
            ),
        };
        self.remainder.drain(..consumed);
        text
    }
}

/// Split a response body into SSE frames.
///
/// Body errors are surfaced as the final item instead of ending the stream
/// silently, so callers can tell a dropped connection from a clean end.
/// `[DONE]` frames are passed through; adapters decide what they mean.
pub fn sse_frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
    GatewayError: From<E>,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseParser::new(),
            Utf8Carry::default(),
            std::collections::VecDeque::<SseEvent>::with_capacity(8),
            false,
        ),
        |(mut stream, mut parser, mut carry, mut pending, mut ended)| async move {
            let mut parsed = Vec::with_capacity(4);
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (stream, parser, carry, pending, ended)));
                }
                if ended {
                    return None;
                }
                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        let text = carry.decode(&bytes);
                        parser.feed_into(&text, &mut parsed);
                        pending.extend(parsed.drain(..));
                    }
                    Some(Err(err)) => {
                        ended = true;
                        return Some((
                            Err(GatewayError::from(err)),
                            (stream, parser, carry, pending, ended),
                        ));
                    }
                    None => {
                        ended = true;
                        if let Some(event) = parser.finish() {
                            pending.push_back(event);
                        }
                    }
                }
            }
        },
    )
}
