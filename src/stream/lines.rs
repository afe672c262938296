use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use memchr::memchr;

use crate::error::GatewayError;

/// Split a response body into raw lines, without SSE frame assembly.
///
/// Line terminators (`\n`, optional preceding `\r`) are stripped. A final
/// unterminated line is yielded when the body ends. A body error is yielded
/// as the last item.
pub fn line_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
    GatewayError: From<E>,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (Box::pin(byte_stream), BytesMut::with_capacity(4096), 0usize, false),
        |(mut stream, mut buffer, mut scan_from, mut ended)| async move {
            loop {
                if let Some(rel) = memchr(b'\n', &buffer[scan_from..]) {
                    let line = buffer.split_to(scan_from + rel + 1).freeze();
                    scan_from = 0;
                    return Some((Ok(decode_line(&line)), (stream, buffer, scan_from, ended)));
                }
                scan_from = buffer.len();
                if ended {
                    if buffer.is_empty() {
                        return None;
                    }
                    let line = buffer.split().freeze();
                    scan_from = 0;
                    return Some((Ok(decode_line(&line)), (stream, buffer, scan_from, ended)));
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(err)) => {
                        return Some((
                            Err(GatewayError::from(err)),
                            (stream, BytesMut::new(), 0, true),
                        ));
                    }
                    None => ended = true,
                }
            }
        },
    )
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
