use axum::body::Body;
use axum::response::Response;
use futures_util::Stream;

use crate::stream::{Emitter, EventResult};

/// Wrap a canonical event sequence into a `200 text/event-stream` response.
///
/// Upstream failures travel inside the stream as `error` frames, so the
/// status is always 200 once streaming has been chosen.
pub(crate) fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = EventResult> + Send + 'static,
{
    let mut response = Response::new(Body::from_stream(Emitter::new(events)));
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
