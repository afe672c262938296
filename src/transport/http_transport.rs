use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;

use crate::config::ServerConfig;
use crate::error::GatewayError;

const UPSTREAM_ERROR_BODY_MAX_CHARS: usize = 2_000;
const UPSTREAM_ERROR_BODY_MAX_BYTES: usize = 8 * 1024;

fn build_reqwest_client(config: &ServerConfig) -> Result<reqwest::Client, GatewayError> {
    let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
    };

    // Read timeout rather than a total deadline: streams may run longer than
    // `timeout` as long as chunks keep arriving.
    reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_pool_max_idle_per_host.max(1))
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .read_timeout(Duration::from_secs(config.timeout))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client shared by every upstream call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    response_timeout: Duration,
}

impl HttpTransport {
    /// Build the transport from server settings.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the TLS backend cannot be initialized.
    pub fn new(config: &ServerConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_reqwest_client(config)?,
            response_timeout: Duration::from_secs(config.timeout),
        })
    }

    /// POST `body` to `url` and return the response once headers arrive.
    ///
    /// No retries. Headers must arrive within the read timeout. A non-success
    /// status becomes [`GatewayError::Upstream`] carrying the status and the
    /// start of the body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] for an unparsable URL,
    /// [`GatewayError::Timeout`]/[`GatewayError::Transport`] when the request
    /// fails, and [`GatewayError::Upstream`] on a non-success status.
    pub async fn post(
        &self,
        url: &str,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, GatewayError> {
        let parsed = url::Url::parse(url)
            .map_err(|err| GatewayError::Internal(format!("Invalid upstream URL: {err}")))?;

        let mut request = reqwest::Request::new(http::Method::POST, parsed);
        *request.headers_mut() = headers;
        *request.body_mut() = Some(reqwest::Body::from(body));

        let response = tokio::time::timeout(self.response_timeout, self.client.execute(request))
            .await
            .map_err(|_| {
                GatewayError::Timeout(format!(
                    "no response headers within {}s",
                    self.response_timeout.as_secs()
                ))
            })??;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = read_error_body(response).await;
        tracing::warn!(
            status = status.as_u16(),
            upstream = url,
            "upstream returned non-success status"
        );
        Err(GatewayError::Upstream {
            status: status.as_u16(),
            message: crate::util::truncate_text(&text, UPSTREAM_ERROR_BODY_MAX_CHARS),
        })
    }
}

/// Read at most [`UPSTREAM_ERROR_BODY_MAX_BYTES`] of a failed response.
async fn read_error_body(response: reqwest::Response) -> String {
    let mut body = BytesMut::with_capacity(1024);
    let mut chunks = response.bytes_stream();
    while body.len() < UPSTREAM_ERROR_BODY_MAX_BYTES {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                let room = UPSTREAM_ERROR_BODY_MAX_BYTES - body.len();
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            Some(Err(err)) if body.is_empty() => return format!("<unreadable body: {err}>"),
            Some(Err(_)) | None => break,
        }
    }
    crate::util::utf8_dropping_invalid(&body)
}

/// Headers for a JSON POST with a bearer credential.
#[must_use]
pub fn bearer_json_headers(api_key: &str) -> http::HeaderMap {
    let mut headers = http::HeaderMap::with_capacity(3);
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = http::HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(http::header::AUTHORIZATION, value);
    }
    headers
}
