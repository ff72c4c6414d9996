//! Builds outbound requests from abstract descriptors and drives
//! synchronous or streaming calls through the client pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;

use crate::client_pool::ClientPool;
use crate::encode::{apply_body, substitute_path_params};
use crate::errors::{AbortSignal, DispatchError};
use crate::stream::{ResponseSink, StreamStats, process_http_stream, process_sse};
use crate::types::{HttpRequest, HttpResponse, StreamingMode};

/// Everything a streaming forward needs from the request scope: the framing
/// mode, the caller's writable sink and the abort signal.
pub struct StreamContext<'a> {
    pub streaming_mode: StreamingMode,
    pub sink: &'a mut dyn ResponseSink,
    pub abort: AbortSignal,
}

/// Result of a streaming forward. The body has already been copied to the
/// sink; nothing is re-buffered here.
#[derive(Clone, Debug)]
pub struct StreamSummary {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub duration_ms: u64,
    pub stats: StreamStats,
}

pub struct Forwarder {
    pool: Arc<ClientPool>,
}

impl Forwarder {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    /// Synchronous forward. Transport failures come back as a response
    /// object carrying the error, not as `Err`.
    pub async fn forward(&self, request: &HttpRequest) -> HttpResponse {
        let started = Instant::now();
        let outbound = match self.build_sync_request(request) {
            Ok(outbound) => outbound,
            Err(error) => return failure_response(&error, started),
        };

        match outbound.send().await {
            Ok(response) => resolve_response(response, started).await,
            Err(error) => {
                tracing::warn!(url = %request.url, error = %error, "sync forward failed");
                let wrapped = DispatchError::ForwardFailed {
                    url: request.url.clone(),
                    source: error,
                };
                failure_response(&wrapped, started)
            }
        }
    }

    /// Streaming forward. Mirrors upstream status and headers onto the
    /// caller's sink, then delegates body copying to the stream processor.
    pub async fn forward_stream(
        &self,
        ctx: StreamContext<'_>,
        request: &HttpRequest,
    ) -> Result<StreamSummary, DispatchError> {
        let started = Instant::now();
        let timeout = request.timeout_secs.map(Duration::from_secs);
        let (client, header_timeout) = self.pool.get_stream_client(ctx.streaming_mode, timeout)?;

        let url = build_url(request)?;
        let method = parse_method(&request.method)?;
        let mut builder = client.request(method, url);
        builder = match ctx.streaming_mode {
            // Accept must be the first streaming header on the wire.
            StreamingMode::Sse => builder
                .header("Accept", "text/event-stream")
                .header("Cache-Control", "no-cache")
                .header("Connection", "keep-alive"),
            StreamingMode::Http => builder
                .header("Transfer-Encoding", "chunked")
                .header("Connection", "Upgrade"),
        };
        builder = apply_request_headers(builder, request)?;
        if let Some(body) = &request.body {
            builder = apply_body(builder, request.header("content-type"), body)?;
        }

        // `send()` resolves once response headers arrive, so bounding it
        // enforces the header timeout for streaming-capability detection.
        let response = match tokio::time::timeout(header_timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                if error.is_timeout() {
                    return Err(DispatchError::StreamingUnsupported {
                        url: request.url.clone(),
                    });
                }
                return Err(DispatchError::ForwardFailed {
                    url: request.url.clone(),
                    source: error,
                });
            }
            Err(_) => {
                return Err(DispatchError::StreamingUnsupported {
                    url: request.url.clone(),
                });
            }
        };

        let status_code = response.status().as_u16();
        let headers = header_map(&response);
        let is_sse = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .is_some_and(|(_, value)| value.to_ascii_lowercase().contains("text/event-stream"));

        for (name, value) in &headers {
            ctx.sink.insert_header(name, value).await?;
        }
        ctx.sink.write_status(status_code).await?;
        ctx.sink.flush().await?;

        let body = response.bytes_stream();
        let copied = match ctx.streaming_mode {
            StreamingMode::Sse => process_sse(body, ctx.sink, is_sse, &ctx.abort).await,
            StreamingMode::Http => process_http_stream(body, ctx.sink, &ctx.abort).await,
        };

        let stats = match copied {
            Ok(stats) => stats,
            Err(error) => {
                // Best-effort error frame before closing a broken stream.
                if !matches!(error, DispatchError::Sink(_)) {
                    let frame = format!("data: {{\"error\":\"{error}\"}}\n\n");
                    let _ = ctx.sink.write(frame.as_bytes()).await;
                    let _ = ctx.sink.flush().await;
                }
                tracing::warn!(url = %request.url, error = %error, "stream forward failed");
                return Err(error);
            }
        };

        Ok(StreamSummary {
            status_code,
            headers,
            duration_ms: started.elapsed().as_millis() as u64,
            stats,
        })
    }

    fn build_sync_request(
        &self,
        request: &HttpRequest,
    ) -> Result<reqwest::RequestBuilder, DispatchError> {
        let timeout = request.timeout_secs.map(Duration::from_secs);
        let client = self.pool.get_client(timeout)?;
        let url = build_url(request)?;
        let method = parse_method(&request.method)?;

        let mut builder = client.request(method, url);
        builder = apply_request_headers(builder, request)?;
        if let Some(body) = &request.body {
            builder = apply_body(builder, request.header("content-type"), body)?;
        }
        Ok(builder)
    }
}

fn parse_method(method: &str) -> Result<reqwest::Method, DispatchError> {
    reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| DispatchError::InvalidRequest(format!("invalid method: {method}")))
}

/// Resolve path placeholders and merge query parameters into the URL.
fn build_url(request: &HttpRequest) -> Result<Url, DispatchError> {
    let resolved = substitute_path_params(&request.url, &request.path_params);
    let mut url = Url::parse(&resolved)
        .map_err(|error| DispatchError::InvalidRequest(format!("invalid url: {error}")))?;
    if !request.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &request.query {
            pairs.append_pair(name, value);
        }
    }
    Ok(url)
}

fn apply_request_headers(
    mut builder: reqwest::RequestBuilder,
    request: &HttpRequest,
) -> Result<reqwest::RequestBuilder, DispatchError> {
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DispatchError::InvalidRequest(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| DispatchError::InvalidRequest("invalid header value".to_string()))?;
        builder = builder.header(name, value);
    }
    Ok(builder)
}

fn header_map(response: &reqwest::Response) -> BTreeMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

async fn resolve_response(response: reqwest::Response, started: Instant) -> HttpResponse {
    let status_code = response.status().as_u16();
    let headers = header_map(&response);
    let is_json = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .is_some_and(|(_, value)| value.to_ascii_lowercase().contains("application/json"));

    let raw = response.text().await.unwrap_or_default();
    let body = if is_json {
        serde_json::from_str(&raw).unwrap_or(Value::String(raw))
    } else {
        Value::String(raw)
    };

    HttpResponse {
        status_code,
        headers,
        body,
        error: None,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

fn failure_response(error: &DispatchError, started: Instant) -> HttpResponse {
    HttpResponse {
        status_code: error.status_code(),
        headers: BTreeMap::new(),
        body: Value::Null,
        error: Some(error.to_string()),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(url: &str) -> HttpRequest {
        HttpRequest::new("GET", url)
    }

    #[test]
    fn build_url_substitutes_and_merges_query() {
        let mut request = request_with("http://host/tools/{name}/run");
        request
            .path_params
            .insert("name".to_string(), "echo".to_string());
        request.query.insert("limit".to_string(), "5".to_string());
        let url = build_url(&request).unwrap();
        assert_eq!(url.as_str(), "http://host/tools/echo/run?limit=5");
    }

    #[test]
    fn build_url_keeps_existing_query_params() {
        let mut request = request_with("http://host/search?q=a");
        request.query.insert("page".to_string(), "2".to_string());
        let url = build_url(&request).unwrap();
        assert_eq!(url.as_str(), "http://host/search?q=a&page=2");
    }

    #[test]
    fn invalid_method_is_rejected() {
        assert!(parse_method("not a method").is_err());
        assert_eq!(parse_method("post").unwrap(), reqwest::Method::POST);
    }

    #[test]
    fn invalid_url_is_rejected() {
        let request = request_with("not-a-url");
        assert!(matches!(
            build_url(&request),
            Err(DispatchError::InvalidRequest(_))
        ));
    }
}
