//! Abstract request/response descriptors exchanged with the dispatch core.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the caller wants the downstream call to be driven.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
    Stream,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sync
    }
}

/// Wire framing used for streamed responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    Sse,
    Http,
}

impl Default for StreamingMode {
    fn default() -> Self {
        StreamingMode::Http
    }
}

/// Abstract outbound request. The URL may contain `{name}` or `:name` path
/// placeholders resolved from `path_params`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub path_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Request timeout in seconds; absent means the pool default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Resolved response for a synchronous forward. Transport failures are
/// reported through `error` rather than an `Err` so callers can degrade
/// gracefully.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Request-scoped extensions injected by upstream middleware. A mode set
/// here takes precedence over the one declared on the request.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestContext {
    pub execution_mode: Option<ExecutionMode>,
    pub streaming_mode: Option<StreamingMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionMode::Stream).unwrap(),
            "\"stream\""
        );
        assert_eq!(
            serde_json::from_str::<StreamingMode>("\"sse\"").unwrap(),
            StreamingMode::Sse
        );
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut request = HttpRequest::new("POST", "http://example.test");
        request
            .headers
            .insert("Content-Type".to_string(), "text/plain".to_string());
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("accept"), None);
    }
}
