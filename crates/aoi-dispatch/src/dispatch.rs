//! Entry point selecting sync vs streaming forwarding by execution mode.

use std::sync::Arc;

use crate::client_pool::ClientPool;
use crate::errors::DispatchError;
use crate::forward::{Forwarder, StreamContext};
use crate::types::{ExecutionMode, HttpRequest, HttpResponse, RequestContext};

pub struct Dispatcher {
    forwarder: Forwarder,
}

impl Dispatcher {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self {
            forwarder: Forwarder::new(pool),
        }
    }

    /// Route the request by execution mode. A mode carried by the request
    /// context wins over the one declared on the request itself. Async mode
    /// is intentionally unimplemented and fails fast.
    pub async fn handle_request(
        &self,
        ctx: Option<&RequestContext>,
        request: &HttpRequest,
        stream: Option<StreamContext<'_>>,
    ) -> Result<HttpResponse, DispatchError> {
        let mode = ctx
            .and_then(|ctx| ctx.execution_mode)
            .unwrap_or(request.execution_mode);

        match mode {
            ExecutionMode::Sync => Ok(self.forwarder.forward(request).await),
            ExecutionMode::Stream => {
                let mut stream = stream.ok_or(DispatchError::MissingStreamContext)?;
                if let Some(streaming_mode) = ctx.and_then(|ctx| ctx.streaming_mode) {
                    stream.streaming_mode = streaming_mode;
                }
                let summary = self.forwarder.forward_stream(stream, request).await?;
                Ok(HttpResponse {
                    status_code: summary.status_code,
                    headers: summary.headers,
                    body: serde_json::Value::Null,
                    error: None,
                    duration_ms: summary.duration_ms,
                })
            }
            ExecutionMode::Async => Err(DispatchError::AsyncUnsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_pool::ClientPoolConfig;
    use crate::types::StreamingMode;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ClientPool::new(ClientPoolConfig::default()))
    }

    #[tokio::test]
    async fn async_mode_fails_fast() {
        let mut request = HttpRequest::new("GET", "http://127.0.0.1:1/never");
        request.execution_mode = ExecutionMode::Async;
        let result = dispatcher().handle_request(None, &request, None).await;
        assert!(matches!(result, Err(DispatchError::AsyncUnsupported)));
    }

    #[tokio::test]
    async fn context_mode_overrides_request_mode() {
        // Request says sync, context says stream; without a stream context
        // the stream path must be taken and rejected.
        let request = HttpRequest::new("GET", "http://127.0.0.1:1/never");
        let ctx = RequestContext {
            execution_mode: Some(ExecutionMode::Stream),
            streaming_mode: Some(StreamingMode::Sse),
        };
        let result = dispatcher().handle_request(Some(&ctx), &request, None).await;
        assert!(matches!(result, Err(DispatchError::MissingStreamContext)));
    }

    #[tokio::test]
    async fn sync_transport_failure_degrades_to_soft_response() {
        // Nothing listens on this port; the sync path must still return a
        // response object with the error recorded.
        let request = HttpRequest::new("GET", "http://127.0.0.1:9/down");
        let response = dispatcher()
            .handle_request(None, &request, None)
            .await
            .unwrap();
        assert_eq!(response.status_code, 503);
        assert!(response.error.is_some());
    }
}
