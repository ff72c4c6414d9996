//! Error taxonomy for the dispatch core, plus the abort signal shared
//! between callers and in-flight stream copies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Failures surfaced by forwarding and stream processing.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The backend did not begin responding within the header timeout.
    #[error("backend at {url} likely does not support streaming")]
    StreamingUnsupported { url: String },

    #[error("forward to {url} failed: {source}")]
    ForwardFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream stream read failed: {0}")]
    StreamRead(#[source] reqwest::Error),

    #[error("server does not support streaming or returned no data")]
    EmptyStream,

    #[error("stream dispatch requires a stream context")]
    MissingStreamContext,

    #[error("async execution mode is not supported")]
    AsyncUnsupported,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("request aborted by caller")]
    Aborted,

    #[error("response sink write failed: {0}")]
    Sink(#[from] std::io::Error),
}

impl DispatchError {
    /// HTTP status class reported to the immediate caller.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::StreamingUnsupported { .. } => 408,
            DispatchError::ForwardFailed { .. } | DispatchError::StreamRead(_) => 503,
            DispatchError::EmptyStream => 502,
            DispatchError::MissingStreamContext | DispatchError::InvalidRequest(_) => 400,
            DispatchError::AsyncUnsupported => 501,
            DispatchError::ClientBuild(_) | DispatchError::Sink(_) => 500,
            DispatchError::Aborted => 499,
        }
    }
}

/// Cooperative abort flag for in-flight stream copies. Every clone
/// observes the same flag, so the caller keeps one handle and trips it to
/// stop a copy loop it handed the other clone to.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_classes() {
        let unsupported = DispatchError::StreamingUnsupported {
            url: "http://x".to_string(),
        };
        assert_eq!(unsupported.status_code(), 408);
        assert_eq!(DispatchError::EmptyStream.status_code(), 502);
        assert_eq!(DispatchError::AsyncUnsupported.status_code(), 501);
    }

    #[test]
    fn abort_trips_all_signal_clones() {
        let signal = AbortSignal::default();
        let handed_out = signal.clone();
        assert!(!handed_out.is_aborted());
        signal.abort();
        assert!(handed_out.is_aborted());
    }
}
