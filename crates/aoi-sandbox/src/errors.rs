//! Error taxonomy for the session pool and its control-plane adapter.

use thiserror::Error;

/// Failures talking to the sandbox control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control plane returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid control plane url: {0}")]
    InvalidUrl(String),
}

/// Failures surfaced by the session pool to foreground callers.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Every slot is provisioned and every session is at its concurrency cap.
    #[error("all sandbox sessions are at max concurrency")]
    Exhausted,

    #[error("failed to provision session {session_id}: {source}")]
    Provisioning {
        session_id: String,
        #[source]
        source: Box<SandboxError>,
    },

    #[error("session {session_id} did not reach running state in time")]
    CreateTimeout { session_id: String },

    #[error("session {session_id} entered state {state} during provisioning")]
    CreateFailed { session_id: String, state: String },

    #[error("execution on session {session_id} failed: {source}")]
    Execute {
        session_id: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("session pool is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioning_error_carries_session_context() {
        let error = SandboxError::Provisioning {
            session_id: "sess_aoi_2".to_string(),
            source: Box::new(SandboxError::CreateTimeout {
                session_id: "sess_aoi_2".to_string(),
            }),
        };
        let message = error.to_string();
        assert!(message.contains("sess_aoi_2"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
