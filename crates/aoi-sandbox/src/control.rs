//! Control-plane seam between the pool and the remote sandbox runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ControlPlaneError;
use crate::types::{ExecuteCodeReq, ExecuteCodeResp};

/// Remote session lifecycle states reported by the control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Creating,
    Running,
    Failed,
    Terminated,
}

impl SessionStatus {
    /// States a tracked session is allowed to be in between health checks.
    pub fn is_healthy(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Creating)
    }
}

/// Status detail returned by a session query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStatusDetail {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Provisioning parameters for one remote session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSpec {
    pub session_id: String,
    pub template_id: String,
    pub cpu: f64,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub timeout_secs: u64,
}

/// Operations the pool needs from the sandbox runtime. Implementations must
/// be safe to call concurrently; the pool never holds its lock across these
/// calls.
#[async_trait]
pub trait SandboxControlPlane: Send + Sync {
    /// Query one session. `Ok(None)` means the session does not exist.
    async fn query_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionStatusDetail>, ControlPlaneError>;

    async fn create_session(&self, spec: &SessionSpec) -> Result<(), ControlPlaneError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), ControlPlaneError>;

    /// Run code synchronously on an existing session.
    async fn execute_code(
        &self,
        session_id: &str,
        request: &ExecuteCodeReq,
    ) -> Result<ExecuteCodeResp, ControlPlaneError>;
}
