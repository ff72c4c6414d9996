//! REST adapter for the sandbox runtime's control-plane API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::control::{SandboxControlPlane, SessionSpec, SessionStatusDetail};
use crate::errors::ControlPlaneError;
use crate::types::{ExecuteCodeReq, ExecuteCodeResp};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Control plane talking to the runtime over HTTP:
/// `GET/DELETE /v1/sessions/{id}`, `POST /v1/sessions`,
/// `POST /v1/sessions/{id}/execute`.
pub struct HttpControlPlane {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(base_url: &str) -> Result<Self, ControlPlaneError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| ControlPlaneError::InvalidUrl(error.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ControlPlaneError::Http)?;
        Ok(Self { base_url, client })
    }

    fn session_url(&self, session_id: &str) -> Result<Url, ControlPlaneError> {
        self.base_url
            .join(&format!("v1/sessions/{session_id}"))
            .map_err(|error| ControlPlaneError::InvalidUrl(error.to_string()))
    }

    async fn error_for(response: reqwest::Response) -> ControlPlaneError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ControlPlaneError::UnexpectedStatus { status, body }
    }
}

#[async_trait]
impl SandboxControlPlane for HttpControlPlane {
    async fn query_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionStatusDetail>, ControlPlaneError> {
        let response = self.client.get(self.session_url(session_id)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let detail = response.json::<SessionStatusDetail>().await?;
        Ok(Some(detail))
    }

    async fn create_session(&self, spec: &SessionSpec) -> Result<(), ControlPlaneError> {
        let url = self
            .base_url
            .join("v1/sessions")
            .map_err(|error| ControlPlaneError::InvalidUrl(error.to_string()))?;
        let response = self.client.post(url).json(spec).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ControlPlaneError> {
        let response = self
            .client
            .delete(self.session_url(session_id)?)
            .send()
            .await?;
        // Deleting an already-gone session is not a failure.
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_for(response).await)
    }

    async fn execute_code(
        &self,
        session_id: &str,
        request: &ExecuteCodeReq,
    ) -> Result<ExecuteCodeResp, ControlPlaneError> {
        let url = self
            .base_url
            .join(&format!("v1/sessions/{session_id}/execute"))
            .map_err(|error| ControlPlaneError::InvalidUrl(error.to_string()))?;
        let response = self.client.post(url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let result = response.json::<ExecuteCodeResp>().await?;
        Ok(result)
    }
}
