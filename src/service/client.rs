use crate::common::config::SubmissionConfig;
use crate::common::error::{CaptureError, Result};
use crate::core::angle::Angle;
use crate::core::payload::RegistrationPayload;
use crate::service::protocol::{
    ApiResponse, FrameRequest, FrameResult, RegistrationRequest, RegistrationResult, SessionProgress,
    SessionStartRequest, SessionStarted,
};
use crate::service::{RegistrationSink, SubmissionReceipt};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Talks to the attendance backend over JSON/HTTP.
///
/// Covers the one-shot registration call and the server-driven session
/// routes (start, per-frame processing, progress). Every call is bounded by
/// the configured timeout and none is retried.
pub struct HttpRegistrationClient {
    http: Client,
    base_url: String,
    register_path: String,
    session_path: String,
    api_token: Option<String>,
}

impl HttpRegistrationClient {
    pub fn new(config: &SubmissionConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| CaptureError::Config("submission.base_url is not set".into()))?;
        Self::with_base_url(&base_url, config)
    }

    pub fn with_base_url(base_url: &str, config: &SubmissionConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("facecheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CaptureError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            register_path: config.register_path.clone(),
            session_path: config.session_path.clone(),
            api_token: config.api_token.clone(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn execute<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Result<ApiResponse<T>> {
        let response = self
            .authorize(request)
            .send()
            .map_err(|e| CaptureError::SubmissionFailed(format!("{}: {}", operation, e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| CaptureError::SubmissionFailed(format!("{}: failed to read response: {}", operation, e)))?;

        tracing::debug!("{} -> {}", operation, status);

        if !status.is_success() {
            // FastAPI error bodies carry the reason in `detail`.
            let reason = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or(body);
            return Err(CaptureError::SubmissionFailed(format!(
                "{} returned HTTP {}: {}",
                operation,
                status.as_u16(),
                reason
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| CaptureError::SubmissionFailed(format!("{}: malformed response: {}", operation, e)))
    }

    pub fn register(&self, payload: &RegistrationPayload) -> Result<RegistrationResult> {
        let url = self.endpoint(&self.register_path);
        let request = RegistrationRequest::from_payload(payload);
        tracing::info!("Registering {} ({} images) at {}", request.employee_id, request.biometric_images.len(), url);

        let response: ApiResponse<RegistrationResult> = self.execute("register", self.http.post(&url).json(&request))?;
        if !response.success {
            return response.into_result("register");
        }
        Ok(response.data.unwrap_or_default())
    }

    /// Opens a server-side capture session.
    pub fn start_session(&self, employee_id: &str, angles: &[Angle], min_required: usize) -> Result<SessionStarted> {
        let url = self.endpoint(&self.session_path);
        let request = SessionStartRequest {
            employee_id: employee_id.to_string(),
            required_angles: angles.to_vec(),
            min_required,
        };
        self.execute("start_session", self.http.post(&url).json(&request))?
            .into_result("start_session")
    }

    /// Sends one JPEG frame for server-side scoring against `angle`.
    pub fn process_frame(&self, session_id: &str, angle: Angle, jpeg: &[u8]) -> Result<FrameResult> {
        let url = self.endpoint(&format!("{}/{}/frames", self.session_path, session_id));
        let request = FrameRequest::new(angle, jpeg);
        self.execute("process_frame", self.http.post(&url).json(&request))?
            .into_result("process_frame")
    }

    pub fn progress(&self, session_id: &str) -> Result<SessionProgress> {
        let url = self.endpoint(&format!("{}/{}/progress", self.session_path, session_id));
        self.execute("progress", self.http.get(&url))?.into_result("progress")
    }
}

impl RegistrationSink for HttpRegistrationClient {
    fn name(&self) -> &str {
        "http"
    }

    fn submit(&self, payload: &RegistrationPayload) -> Result<SubmissionReceipt> {
        let result = self.register(payload)?;
        Ok(SubmissionReceipt::new(
            self.name(),
            payload,
            result.registration_id,
            format!("Registered {} angles for {}", payload.capture_count(), payload.subject_id()),
        ))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_handles_slashes() {
        assert_eq!(join_url("http://host:8000/", "/api/x"), "http://host:8000/api/x");
        assert_eq!(join_url("http://host:8000", "api/x"), "http://host:8000/api/x");
    }

    #[test]
    fn test_endpoints_use_configured_paths() {
        let config = SubmissionConfig::default();
        let client = HttpRegistrationClient::with_base_url("http://localhost:8000/", &config).unwrap();
        assert_eq!(
            client.endpoint(&config.register_path),
            "http://localhost:8000/api/enhanced-biometric/register-comprehensive"
        );
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let err = HttpRegistrationClient::new(&SubmissionConfig::default()).err().unwrap();
        assert!(matches!(err, CaptureError::Config(_)));
    }

    #[test]
    fn test_unreachable_backend_is_submission_failure() {
        let mut config = SubmissionConfig::default();
        config.timeout_secs = 2;
        // Port 9 (discard) on localhost is closed in test environments.
        let client = HttpRegistrationClient::with_base_url("http://127.0.0.1:9", &config).unwrap();
        let err = client.progress("missing").unwrap_err();
        assert_eq!(err.kind(), crate::common::error::ErrorKind::SubmissionFailed);
    }
}
