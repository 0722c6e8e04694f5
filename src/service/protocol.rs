use crate::common::error::{CaptureError, Result};
use crate::core::angle::Angle;
use crate::core::capture::Capture;
use crate::core::face::HeadPose;
use crate::core::payload::RegistrationPayload;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// Request types

/// Body of the comprehensive registration call.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegistrationRequest {
    pub employee_id: String,
    /// Angle label to base64 JPEG.
    pub biometric_images: BTreeMap<String, String>,
    pub representative_angle: Option<String>,
    pub session_id: Uuid,
    pub payload_id: Uuid,
    pub capture_count: usize,
    pub average_quality: f32,
    pub average_confidence: f32,
    pub captures: Vec<CaptureMetadata>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CaptureMetadata {
    pub angle: String,
    pub sha256: String,
    pub width: u32,
    pub height: u32,
    pub quality: f32,
    pub confidence: f32,
    pub liveness: f32,
    pub anti_spoofing: f32,
    pub pose: HeadPose,
    pub eye_count: usize,
    pub eye_distance: f32,
    pub simulated: bool,
    pub captured_at: String,
}

impl From<&Capture> for CaptureMetadata {
    fn from(capture: &Capture) -> Self {
        Self {
            angle: capture.angle.label().to_string(),
            sha256: capture.sha256.clone(),
            width: capture.width,
            height: capture.height,
            quality: capture.quality,
            confidence: capture.confidence,
            liveness: capture.liveness,
            anti_spoofing: capture.anti_spoofing,
            pose: capture.pose,
            eye_count: capture.eye_count,
            eye_distance: capture.eye_distance,
            simulated: capture.simulated,
            captured_at: capture.captured_at.to_rfc3339(),
        }
    }
}

impl RegistrationRequest {
    pub fn from_payload(payload: &RegistrationPayload) -> Self {
        let biometric_images = payload
            .captures()
            .iter()
            .map(|c| (c.angle.label().to_string(), BASE64.encode(&c.jpeg)))
            .collect();

        Self {
            employee_id: payload.subject_id().to_string(),
            biometric_images,
            representative_angle: payload.representative().map(|c| c.angle.label().to_string()),
            session_id: payload.session_id(),
            payload_id: payload.payload_id(),
            capture_count: payload.capture_count(),
            average_quality: payload.average_quality(),
            average_confidence: payload.average_confidence(),
            captures: payload.captures().iter().map(CaptureMetadata::from).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionStartRequest {
    pub employee_id: String,
    pub required_angles: Vec<Angle>,
    pub min_required: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FrameRequest {
    pub angle: Angle,
    /// Base64 JPEG.
    pub frame_data: String,
}

impl FrameRequest {
    pub fn new(angle: Angle, jpeg: &[u8]) -> Self {
        Self { angle, frame_data: BASE64.encode(jpeg) }
    }
}

// Response types

/// `{success, message, data}` wrapper every backend route answers with.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    /// FastAPI puts errors here.
    #[serde(default)]
    pub detail: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwraps `data`, turning `success = false` into `SubmissionFailed`.
    pub fn into_result(self, operation: &str) -> Result<T> {
        if !self.success {
            let reason = self
                .message
                .or(self.detail)
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(CaptureError::SubmissionFailed(format!("{} rejected: {}", operation, reason)));
        }
        self.data
            .ok_or_else(|| CaptureError::SubmissionFailed(format!("{} returned no data", operation)))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RegistrationResult {
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub registration_id: Option<String>,
    #[serde(default)]
    pub stored_angles: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionStarted {
    pub session_id: String,
    #[serde(default)]
    pub required_angles: Vec<Angle>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FrameResult {
    pub accepted: bool,
    #[serde(default)]
    pub quality: Option<f32>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<SessionProgress>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionProgress {
    pub captured: usize,
    pub required: usize,
    #[serde(default)]
    pub percent: u8,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub captured_angles: Vec<Angle>,
}
