pub mod client;
pub mod protocol;

pub use client::HttpRegistrationClient;

use crate::common::error::Result;
use crate::core::payload::RegistrationPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proof that a sink took a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub payload_id: Uuid,
    pub subject_id: String,
    pub capture_count: usize,
    /// Sink name, e.g. `http` or `local`.
    pub sink: String,
    /// Identifier assigned by the sink, if any.
    pub reference: Option<String>,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionReceipt {
    pub fn new(sink: &str, payload: &RegistrationPayload, reference: Option<String>, message: String) -> Self {
        Self {
            payload_id: payload.payload_id(),
            subject_id: payload.subject_id().to_string(),
            capture_count: payload.capture_count(),
            sink: sink.to_string(),
            reference,
            message,
            submitted_at: Utc::now(),
        }
    }
}

/// Destination for a completed registration.
///
/// Implementations must not retry on their own; failures surface as
/// `SubmissionFailed` and the operator decides.
pub trait RegistrationSink {
    fn name(&self) -> &str;

    fn submit(&self, payload: &RegistrationPayload) -> Result<SubmissionReceipt>;
}
