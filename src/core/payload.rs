use crate::core::angle::Angle;
use crate::core::capture::Capture;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything the registration backend receives for one subject.
///
/// Only [`CaptureAggregator::build_payload`](crate::core::CaptureAggregator::build_payload)
/// constructs one, and only once the session is complete. Fields are private
/// so a built payload cannot be edited afterwards. Not serialisable itself:
/// sinks map it onto their own format (see
/// [`RegistrationRequest::from_payload`](crate::service::protocol::RegistrationRequest::from_payload)),
/// which carries the JPEG bytes.
#[derive(Debug, Clone)]
pub struct RegistrationPayload {
    payload_id: Uuid,
    session_id: Uuid,
    subject_id: String,
    captures: Vec<Capture>,
    representative: Angle,
    average_quality: f32,
    average_confidence: f32,
    created_at: DateTime<Utc>,
}

impl RegistrationPayload {
    /// `captures` must be non-empty and hold at most one entry per angle.
    pub(crate) fn new(subject_id: String, session_id: Uuid, captures: Vec<Capture>) -> Self {
        let count = captures.len().max(1) as f32;
        let average_quality = captures.iter().map(|c| c.quality).sum::<f32>() / count;
        let average_confidence = captures.iter().map(|c| c.confidence).sum::<f32>() / count;

        // Frontal is the natural profile picture; otherwise take the best still.
        let representative = captures
            .iter()
            .find(|c| c.angle == Angle::Frontal)
            .or_else(|| {
                captures
                    .iter()
                    .max_by(|a, b| a.quality.total_cmp(&b.quality))
            })
            .map(|c| c.angle)
            .unwrap_or(Angle::Frontal);

        Self {
            payload_id: Uuid::new_v4(),
            session_id,
            subject_id,
            captures,
            representative,
            average_quality,
            average_confidence,
            created_at: Utc::now(),
        }
    }

    pub fn payload_id(&self) -> Uuid {
        self.payload_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub fn capture(&self, angle: Angle) -> Option<&Capture> {
        self.captures.iter().find(|c| c.angle == angle)
    }

    pub fn angles(&self) -> Vec<Angle> {
        self.captures.iter().map(|c| c.angle).collect()
    }

    pub fn representative(&self) -> Option<&Capture> {
        self.capture(self.representative)
    }

    pub fn capture_count(&self) -> usize {
        self.captures.len()
    }

    pub fn average_quality(&self) -> f32 {
        self.average_quality
    }

    pub fn average_confidence(&self) -> f32 {
        self.average_confidence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
