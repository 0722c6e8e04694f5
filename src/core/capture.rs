use crate::common::error::Result;
use crate::core::angle::Angle;
use crate::core::face::HeadPose;
use crate::core::frame::Frame;
use crate::core::quality::QualityReport;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// An accepted still for one angle together with the scores it was accepted on.
///
/// Liveness and anti-spoofing values are simulated; `simulated` records that
/// so downstream consumers never mistake them for a biometric control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub angle: Angle,
    /// JPEG-encoded still.
    #[serde(skip)]
    pub jpeg: Vec<u8>,
    /// Hex SHA-256 of `jpeg`.
    pub sha256: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub quality: f32,
    pub confidence: f32,
    pub liveness: f32,
    pub anti_spoofing: f32,
    pub pose: HeadPose,
    pub eye_count: usize,
    pub eye_distance: f32,
    pub simulated: bool,
}

impl Capture {
    pub fn from_frame(angle: Angle, frame: &Frame, report: &QualityReport, jpeg_quality: u8) -> Result<Self> {
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(frame.image.to_rgb8())
            .write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(jpeg_quality))?;

        Ok(Self {
            angle,
            sha256: digest_hex(&jpeg),
            jpeg,
            width: frame.width(),
            height: frame.height(),
            captured_at: frame.captured_at,
            quality: report.quality,
            confidence: report.confidence,
            liveness: report.liveness.liveness,
            anti_spoofing: report.liveness.anti_spoofing,
            pose: report.pose(),
            eye_count: report.face.eyes.len(),
            eye_distance: report.face.eye_distance(),
            simulated: report.liveness.simulated,
        })
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        Ok(image::load_from_memory_with_format(&self.jpeg, image::ImageFormat::Jpeg)?)
    }
}

pub fn digest_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
