use crate::common::config::{AcceptanceConfig, PoseBands};
use crate::core::angle::Angle;
use crate::core::quality::QualityReport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One failed acceptance check, with the measured value and the bound it missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Rejection {
    NoFace,
    LowConfidence { value: f32, min: f32 },
    LowQuality { value: f32, min: f32 },
    FaceTooSmall { value: f32, min: f32 },
    Blurry { value: f32, min: f32 },
    YawOutOfBand { value: f32, min: f32, max: f32 },
    PitchOutOfBand { value: f32, min: f32, max: f32 },
}

impl Rejection {
    /// What the subject should do about it.
    pub fn hint(&self) -> &'static str {
        match self {
            Rejection::NoFace => "Position your face inside the frame",
            Rejection::LowConfidence { .. } => "Face the camera with your eyes clearly visible",
            Rejection::LowQuality { .. } => "Improve lighting and hold still",
            Rejection::FaceTooSmall { .. } => "Move closer to the camera",
            Rejection::Blurry { .. } => "Hold still, the image is blurry",
            Rejection::YawOutOfBand { value, min, .. } => {
                if value < min {
                    "Turn your head toward the right"
                } else {
                    "Turn your head toward the left"
                }
            }
            Rejection::PitchOutOfBand { value, min, .. } => {
                if value < min {
                    "Tilt your chin up a little"
                } else {
                    "Tilt your chin down a little"
                }
            }
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoFace => write!(f, "no face detected"),
            Rejection::LowConfidence { value, min } => write!(f, "confidence {:.2} < {:.2}", value, min),
            Rejection::LowQuality { value, min } => write!(f, "quality {:.2} < {:.2}", value, min),
            Rejection::FaceTooSmall { value, min } => write!(f, "face size {:.2} < {:.2}", value, min),
            Rejection::Blurry { value, min } => write!(f, "sharpness {:.2} < {:.2}", value, min),
            Rejection::YawOutOfBand { value, min, max } => {
                write!(f, "yaw {:.1} outside [{:.1}, {:.1}]", value, min, max)
            }
            Rejection::PitchOutOfBand { value, min, max } => {
                write!(f, "pitch {:.1} outside [{:.1}, {:.1}]", value, min, max)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceDecision {
    pub angle: Angle,
    pub rejections: Vec<Rejection>,
}

impl AcceptanceDecision {
    pub fn accepted(&self) -> bool {
        self.rejections.is_empty()
    }

    pub fn hints(&self) -> Vec<&'static str> {
        let mut hints: Vec<&'static str> = self.rejections.iter().map(Rejection::hint).collect();
        hints.dedup();
        hints
    }
}

impl fmt::Display for AcceptanceDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.accepted() {
            return write!(f, "{}: accepted", self.angle);
        }
        let reasons: Vec<String> = self.rejections.iter().map(|r| r.to_string()).collect();
        write!(f, "{}: rejected ({})", self.angle, reasons.join(", "))
    }
}

/// Thresholds deciding whether a scored frame may be stored for an angle.
#[derive(Debug, Clone)]
pub struct AcceptancePolicy {
    pub min_confidence: f32,
    pub min_quality: f32,
    pub min_face_size: f32,
    pub min_sharpness: f32,
    pub poses: PoseBands,
}

impl AcceptancePolicy {
    pub fn from_config(config: &AcceptanceConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            min_quality: config.min_quality,
            min_face_size: config.min_face_size,
            min_sharpness: config.min_sharpness,
            poses: config.poses.clone(),
        }
    }

    /// Runs every check and collects all failures, not just the first.
    pub fn evaluate(&self, angle: Angle, report: &QualityReport) -> AcceptanceDecision {
        let mut rejections = Vec::new();

        if report.face.region.is_none() && self.min_confidence > 0.0 {
            rejections.push(Rejection::NoFace);
            return AcceptanceDecision { angle, rejections };
        }

        if report.confidence < self.min_confidence {
            rejections.push(Rejection::LowConfidence { value: report.confidence, min: self.min_confidence });
        }
        if report.quality < self.min_quality {
            rejections.push(Rejection::LowQuality { value: report.quality, min: self.min_quality });
        }
        if report.face_size() < self.min_face_size {
            rejections.push(Rejection::FaceTooSmall { value: report.face_size(), min: self.min_face_size });
        }
        if report.sharpness_score < self.min_sharpness {
            rejections.push(Rejection::Blurry { value: report.sharpness_score, min: self.min_sharpness });
        }

        let band = self.poses.band(angle);
        let pose = report.pose();
        if !band.yaw.contains(pose.yaw) {
            rejections.push(Rejection::YawOutOfBand { value: pose.yaw, min: band.yaw.min, max: band.yaw.max });
        }
        if !band.pitch.contains(pose.pitch) {
            rejections.push(Rejection::PitchOutOfBand {
                value: pose.pitch,
                min: band.pitch.min,
                max: band.pitch.max,
            });
        }

        AcceptanceDecision { angle, rejections }
    }
}
