use crate::common::config::AcceptanceConfig;
use crate::common::error::Result;
use crate::core::face::{detect_face, FacePresence, FaceRegion, HeadPose};
use crate::core::frame::Frame;
use crate::core::liveness::{LivenessEstimator, LivenessScores, SimulatedLiveness};
use image::{GrayImage, Luma};
use imageproc::contrast::equalize_histogram;
use imageproc::definitions::Image;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::{Deserialize, Serialize};

/// Mean Sobel magnitude treated as perfectly sharp.
const SHARPNESS_REF: f32 = 60.0;
/// Luma standard deviation treated as full contrast.
const CONTRAST_REF: f32 = 64.0;
/// Face region covering this share of the frame earns full size credit.
const FACE_SIZE_REF: f32 = 0.25;

/// Score bundle for one frame.
///
/// Raw statistics (`brightness`, `contrast`, `sharpness`) are in pixel units;
/// every `*_score` field and `quality`/`confidence` is normalised to [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub width: u32,
    pub height: u32,
    /// Mean luma, 0..=255
    pub brightness: f32,
    /// Luma standard deviation
    pub contrast: f32,
    /// Mean Sobel gradient magnitude
    pub sharpness: f32,
    pub brightness_score: f32,
    pub contrast_score: f32,
    pub sharpness_score: f32,
    pub symmetry: f32,
    pub face: FacePresence,
    pub liveness: LivenessScores,
    pub quality: f32,
    pub confidence: f32,
}

impl QualityReport {
    pub fn pose(&self) -> HeadPose {
        self.face.pose
    }

    pub fn face_size(&self) -> f32 {
        self.face.face_size
    }

    pub fn assessment(&self) -> &'static str {
        if self.quality >= 0.8 {
            "Excellent"
        } else if self.quality >= 0.7 {
            "Good"
        } else if self.quality >= 0.6 {
            "Acceptable"
        } else if self.quality >= 0.5 {
            "Poor"
        } else {
            "Very Poor"
        }
    }

    /// Lighting and framing hints; pose hints come from the acceptance policy.
    pub fn suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();

        if self.face.region.is_none() {
            suggestions.push("No face found - position your face inside the frame".to_string());
            return suggestions;
        }

        if self.face.face_size < 0.08 {
            suggestions.push("Face is too small - move closer to the camera".to_string());
        } else if self.face.face_size > 0.6 {
            suggestions.push("Face is too large - move back from the camera".to_string());
        }

        if self.brightness < 70.0 {
            suggestions.push("Increase lighting - the image is too dark".to_string());
        } else if self.brightness > 200.0 {
            suggestions.push("Reduce lighting - the image is too bright".to_string());
        }

        if self.contrast_score < 0.3 {
            suggestions.push("Improve lighting conditions for better contrast".to_string());
        }

        if self.sharpness_score < 0.15 {
            suggestions.push("Hold still - the image is blurry".to_string());
        }

        suggestions
    }
}

/// Mean and standard deviation of luma, optionally restricted to a region.
pub fn luma_stats(gray: &GrayImage, region: Option<&FaceRegion>) -> (f32, f32) {
    let (x0, y0, w, h) = bounds(gray, region);
    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let p = gray.get_pixel(x, y)[0] as u64;
            sum += p;
            sum_sq += p * p;
        }
    }
    let count = (w as u64 * h as u64).max(1) as f64;
    let mean = sum as f64 / count;
    let variance = (sum_sq as f64 / count - mean * mean).max(0.0);
    (mean as f32, variance.sqrt() as f32)
}

pub fn brightness(gray: &GrayImage) -> f32 {
    luma_stats(gray, None).0
}

pub fn contrast(gray: &GrayImage) -> f32 {
    luma_stats(gray, None).1
}

/// Mean Sobel gradient magnitude.
pub fn sharpness(gray: &GrayImage) -> f32 {
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);
    gradient_magnitude(&gx, &gy, None)
}

fn gradient_magnitude(gx: &Image<Luma<i16>>, gy: &Image<Luma<i16>>, region: Option<&FaceRegion>) -> f32 {
    let (x0, y0, w, h) = bounds(gx, region);
    let mut sum = 0f64;
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let a = gx.get_pixel(x, y)[0] as f64;
            let b = gy.get_pixel(x, y)[0] as f64;
            sum += (a * a + b * b).sqrt();
        }
    }
    let count = (w as u64 * h as u64).max(1) as f64;
    (sum / count) as f32
}

/// 1.0 for a perfectly mirror-symmetric image, lower as halves diverge.
pub fn symmetry(gray: &GrayImage, region: Option<&FaceRegion>) -> f32 {
    let (x0, y0, w, h) = bounds(gray, region);
    let half = w / 2;
    if half == 0 || h == 0 {
        return 1.0;
    }
    let mut diff = 0u64;
    for y in y0..y0 + h {
        for i in 0..half {
            let left = gray.get_pixel(x0 + i, y)[0] as i32;
            let right = gray.get_pixel(x0 + w - 1 - i, y)[0] as i32;
            diff += (left - right).unsigned_abs() as u64;
        }
    }
    let mean = diff as f32 / (half as u64 * h as u64) as f32;
    (1.0 - mean / 255.0).clamp(0.0, 1.0)
}

fn bounds<P: image::Pixel>(img: &image::ImageBuffer<P, Vec<P::Subpixel>>, region: Option<&FaceRegion>) -> (u32, u32, u32, u32) {
    let (width, height) = img.dimensions();
    match region {
        Some(r) if r.x < width && r.y < height => {
            (r.x, r.y, r.width.min(width - r.x), r.height.min(height - r.y))
        }
        _ => (0, 0, width, height),
    }
}

/// Per-frame scorer. Pure except for the liveness estimator's random state.
pub struct QualityAnalyzer {
    equalize: bool,
    liveness: Box<dyn LivenessEstimator>,
}

impl QualityAnalyzer {
    pub fn new(config: &AcceptanceConfig) -> Self {
        let estimator = match config.seed {
            Some(seed) => SimulatedLiveness::seeded(seed),
            None => SimulatedLiveness::new(),
        };
        Self::with_estimator(config.equalize, Box::new(estimator))
    }

    pub fn with_estimator(equalize: bool, liveness: Box<dyn LivenessEstimator>) -> Self {
        Self { equalize, liveness }
    }

    pub fn analyze(&mut self, frame: &Frame) -> Result<QualityReport> {
        frame.validate()?;

        let rgb = frame.image.to_rgb8();
        let mut gray = frame.image.to_luma8();
        if self.equalize {
            gray = equalize_histogram(&gray);
        }
        let gx = horizontal_sobel(&gray);
        let gy = vertical_sobel(&gray);

        let face = detect_face(&rgb, &gray, &gx, &gy);
        let region = face.region.as_ref();

        let (brightness, contrast) = luma_stats(&gray, region);
        let sharpness = gradient_magnitude(&gx, &gy, region);
        let symmetry = symmetry(&gray, region);

        let brightness_score = 1.0 - ((brightness - 127.5).abs() / 127.5).min(1.0);
        let contrast_score = (contrast / CONTRAST_REF).min(1.0);
        let sharpness_score = (sharpness / SHARPNESS_REF).min(1.0);
        let size_score = (face.face_size / FACE_SIZE_REF).min(1.0);

        let quality = sharpness_score * 0.3
            + brightness_score * 0.25
            + contrast_score * 0.2
            + symmetry * 0.1
            + size_score * 0.15;

        let liveness = self.liveness.estimate(&gray, &face);
        let confidence = face.confidence;

        tracing::debug!(
            "Frame {}: quality {:.2}, confidence {:.2}, yaw {:.1}, pitch {:.1}",
            frame.sequence, quality, confidence, face.pose.yaw, face.pose.pitch
        );

        Ok(QualityReport {
            width: frame.width(),
            height: frame.height(),
            brightness,
            contrast,
            sharpness,
            brightness_score,
            contrast_score,
            sharpness_score,
            symmetry,
            face,
            liveness,
            quality: quality.clamp(0.0, 1.0),
            confidence,
        })
    }
}
