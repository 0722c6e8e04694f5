//! Coarse face-presence heuristic.
//!
//! Nothing here is a trained detector. A skin-tone classifier finds the face
//! region, dark blobs in its upper band stand in for eyes, vertical edges in
//! the centre strip for the nose and horizontal edges low in the region for
//! the mouth. Head pose is read off the position of those features inside
//! the region.

use image::{GrayImage, Luma, RgbImage};
use imageproc::definitions::Image;
use serde::{Deserialize, Serialize};

/// Largest magnitude a 3x3 Sobel response can reach on 8-bit input.
const SOBEL_MAX: f32 = 1020.0;
/// Mean edge response treated as a fully present nose or mouth.
const FEATURE_EDGE_REF: f32 = 0.05 * SOBEL_MAX;
/// Minimum share of frame pixels classified as skin before a region is formed.
const MIN_SKIN_RATIO: f32 = 0.01;
/// Rows/columns with fewer skin pixels than this share of the peak are trimmed.
const PROFILE_TRIM: f32 = 0.25;
const MAX_POSE_DEGREES: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    fn rows(&self, from: f32, to: f32) -> std::ops::Range<u32> {
        let start = self.y + (self.height as f32 * from) as u32;
        let end = self.y + (self.height as f32 * to) as u32;
        start..end.max(start)
    }

    fn cols(&self, from: f32, to: f32) -> std::ops::Range<u32> {
        let start = self.x + (self.width as f32 * from) as u32;
        let end = self.x + (self.width as f32 * to) as u32;
        start..end.max(start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeCandidate {
    pub x: f32,
    pub y: f32,
    /// Share of the search window covered by dark pixels.
    pub coverage: f32,
}

/// Estimated head orientation in degrees. Heuristic, not a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacePresence {
    pub confidence: f32,
    pub region: Option<FaceRegion>,
    /// Skin pixels over all frame pixels.
    pub skin_ratio: f32,
    /// Region area over frame area.
    pub face_size: f32,
    pub eyes: Vec<EyeCandidate>,
    pub nose_score: f32,
    pub mouth_score: f32,
    pub pose: HeadPose,
}

impl FacePresence {
    fn absent(skin_ratio: f32) -> Self {
        Self {
            confidence: 0.0,
            region: None,
            skin_ratio,
            face_size: 0.0,
            eyes: Vec::new(),
            nose_score: 0.0,
            mouth_score: 0.0,
            pose: HeadPose::default(),
        }
    }

    pub fn eye_distance(&self) -> f32 {
        match self.eyes.as_slice() {
            [a, b, ..] => ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt(),
            _ => 0.0,
        }
    }
}

/// Explicit RGB skin rule for uniform daylight illumination.
pub fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95
        && g > 40
        && b > 20
        && max - min > 15
        && (r as i16 - g as i16).abs() > 15
        && r > g
        && r > b
}

/// `gx` and `gy` are the horizontal and vertical Sobel responses of `gray`.
pub fn detect_face(
    rgb: &RgbImage,
    gray: &GrayImage,
    gx: &Image<Luma<i16>>,
    gy: &Image<Luma<i16>>,
) -> FacePresence {
    let (width, height) = rgb.dimensions();
    let total = (width as u64 * height as u64).max(1) as f32;

    let mut col_counts = vec![0u32; width as usize];
    let mut row_counts = vec![0u32; height as usize];
    let mut skin_total = 0u64;
    for (x, y, pixel) in rgb.enumerate_pixels() {
        if is_skin(pixel[0], pixel[1], pixel[2]) {
            col_counts[x as usize] += 1;
            row_counts[y as usize] += 1;
            skin_total += 1;
        }
    }

    let skin_ratio = skin_total as f32 / total;
    if skin_ratio < MIN_SKIN_RATIO {
        return FacePresence::absent(skin_ratio);
    }

    let (x0, x1) = match trimmed_span(&col_counts) {
        Some(span) => span,
        None => return FacePresence::absent(skin_ratio),
    };
    let (y0, y1) = match trimmed_span(&row_counts) {
        Some(span) => span,
        None => return FacePresence::absent(skin_ratio),
    };
    let region = FaceRegion {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    };

    let mut region_skin = 0u64;
    let mut region_luma = 0u64;
    for y in region.y..region.y + region.height {
        for x in region.x..region.x + region.width {
            let p = rgb.get_pixel(x, y);
            if is_skin(p[0], p[1], p[2]) {
                region_skin += 1;
            }
            region_luma += gray.get_pixel(x, y)[0] as u64;
        }
    }
    let region_area = region.area().max(1) as f32;
    let region_mean = region_luma as f32 / region_area;
    let skin_score = (region_skin as f32 / region_area / 0.5).min(1.0);

    let eyes = find_eyes(gray, &region, region_mean);
    let nose_score = mean_abs(gx, region.cols(0.375, 0.625), region.rows(0.45, 0.7)) / FEATURE_EDGE_REF;
    let mouth_score = mean_abs(gy, region.cols(0.25, 0.75), region.rows(0.65, 0.9)) / FEATURE_EDGE_REF;
    let nose_score = nose_score.min(1.0);
    let mouth_score = mouth_score.min(1.0);

    let eye_score = (eyes.len() as f32 / 2.0).min(1.0);
    let confidence = 0.4 * skin_score + 0.3 * eye_score + 0.15 * nose_score + 0.15 * mouth_score;

    let pose = estimate_pose(&region, &eyes, gx);

    FacePresence {
        confidence: confidence.clamp(0.0, 1.0),
        region: Some(region),
        skin_ratio,
        face_size: region_area / total,
        eyes,
        nose_score,
        mouth_score,
        pose,
    }
}

fn trimmed_span(counts: &[u32]) -> Option<(u32, u32)> {
    let peak = *counts.iter().max()?;
    if peak == 0 {
        return None;
    }
    let threshold = (peak as f32 * PROFILE_TRIM).max(1.0) as u32;
    let first = counts.iter().position(|&c| c >= threshold)?;
    let last = counts.iter().rposition(|&c| c >= threshold)?;
    Some((first as u32, last as u32))
}

// Dark blobs in the upper band, one search window per half. The outer 15%
// of the region is skipped so hair and background at the face boundary do
// not register as eyes.
fn find_eyes(gray: &GrayImage, region: &FaceRegion, region_mean: f32) -> Vec<EyeCandidate> {
    let dark_threshold = (region_mean * 0.55).min(80.0);
    let rows = region.rows(0.2, 0.55);
    let windows = [region.cols(0.15, 0.5), region.cols(0.5, 0.85)];

    let mut eyes = Vec::new();
    for cols in windows {
        let area = (cols.len() * rows.len()).max(1) as f32;
        let (mut count, mut sum_x, mut sum_y) = (0u32, 0f32, 0f32);
        for y in rows.clone() {
            for x in cols.clone() {
                if (gray.get_pixel(x, y)[0] as f32) < dark_threshold {
                    count += 1;
                    sum_x += x as f32;
                    sum_y += y as f32;
                }
            }
        }
        let coverage = count as f32 / area;
        if count > 0 && (0.002..=0.3).contains(&coverage) {
            eyes.push(EyeCandidate {
                x: sum_x / count as f32,
                y: sum_y / count as f32,
                coverage,
            });
        }
    }
    eyes
}

fn mean_abs(gradient: &Image<Luma<i16>>, cols: std::ops::Range<u32>, rows: std::ops::Range<u32>) -> f32 {
    let mut sum = 0u64;
    let mut count = 0u64;
    for y in rows {
        for x in cols.clone() {
            if x < gradient.width() && y < gradient.height() {
                sum += gradient.get_pixel(x, y)[0].unsigned_abs() as u64;
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum as f32 / count as f32
    }
}

fn estimate_pose(region: &FaceRegion, eyes: &[EyeCandidate], gx: &Image<Luma<i16>>) -> HeadPose {
    let (cx, _) = region.center();
    let half_w = (region.width as f32 / 2.0).max(1.0);
    let half_h = (region.height as f32 / 2.0).max(1.0);

    let feature_x = match eyes {
        [a, b, ..] => (a.x + b.x) / 2.0,
        _ => strongest_vertical_edge(region, gx),
    };
    let yaw = ((feature_x - cx) / half_w).clamp(-1.0, 1.0) * MAX_POSE_DEGREES;

    let pitch = if eyes.is_empty() {
        0.0
    } else {
        let eye_y = eyes.iter().map(|e| e.y).sum::<f32>() / eyes.len() as f32;
        let expected = region.y as f32 + region.height as f32 * 0.4;
        ((expected - eye_y) / half_h).clamp(-1.0, 1.0) * MAX_POSE_DEGREES
    };

    let roll = match eyes {
        [a, b, ..] => (b.y - a.y).atan2(b.x - a.x).to_degrees(),
        _ => 0.0,
    };

    HeadPose { yaw, pitch, roll }
}

fn strongest_vertical_edge(region: &FaceRegion, gx: &Image<Luma<i16>>) -> f32 {
    let rows = region.rows(0.35, 0.7);
    let mut best = (region.center().0, 0u64);
    for x in region.cols(0.15, 0.85) {
        let energy: u64 = rows
            .clone()
            .filter(|&y| x < gx.width() && y < gx.height())
            .map(|y| gx.get_pixel(x, y)[0].unsigned_abs() as u64)
            .sum();
        if energy > best.1 {
            best = (x as f32, energy);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::synthetic::{render_face, FacePlacement};
    use imageproc::gradients::{horizontal_sobel, vertical_sobel};

    fn presence_for(image: &RgbImage) -> FacePresence {
        let gray = image::DynamicImage::ImageRgb8(image.clone()).to_luma8();
        let gx = horizontal_sobel(&gray);
        let gy = vertical_sobel(&gray);
        detect_face(image, &gray, &gx, &gy)
    }

    #[test]
    fn test_skin_rule() {
        assert!(is_skin(205, 160, 130));
        assert!(!is_skin(128, 128, 128));
        assert!(!is_skin(40, 50, 70));
    }

    #[test]
    fn test_uniform_gray_has_no_face() {
        let gray = RgbImage::from_pixel(100, 100, image::Rgb([128, 128, 128]));
        let presence = presence_for(&gray);
        assert!(presence.region.is_none());
        assert_eq!(presence.confidence, 0.0);
    }

    #[test]
    fn test_frontal_synthetic_face_is_found() {
        let image = render_face(320, 240, FacePlacement::frontal());
        let presence = presence_for(&image);
        let region = presence.region.expect("face region");
        let (cx, cy) = region.center();
        assert!((cx - 160.0).abs() < 8.0);
        assert!((cy - 120.0).abs() < 8.0);
        assert_eq!(presence.eyes.len(), 2);
        assert!(presence.confidence > 0.6, "confidence {}", presence.confidence);
        assert!(presence.pose.yaw.abs() < 12.0, "yaw {}", presence.pose.yaw);
        assert!(presence.eye_distance() > 0.0);
    }

    #[test]
    fn test_shifted_features_move_yaw() {
        let left = presence_for(&render_face(320, 240, FacePlacement::turned(-0.05, 0.0)));
        let right = presence_for(&render_face(320, 240, FacePlacement::turned(0.05, 0.0)));
        assert!(left.pose.yaw < -12.0, "left yaw {}", left.pose.yaw);
        assert!(right.pose.yaw > 12.0, "right yaw {}", right.pose.yaw);
    }

    #[test]
    fn test_raised_features_move_pitch() {
        let up = presence_for(&render_face(320, 240, FacePlacement::turned(0.0, -0.05)));
        let down = presence_for(&render_face(320, 240, FacePlacement::turned(0.0, 0.05)));
        assert!(up.pose.pitch > down.pose.pitch);
    }
}
