//! Liveness and anti-spoofing scores.
//!
//! The only estimator shipped here is [`SimulatedLiveness`]: a texture
//! heuristic blended with pseudo-random noise. Its output carries
//! `simulated = true` and must not be read as a biometric control. Plug a
//! real model in through [`LivenessEstimator`].

use crate::core::face::FacePresence;
use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessScores {
    pub liveness: f32,
    pub anti_spoofing: f32,
    pub simulated: bool,
}

pub trait LivenessEstimator: Send {
    fn estimate(&mut self, gray: &GrayImage, face: &FacePresence) -> LivenessScores;
}

pub struct SimulatedLiveness {
    rng: StdRng,
}

impl SimulatedLiveness {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Default for SimulatedLiveness {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessEstimator for SimulatedLiveness {
    fn estimate(&mut self, gray: &GrayImage, face: &FacePresence) -> LivenessScores {
        if face.region.is_none() {
            return LivenessScores { liveness: 0.0, anti_spoofing: 0.0, simulated: true };
        }

        // Printed photos and screens flatten fine texture.
        let texture = (laplacian_variance(gray) / 500.0).min(1.0) as f32;

        let liveness = 0.5 * texture + 0.5 * self.rng.gen_range(0.7..1.0f32);
        let anti_spoofing = 0.3 * texture + 0.2 * face.confidence + 0.5 * self.rng.gen_range(0.75..1.0f32);

        LivenessScores {
            liveness: liveness.clamp(0.0, 1.0),
            anti_spoofing: anti_spoofing.clamp(0.0, 1.0),
            simulated: true,
        }
    }
}

/// Variance of the 4-neighbour Laplacian.
pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    let mut count = 0f64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = img.get_pixel(x, y)[0] as i32;
            let top = img.get_pixel(x, y - 1)[0] as i32;
            let bottom = img.get_pixel(x, y + 1)[0] as i32;
            let left = img.get_pixel(x - 1, y)[0] as i32;
            let right = img.get_pixel(x + 1, y)[0] as i32;

            let laplacian = (top + bottom + left + right - 4 * center) as f64;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1.0;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::synthetic::{render_face, FacePlacement};
    use crate::core::face::detect_face;
    use image::{DynamicImage, Luma};
    use imageproc::gradients::{horizontal_sobel, vertical_sobel};

    #[test]
    fn test_flat_image_has_zero_laplacian_variance() {
        let flat = GrayImage::from_pixel(50, 50, Luma([90]));
        assert_eq!(laplacian_variance(&flat), 0.0);
    }

    #[test]
    fn test_simulated_scores_stay_in_range_and_are_flagged() {
        let rgb = render_face(160, 120, FacePlacement::frontal());
        let gray = DynamicImage::ImageRgb8(rgb.clone()).to_luma8();
        let face = detect_face(&rgb, &gray, &horizontal_sobel(&gray), &vertical_sobel(&gray));

        let mut estimator = SimulatedLiveness::seeded(42);
        for _ in 0..20 {
            let scores = estimator.estimate(&gray, &face);
            assert!(scores.simulated);
            assert!((0.0..=1.0).contains(&scores.liveness));
            assert!((0.0..=1.0).contains(&scores.anti_spoofing));
        }
    }

    #[test]
    fn test_no_face_means_no_liveness() {
        let gray = GrayImage::from_pixel(50, 50, Luma([128]));
        let rgb = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
        let face = detect_face(&rgb, &gray, &horizontal_sobel(&gray), &vertical_sobel(&gray));
        let scores = SimulatedLiveness::seeded(1).estimate(&gray, &face);
        assert_eq!(scores.liveness, 0.0);
    }
}
