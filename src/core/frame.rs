use crate::common::error::{CaptureError, Result};
use chrono::{DateTime, Utc};
use image::DynamicImage;

/// One still sampled from the live camera stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    /// Monotonic per-acquisition counter assigned by the sampler.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage, sequence: u64) -> Self {
        Self { image, sequence, captured_at: Utc::now() }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Zero-dimension frames come from devices that are not yet streaming.
    pub fn validate(&self) -> Result<()> {
        if self.width() == 0 || self.height() == 0 {
            return Err(CaptureError::InvalidFrame(format!(
                "frame {} has zero dimension {}x{}",
                self.sequence,
                self.width(),
                self.height()
            )));
        }
        Ok(())
    }
}
