pub mod sampler;
pub mod slot;
pub mod synthetic;
pub mod v4l2;

pub use sampler::FrameSampler;
pub use slot::FrameSlot;
pub use synthetic::SyntheticProvider;
pub use v4l2::{CameraInfo, V4lProvider};

use crate::common::config::{CameraConfig, Facing};
use crate::common::error::{CaptureError, Result};
use image::DynamicImage;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// What the session asks of the video input device.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConstraints {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub facing: Facing,
}

impl From<&CameraConfig> for CameraConstraints {
    fn from(config: &CameraConfig) -> Self {
        Self {
            device_index: config.device_index,
            width: config.width,
            height: config.height,
            fps: config.fps,
            facing: config.facing,
        }
    }
}

/// A live stream handle. Dropping it releases the device.
pub trait CameraSource: Send {
    /// Blocks until the next frame is available.
    fn next_frame(&mut self) -> Result<DynamicImage>;

    fn describe(&self) -> String;
}

/// Grants exclusive access to a video input device.
pub trait CameraProvider: Send + Sync {
    fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn CameraSource>>;
}

/// Runs `acquire` on a helper thread and gives up after `timeout`.
///
/// A source that arrives after the deadline is dropped on the helper thread,
/// which releases the device.
pub fn acquire_with_timeout(
    provider: Arc<dyn CameraProvider>,
    constraints: CameraConstraints,
    timeout: Duration,
) -> Result<Box<dyn CameraSource>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("camera-acquire".into())
        .spawn(move || {
            let result = provider.acquire(&constraints);
            if let Err(mpsc::SendError(Ok(source))) = tx.send(result) {
                tracing::warn!("Camera {} became ready after timeout, releasing", source.describe());
            }
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CaptureError::DeviceTimeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(CaptureError::DeviceUnavailable(
            "camera acquisition thread exited without a result".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stalled_provider_times_out() {
        let provider: Arc<dyn CameraProvider> = Arc::new(SyntheticProvider::stalled(Duration::from_millis(500)));
        let constraints = CameraConstraints::from(&CameraConfig::default());
        let err = acquire_with_timeout(provider, constraints, Duration::from_millis(50)).err().unwrap();
        assert!(matches!(err, CaptureError::DeviceTimeout(_)));
    }

    #[test]
    fn test_failing_provider_reports_its_error() {
        let provider: Arc<dyn CameraProvider> = Arc::new(SyntheticProvider::denied());
        let constraints = CameraConstraints::from(&CameraConfig::default());
        let err = acquire_with_timeout(provider, constraints, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
    }
}
