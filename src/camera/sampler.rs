use crate::camera::slot::FrameSlot;
use crate::camera::CameraSource;
use crate::common::error::Result;
use crate::core::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const STOP_POLL: Duration = Duration::from_millis(5);

/// Background loop pulling frames from a camera into a [`FrameSlot`].
///
/// The sampler owns the camera source; stopping it joins the thread, which
/// drops the source and releases the device.
pub struct FrameSampler {
    stop: Arc<AtomicBool>,
    slot: FrameSlot,
    handle: Option<JoinHandle<()>>,
    device: String,
}

impl FrameSampler {
    pub fn spawn(mut source: Box<dyn CameraSource>, interval: Duration, slot: FrameSlot) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let device = source.describe();

        let thread_stop = Arc::clone(&stop);
        let thread_slot = slot.clone();
        let handle = std::thread::Builder::new()
            .name("frame-sampler".into())
            .spawn(move || {
                let mut sequence = 0u64;
                let mut consecutive_failures = 0u32;

                while !thread_stop.load(Ordering::Acquire) {
                    let tick = Instant::now();

                    match source.next_frame() {
                        Ok(image) => {
                            consecutive_failures = 0;
                            sequence += 1;
                            if !thread_slot.publish(Frame::new(image, sequence)) {
                                break;
                            }
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            tracing::warn!("Failed to capture frame: {}", e);
                            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                                thread_slot.report_failure(e.to_string());
                                break;
                            }
                        }
                    }

                    while !thread_stop.load(Ordering::Acquire) {
                        let elapsed = tick.elapsed();
                        if elapsed >= interval {
                            break;
                        }
                        std::thread::sleep(STOP_POLL.min(interval - elapsed));
                    }
                }

                tracing::debug!("Sampler exiting after {} frames, releasing {}", sequence, source.describe());
            })?;

        tracing::info!("Sampling {} every {:?}", device, interval);

        Ok(Self {
            stop,
            slot,
            handle: Some(handle),
            device,
        })
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Idempotent. Returns once the camera source has been dropped.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.slot.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Sampler thread for {} panicked", self.device);
            }
            tracing::info!("Released {}", self.device);
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::synthetic::SyntheticProvider;
    use crate::camera::{CameraConstraints, CameraProvider};
    use crate::common::config::CameraConfig;

    fn wait_for_frames(slot: &FrameSlot, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while slot.published() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_sampler_publishes_and_stops() {
        let provider = SyntheticProvider::new();
        let source = provider.acquire(&CameraConstraints::from(&CameraConfig::default())).unwrap();
        let slot = FrameSlot::new();
        let mut sampler = FrameSampler::spawn(source, Duration::from_millis(10), slot.clone()).unwrap();

        wait_for_frames(&slot, 2);
        assert!(slot.latest().is_some());
        assert!(provider.open_handles() == 1);

        sampler.stop();
        assert!(!sampler.is_running());
        assert_eq!(provider.open_handles(), 0);

        let after_stop = slot.published();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(slot.published(), after_stop);

        // second stop is a no-op
        sampler.stop();
    }

    #[test]
    fn test_failing_stream_reports_failure() {
        let provider = SyntheticProvider::new();
        provider.fail_frames(true);
        let source = provider.acquire(&CameraConstraints::from(&CameraConfig::default())).unwrap();
        let slot = FrameSlot::new();
        let _sampler = FrameSampler::spawn(source, Duration::from_millis(10), slot.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut failure = None;
        while failure.is_none() && Instant::now() < deadline {
            failure = slot.take_failure();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(failure.is_some());
    }
}
