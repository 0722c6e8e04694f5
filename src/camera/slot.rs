use crate::core::frame::Frame;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SlotState {
    frame: Option<Arc<Frame>>,
    closed: bool,
    failure: Option<String>,
    published: u64,
}

/// Single-entry frame queue: a new frame replaces the previous one.
///
/// Once closed, publishes are ignored, so a sampler tick that races with
/// `stop()` cannot hand a frame to the session.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panicking sampler thread must not take the session down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false when the slot has been closed.
    pub fn publish(&self, frame: Frame) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.frame = Some(Arc::new(frame));
        state.published += 1;
        true
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        let state = self.lock();
        if state.closed {
            return None;
        }
        state.frame.clone()
    }

    pub fn published(&self) -> u64 {
        self.lock().published
    }

    pub fn report_failure(&self, message: String) {
        let mut state = self.lock();
        if !state.closed {
            state.failure = Some(message);
        }
    }

    pub fn take_failure(&self) -> Option<String> {
        self.lock().failure.take()
    }

    /// Drops the held frame and rejects further publishes.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.frame = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn frame(seq: u64) -> Frame {
        Frame::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2)), seq)
    }

    #[test]
    fn test_latest_frame_wins() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        slot.publish(frame(1));
        slot.publish(frame(2));
        assert_eq!(slot.latest().unwrap().sequence, 2);
        assert_eq!(slot.published(), 2);
    }

    #[test]
    fn test_closed_slot_ignores_publishes() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.close();
        assert!(!slot.publish(frame(2)));
        assert!(slot.latest().is_none());
        slot.report_failure("late".into());
        assert!(slot.take_failure().is_none());
    }
}
