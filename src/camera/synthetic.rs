//! Camera that renders a drawn face instead of reading a device.
//!
//! Used by the test suite and by `facecheck enroll --synthetic` to exercise
//! the capture flow without hardware.

use crate::camera::{CameraConstraints, CameraProvider, CameraSource};
use crate::common::error::{CaptureError, Result};
use crate::core::angle::Angle;
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BACKGROUND: [u8; 3] = [40, 50, 70];
const SKIN: [u8; 3] = [205, 160, 130];
const EYE: [u8; 3] = [30, 25, 25];
const NOSE: [u8; 3] = [120, 80, 60];
const MOUTH: [u8; 3] = [120, 50, 50];

/// Feature offset inside the face, as a fraction of frame width/height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacePlacement {
    pub dx: f32,
    pub dy: f32,
    pub visible: bool,
}

impl FacePlacement {
    pub fn frontal() -> Self {
        Self { dx: 0.0, dy: 0.0, visible: true }
    }

    pub fn turned(dx: f32, dy: f32) -> Self {
        Self { dx, dy, visible: true }
    }

    pub fn absent() -> Self {
        Self { dx: 0.0, dy: 0.0, visible: false }
    }

    pub fn for_angle(angle: Angle) -> Self {
        match angle {
            Angle::Frontal => Self::frontal(),
            Angle::LeftProfile => Self::turned(-0.05, 0.0),
            Angle::RightProfile => Self::turned(0.05, 0.0),
            Angle::Up => Self::turned(0.0, -0.05),
            Angle::Down => Self::turned(0.0, 0.05),
        }
    }
}

// Deterministic per-pixel jitter so edges and sharpness are non-zero.
fn jitter(x: u32, y: u32) -> i16 {
    let h = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663);
    (h % 17) as i16 - 8
}

fn shade(base: [u8; 3], x: u32, y: u32) -> Rgb<u8> {
    let j = jitter(x, y);
    Rgb(base.map(|c| (c as i16 + j).clamp(0, 255) as u8))
}

fn in_ellipse(x: f32, y: f32, cx: f32, cy: f32, rx: f32, ry: f32) -> bool {
    let nx = (x - cx) / rx;
    let ny = (y - cy) / ry;
    nx * nx + ny * ny <= 1.0
}

pub fn render_face(width: u32, height: u32, placement: FacePlacement) -> RgbImage {
    let (w, h) = (width as f32, height as f32);
    let (cx, cy) = (w / 2.0, h / 2.0);
    let (fx, fy) = (cx + placement.dx * w, cy + placement.dy * h);

    RgbImage::from_fn(width, height, |x, y| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        if !placement.visible || !in_ellipse(px, py, cx, cy, 0.22 * w, 0.32 * h) {
            return shade(BACKGROUND, x, y);
        }

        let eye_y = fy - 0.06 * h;
        let left_eye = in_ellipse(px, py, fx - 0.07 * w, eye_y, 0.025 * w, 0.015 * h);
        let right_eye = in_ellipse(px, py, fx + 0.07 * w, eye_y, 0.025 * w, 0.015 * h);
        if left_eye || right_eye {
            return shade(EYE, x, y);
        }
        if (px - fx).abs() <= 1.5 && py >= fy && py <= fy + 0.1 * h {
            return shade(NOSE, x, y);
        }
        let mouth_y = fy + 0.17 * h;
        if (py - mouth_y).abs() <= 1.5 && (px - fx).abs() <= 0.07 * w {
            return shade(MOUTH, x, y);
        }
        shade(SKIN, x, y)
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Ready,
    Denied,
    Unavailable,
    Stalled(Duration),
}

#[derive(Debug)]
struct Scene {
    placement: FacePlacement,
    fail_frames: bool,
    blank_frames: bool,
}

#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    mode: Mode,
    scene: Arc<Mutex<Scene>>,
    handles: Arc<AtomicUsize>,
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::with_mode(Mode::Ready)
    }

    /// Acquisition fails as if the user declined camera access.
    pub fn denied() -> Self {
        Self::with_mode(Mode::Denied)
    }

    pub fn unavailable() -> Self {
        Self::with_mode(Mode::Unavailable)
    }

    /// Acquisition blocks for `delay` before the device responds.
    pub fn stalled(delay: Duration) -> Self {
        Self::with_mode(Mode::Stalled(delay))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            scene: Arc::new(Mutex::new(Scene {
                placement: FacePlacement::frontal(),
                fail_frames: false,
                blank_frames: false,
            })),
            handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_scene<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> R {
        let mut scene = self.scene.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut scene)
    }

    pub fn set_placement(&self, placement: FacePlacement) {
        self.with_scene(|s| s.placement = placement);
    }

    pub fn show_angle(&self, angle: Angle) {
        self.set_placement(FacePlacement::for_angle(angle));
    }

    pub fn fail_frames(&self, fail: bool) {
        self.with_scene(|s| s.fail_frames = fail);
    }

    /// Emit zero-sized frames, as a device that is not streaming yet would.
    pub fn blank_frames(&self, blank: bool) {
        self.with_scene(|s| s.blank_frames = blank);
    }

    /// Number of sources currently holding the device.
    pub fn open_handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }
}

impl CameraProvider for SyntheticProvider {
    fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn CameraSource>> {
        match self.mode {
            Mode::Denied => {
                return Err(CaptureError::PermissionDenied("synthetic camera access declined".into()))
            }
            Mode::Unavailable => {
                return Err(CaptureError::DeviceUnavailable("synthetic camera unplugged".into()))
            }
            Mode::Stalled(delay) => std::thread::sleep(delay),
            Mode::Ready => {}
        }
        if constraints.width == 0 || constraints.height == 0 {
            return Err(CaptureError::ConstraintsNotSatisfiable(format!(
                "{}x{} is not a valid resolution",
                constraints.width, constraints.height
            )));
        }

        self.handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSource {
            scene: Arc::clone(&self.scene),
            handles: Arc::clone(&self.handles),
            width: constraints.width,
            height: constraints.height,
        }))
    }
}

struct SyntheticSource {
    scene: Arc<Mutex<Scene>>,
    handles: Arc<AtomicUsize>,
    width: u32,
    height: u32,
}

impl CameraSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        let (placement, fail, blank) = {
            let scene = self.scene.lock().unwrap_or_else(|p| p.into_inner());
            (scene.placement, scene.fail_frames, scene.blank_frames)
        };
        if fail {
            return Err(CaptureError::DeviceUnavailable("synthetic stream interrupted".into()));
        }
        if blank {
            return Ok(DynamicImage::ImageRgb8(RgbImage::new(0, 0)));
        }
        Ok(DynamicImage::ImageRgb8(render_face(self.width, self.height, placement)))
    }

    fn describe(&self) -> String {
        format!("synthetic camera {}x{}", self.width, self.height)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}
