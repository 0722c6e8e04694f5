use crate::camera::{CameraConstraints, CameraProvider, CameraSource};
use crate::common::config::CameraConfig;
use crate::common::error::{CaptureError, Result};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use std::fs;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Device index that asks for auto-detection.
pub const AUTO_DETECT_INDEX: u32 = 999;

const PREFERRED_FORMATS: [&[u8; 4]; 3] = [b"MJPG", b"YUYV", b"GREY"];

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
    pub can_capture: bool,
}

/// Opens `/dev/video*` devices through V4L2.
#[derive(Debug, Clone)]
pub struct V4lProvider {
    warmup_frames: u32,
    warmup_delay: Duration,
}

impl V4lProvider {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            warmup_frames: config.warmup_frames,
            warmup_delay: Duration::from_millis(config.warmup_delay_ms),
        }
    }

    /// List all video devices with their capture formats
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for entry in fs::read_dir("/dev")? {
            let entry = entry?;
            let filename = entry.file_name();
            let Some(index) = filename
                .to_str()
                .and_then(|n| n.strip_prefix("video"))
                .and_then(|i| i.parse::<u32>().ok())
            else {
                continue;
            };

            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };

            let formats = device
                .enum_formats()
                .unwrap_or_default()
                .iter()
                .map(|fmt| fmt.fourcc.str().unwrap_or("UNKNOWN").to_string())
                .collect();

            cameras.push(CameraInfo {
                index,
                name: caps.card.clone(),
                formats,
                can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            });
        }

        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }

    /// First capture-capable device offering a colour format, else device 0.
    pub fn detect_color_camera() -> Result<u32> {
        let cameras = Self::list_all_cameras()?;
        let selected = cameras
            .iter()
            .filter(|c| c.can_capture)
            .find(|c| c.formats.iter().any(|f| f == "MJPG" || f == "YUYV"))
            .map(|c| c.index);

        match selected {
            Some(index) => {
                tracing::info!("Selected camera: /dev/video{}", index);
                Ok(index)
            }
            None => {
                tracing::warn!("No colour camera detected, falling back to /dev/video0");
                Ok(0)
            }
        }
    }

    fn open(&self, constraints: &CameraConstraints) -> Result<V4lSource> {
        let index = if constraints.device_index == AUTO_DETECT_INDEX {
            Self::detect_color_camera()?
        } else {
            constraints.device_index
        };
        let path = format!("/dev/video{}", index);

        tracing::info!("Opening camera device {}...", path);
        let device = Device::new(index as usize).map_err(|e| CaptureError::from_device_io(&path, e))?;

        let caps = device.query_caps().map_err(|e| CaptureError::from_device_io(&path, e))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::ConstraintsNotSatisfiable(format!(
                "{} ({}) does not support video capture",
                path, caps.card
            )));
        }

        let offered: Vec<FourCC> = device
            .enum_formats()
            .map_err(|e| CaptureError::from_device_io(&path, e))?
            .iter()
            .map(|f| f.fourcc)
            .collect();
        let fourcc = PREFERRED_FORMATS
            .iter()
            .map(|repr| FourCC::new(repr))
            .find(|f| offered.contains(f))
            .ok_or_else(|| {
                CaptureError::ConstraintsNotSatisfiable(format!(
                    "{} offers none of MJPG, YUYV or GREY",
                    path
                ))
            })?;

        let mut fmt = device.format().map_err(|e| CaptureError::from_device_io(&path, e))?;
        fmt.width = constraints.width;
        fmt.height = constraints.height;
        fmt.fourcc = fourcc;

        // Drivers round to the nearest supported mode; accept whatever they pick.
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format on {}: {}. Using device defaults.", path, e);
        }
        let actual = device.format().map_err(|e| CaptureError::from_device_io(&path, e))?;
        if actual.fourcc != fourcc {
            return Err(CaptureError::ConstraintsNotSatisfiable(format!(
                "{} refused pixel format {}",
                path,
                fourcc.str().unwrap_or("?")
            )));
        }
        if actual.width != constraints.width || actual.height != constraints.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, constraints.width, constraints.height
            );
        }

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| CaptureError::from_device_io(&path, e))?;

        for i in 0..self.warmup_frames {
            stream.next().map_err(|e| {
                CaptureError::DeviceUnavailable(format!("{} failed warmup frame {}: {}", path, i, e))
            })?;
            std::thread::sleep(self.warmup_delay);
        }
        tracing::info!("Camera ready: {} {}x{} {}", path, actual.width, actual.height, fourcc);

        Ok(V4lSource {
            path,
            stream,
            _device: device,
            width: actual.width,
            height: actual.height,
            fourcc,
        })
    }
}

impl CameraProvider for V4lProvider {
    fn acquire(&self, constraints: &CameraConstraints) -> Result<Box<dyn CameraSource>> {
        Ok(Box::new(self.open(constraints)?))
    }
}

pub struct V4lSource {
    path: String,
    stream: Stream<'static>,
    _device: Device,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl CameraSource for V4lSource {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: failed to capture: {}", self.path, e)))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used == 0 { buf } else { &buf[..used] };

        match &self.fourcc.repr {
            b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
            b"YUYV" => yuyv_to_image(data, self.width, self.height),
            b"GREY" => grey_to_image(data, self.width, self.height),
            _ => Err(CaptureError::ConstraintsNotSatisfiable(format!(
                "unsupported pixel format {}",
                self.fourcc
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("{} ({}x{} {})", self.path, self.width, self.height, self.fourcc)
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return Err(CaptureError::InvalidFrame(format!(
            "short GREY buffer: {} of {} bytes",
            data.len(),
            expected
        )));
    }
    let buffer = GrayImage::from_raw(width, height, data[..expected].to_vec())
        .ok_or_else(|| CaptureError::InvalidFrame("failed to create grayscale image buffer".into()))?;
    Ok(DynamicImage::ImageLuma8(buffer))
}

/// Packed 4:2:2 (Y0 U Y1 V) to RGB, BT.601.
pub fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = (width * height * 2) as usize;
    if width % 2 != 0 || data.len() < expected {
        return Err(CaptureError::InvalidFrame(format!(
            "short YUYV buffer: {} of {} bytes",
            data.len(),
            expected
        )));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    let buffer = RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::InvalidFrame("failed to create RGB image buffer".into()))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}
