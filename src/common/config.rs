use crate::common::error::{CaptureError, Result};
use crate::common::paths::system_config_file;
use crate::core::angle::Angle;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub acceptance: AcceptanceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    #[default]
    User,
    Environment,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// 999 means auto-detect
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub facing: Facing,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
}

fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_fps() -> u32 { 30 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }
fn default_acquire_timeout() -> u64 { 5000 }
fn default_sample_interval() -> u64 { 100 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            facing: Facing::default(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
            acquire_timeout_ms: default_acquire_timeout(),
            sample_interval_ms: default_sample_interval(),
        }
    }
}

/// Inclusive range in degrees.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f32,
    pub max: f32,
}

impl Band {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PoseBand {
    pub yaw: Band,
    pub pitch: Band,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoseBands {
    #[serde(default = "default_frontal_band")]
    pub frontal: PoseBand,
    #[serde(default = "default_left_band")]
    pub left_profile: PoseBand,
    #[serde(default = "default_right_band")]
    pub right_profile: PoseBand,
    #[serde(default = "default_up_band")]
    pub up: PoseBand,
    #[serde(default = "default_down_band")]
    pub down: PoseBand,
}

fn default_frontal_band() -> PoseBand {
    PoseBand { yaw: Band::new(-12.0, 12.0), pitch: Band::new(-12.0, 12.0) }
}
fn default_left_band() -> PoseBand {
    PoseBand { yaw: Band::new(-75.0, -12.0), pitch: Band::new(-20.0, 20.0) }
}
fn default_right_band() -> PoseBand {
    PoseBand { yaw: Band::new(12.0, 75.0), pitch: Band::new(-20.0, 20.0) }
}
fn default_up_band() -> PoseBand {
    PoseBand { yaw: Band::new(-20.0, 20.0), pitch: Band::new(8.0, 60.0) }
}
fn default_down_band() -> PoseBand {
    PoseBand { yaw: Band::new(-20.0, 20.0), pitch: Band::new(-60.0, -8.0) }
}

impl PoseBands {
    pub fn band(&self, angle: Angle) -> &PoseBand {
        match angle {
            Angle::Frontal => &self.frontal,
            Angle::LeftProfile => &self.left_profile,
            Angle::RightProfile => &self.right_profile,
            Angle::Up => &self.up,
            Angle::Down => &self.down,
        }
    }

    /// Bands that accept any pose; used when pose gating is not wanted.
    pub fn unrestricted() -> Self {
        let any = PoseBand { yaw: Band::new(-90.0, 90.0), pitch: Band::new(-90.0, 90.0) };
        Self { frontal: any, left_profile: any, right_profile: any, up: any, down: any }
    }
}

impl Default for PoseBands {
    fn default() -> Self {
        Self {
            frontal: default_frontal_band(),
            left_profile: default_left_band(),
            right_profile: default_right_band(),
            up: default_up_band(),
            down: default_down_band(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AcceptanceConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_min_quality")]
    pub min_quality: f32,
    /// Fraction of the frame the face region must cover.
    #[serde(default = "default_min_face_size")]
    pub min_face_size: f32,
    #[serde(default = "default_min_sharpness")]
    pub min_sharpness: f32,
    /// Histogram-equalise the luma plane before scoring.
    #[serde(default)]
    pub equalize: bool,
    /// Seed for the simulated liveness source; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub poses: PoseBands,
}

fn default_min_confidence() -> f32 { 0.6 }
fn default_min_quality() -> f32 { 0.55 }
fn default_min_face_size() -> f32 { 0.08 }
fn default_min_sharpness() -> f32 { 0.15 }

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_quality: default_min_quality(),
            min_face_size: default_min_face_size(),
            min_sharpness: default_min_sharpness(),
            equalize: false,
            seed: None,
            poses: PoseBands::default(),
        }
    }
}

impl AcceptanceConfig {
    /// Accepts every analysed frame regardless of scores or pose.
    pub fn permissive() -> Self {
        Self {
            min_confidence: 0.0,
            min_quality: 0.0,
            min_face_size: 0.0,
            min_sharpness: 0.0,
            equalize: false,
            seed: Some(7),
            poses: PoseBands::unrestricted(),
        }
    }
}

/// Named capture flows observed in the registration UI.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapturePreset {
    /// Two of five angles, captured on explicit user action.
    #[default]
    Quick,
    /// All five angles, captured automatically as the subject turns.
    Guided,
}

impl CapturePreset {
    pub fn min_required(&self) -> usize {
        match self {
            CapturePreset::Quick => 2,
            CapturePreset::Guided => 5,
        }
    }

    pub fn auto_capture(&self) -> bool {
        matches!(self, CapturePreset::Guided)
    }
}

/// Whether thresholds decide storage of a manual capture or only advise.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    #[default]
    Enforce,
    Advisory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default)]
    pub preset: CapturePreset,
    #[serde(default)]
    pub min_required: Option<usize>,
    #[serde(default)]
    pub auto_capture: Option<bool>,
    #[serde(default)]
    pub gate: GateMode,
    #[serde(default = "default_angles")]
    pub angles: Vec<Angle>,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_angles() -> Vec<Angle> { Angle::ALL.to_vec() }
fn default_jpeg_quality() -> u8 { 90 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_preset(CapturePreset::default())
    }
}

impl CaptureConfig {
    pub fn from_preset(preset: CapturePreset) -> Self {
        Self {
            preset,
            min_required: None,
            auto_capture: None,
            gate: GateMode::default(),
            angles: default_angles(),
            jpeg_quality: default_jpeg_quality(),
        }
    }

    pub fn effective_min_required(&self) -> usize {
        self.min_required.unwrap_or_else(|| self.preset.min_required())
    }

    pub fn effective_auto_capture(&self) -> bool {
        self.auto_capture.unwrap_or_else(|| self.preset.auto_capture())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmissionConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_register_path")]
    pub register_path: String,
    #[serde(default = "default_session_path")]
    pub session_path: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_submission_timeout")]
    pub timeout_secs: u64,
}

fn default_register_path() -> String { "/api/enhanced-biometric/register-comprehensive".to_string() }
fn default_session_path() -> String { "/api/enhanced-biometric/sessions".to_string() }
fn default_submission_timeout() -> u64 { 30 }

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            register_path: default_register_path(),
            session_path: default_session_path(),
            api_token: None,
            timeout_secs: default_submission_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PreviewConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub height: Option<usize>,
    #[serde(default = "default_refresh")]
    pub refresh_ms: u64,
}

fn default_true() -> bool { true }
fn default_refresh() -> u64 { 80 }

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { enabled: true, width: None, height: None, refresh_ms: default_refresh() }
    }
}

impl Config {
    /// Loads the project config, then the system config, then defaults.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from("configs/facecheck.toml");
        if local.exists() {
            return Self::load_from_path(&local);
        }
        let system = system_config_file();
        if system.exists() {
            return Self::load_from_path(&system);
        }
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CaptureError::Config(format!(
                "Config file not found: {}. Please create it from configs/facecheck.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| CaptureError::Config(format!("Config parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Camera
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(CaptureError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(CaptureError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.fps == 0 || self.camera.fps > 120 {
            return Err(CaptureError::Config(format!(
                "Camera fps must be between 1 and 120, got {}", self.camera.fps
            )));
        }
        if !(10..=2000).contains(&self.camera.sample_interval_ms) {
            return Err(CaptureError::Config(format!(
                "Sample interval must be between 10 and 2000 ms, got {}",
                self.camera.sample_interval_ms
            )));
        }
        if !(100..=60_000).contains(&self.camera.acquire_timeout_ms) {
            return Err(CaptureError::Config(format!(
                "Acquire timeout must be between 100 and 60000 ms, got {}",
                self.camera.acquire_timeout_ms
            )));
        }

        // Thresholds
        let thresholds = [
            ("min_confidence", self.acceptance.min_confidence),
            ("min_quality", self.acceptance.min_quality),
            ("min_face_size", self.acceptance.min_face_size),
            ("min_sharpness", self.acceptance.min_sharpness),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(CaptureError::Config(format!(
                    "{} must be between 0.0 and 1.0, got {}", name, value
                )));
            }
        }
        for angle in Angle::ALL {
            let band = self.acceptance.poses.band(angle);
            if band.yaw.min > band.yaw.max || band.pitch.min > band.pitch.max {
                return Err(CaptureError::Config(format!(
                    "Pose band for {} has min greater than max", angle
                )));
            }
        }

        // Capture flow
        let mut angles = self.capture.angles.clone();
        angles.sort();
        angles.dedup();
        if angles.len() != self.capture.angles.len() {
            return Err(CaptureError::Config("Capture angles must be distinct".into()));
        }
        let min_required = self.capture.effective_min_required();
        if min_required == 0 || min_required > self.capture.angles.len() {
            return Err(CaptureError::Config(format!(
                "min_required must be between 1 and {}, got {}",
                self.capture.angles.len(),
                min_required
            )));
        }
        if self.capture.jpeg_quality == 0 || self.capture.jpeg_quality > 100 {
            return Err(CaptureError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}", self.capture.jpeg_quality
            )));
        }

        if self.submission.timeout_secs == 0 || self.submission.timeout_secs > 300 {
            return Err(CaptureError::Config(format!(
                "Submission timeout must be between 1 and 300 seconds, got {}",
                self.submission.timeout_secs
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_quick_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.capture.preset, CapturePreset::Quick);
        assert_eq!(config.capture.effective_min_required(), 2);
        assert!(!config.capture.effective_auto_capture());
        assert_eq!(config.camera.acquire_timeout_ms, 5000);
        assert_eq!(config.capture.angles.len(), 5);
    }

    #[test]
    fn test_guided_preset_and_overrides() {
        let config = Config::from_toml(
            r#"
            [capture]
            preset = "guided"

            [acceptance]
            min_quality = 0.7

            [acceptance.poses.left_profile]
            yaw = { min = -80.0, max = -20.0 }
            pitch = { min = -10.0, max = 10.0 }
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.effective_min_required(), 5);
        assert!(config.capture.effective_auto_capture());
        assert_eq!(config.acceptance.min_quality, 0.7);
        assert_eq!(config.acceptance.poses.left_profile.yaw.max, -20.0);
        // untouched bands keep their defaults
        assert_eq!(config.acceptance.poses.up, default_up_band());
    }

    #[test]
    fn test_explicit_minimum_overrides_preset() {
        let config = Config::from_toml("[capture]\npreset = \"guided\"\nmin_required = 3\n").unwrap();
        assert_eq!(config.capture.effective_min_required(), 3);
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        assert!(Config::from_toml("[acceptance]\nmin_confidence = 1.5\n").is_err());
        assert!(Config::from_toml("[camera]\nwidth = 0\n").is_err());
        assert!(Config::from_toml("[capture]\nmin_required = 6\n").is_err());
        assert!(Config::from_toml("[capture]\nangles = [\"up\", \"up\"]\n").is_err());
        assert!(Config::from_toml("[camera]\nsample_interval_ms = 5\n").is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/facecheck.toml")).unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));
    }
}
