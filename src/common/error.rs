use crate::core::angle::Angle;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Camera did not become ready within {0:?}")]
    DeviceTimeout(Duration),

    #[error("Camera constraints not satisfiable: {0}")]
    ConstraintsNotSatisfiable(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Insufficient captures: {captured} of {required} required angles")]
    InsufficientCaptures { captured: usize, required: usize },

    #[error("Angle {0} is not part of this session")]
    AngleNotRequired(Angle),

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("No active capture session")]
    SessionInactive,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Coarse error tag handed to the view layer so failures render as state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    DeviceTimeout,
    ConstraintsNotSatisfiable,
    InvalidFrame,
    InsufficientCaptures,
    AngleNotRequired,
    SubmissionFailed,
    SessionInactive,
    Internal,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CaptureError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            CaptureError::DeviceTimeout(_) => ErrorKind::DeviceTimeout,
            CaptureError::ConstraintsNotSatisfiable(_) => ErrorKind::ConstraintsNotSatisfiable,
            CaptureError::InvalidFrame(_) => ErrorKind::InvalidFrame,
            CaptureError::InsufficientCaptures { .. } => ErrorKind::InsufficientCaptures,
            CaptureError::AngleNotRequired(_) => ErrorKind::AngleNotRequired,
            CaptureError::SubmissionFailed(_) => ErrorKind::SubmissionFailed,
            CaptureError::SessionInactive => ErrorKind::SessionInactive,
            _ => ErrorKind::Internal,
        }
    }

    /// Invalid frames are skipped; the next sampling tick retries.
    pub fn is_silently_recoverable(&self) -> bool {
        matches!(self, CaptureError::InvalidFrame(_))
    }

    /// Maps an OS-level open failure onto the camera taxonomy.
    pub fn from_device_io(device: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(format!("{}: {}", device, err))
            }
            std::io::ErrorKind::TimedOut => CaptureError::DeviceUnavailable(format!(
                "{} timed out: {}",
                device, err
            )),
            _ => CaptureError::DeviceUnavailable(format!("{}: {}", device, err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
