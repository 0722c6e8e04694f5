// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod service;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{CaptureError, Config, DevMode, ErrorKind, Result};
pub use core::{
    AcceptanceDecision, AcceptancePolicy, Angle, Capture, CaptureAggregator, CaptureController, CaptureOutcome,
    Frame, Progress, QualityAnalyzer, QualityReport, RegistrationPayload, SessionEvent, SessionState,
    SessionStatus,
};
pub use camera::{CameraProvider, CameraSource, SyntheticProvider, V4lProvider};
pub use storage::EnrollmentStore;
pub use service::{protocol, HttpRegistrationClient, RegistrationSink, SubmissionReceipt};
