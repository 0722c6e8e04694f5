pub mod aggregator;
pub mod angle;
pub mod capture;
pub mod face;
pub mod frame;
pub mod liveness;
pub mod payload;
pub mod policy;
pub mod quality;
pub mod session;

pub use aggregator::{CaptureAggregator, Progress};
pub use angle::Angle;
pub use capture::Capture;
pub use face::{FacePresence, FaceRegion, HeadPose};
pub use frame::Frame;
pub use liveness::{LivenessEstimator, LivenessScores, SimulatedLiveness};
pub use payload::RegistrationPayload;
pub use policy::{AcceptanceDecision, AcceptancePolicy, Rejection};
pub use quality::{QualityAnalyzer, QualityReport};
pub use session::{CaptureController, CaptureOutcome, SessionEvent, SessionState, SessionStatus};
