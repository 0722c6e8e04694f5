//! Capture session controller.
//!
//! [`CaptureController`] owns the camera for the duration of a session: it
//! acquires the device, keeps a sampler thread publishing the latest frame,
//! scores frames on request (or on every poll in automatic mode) and stores
//! accepted stills in a [`CaptureAggregator`]. All failures are recorded on
//! the session and published as [`SessionEvent::Error`] so the view can show
//! them; nothing here retries on its own.

use crate::camera::{acquire_with_timeout, CameraConstraints, CameraProvider, FrameSampler, FrameSlot};
use crate::common::config::{CameraConfig, CaptureConfig, Config, GateMode};
use crate::common::error::{CaptureError, ErrorKind, Result};
use crate::core::aggregator::{CaptureAggregator, Progress};
use crate::core::angle::Angle;
use crate::core::capture::Capture;
use crate::core::face::FaceRegion;
use crate::core::frame::Frame;
use crate::core::payload::RegistrationPayload;
use crate::core::policy::{AcceptanceDecision, AcceptancePolicy};
use crate::core::quality::{QualityAnalyzer, QualityReport};
use crate::service::{RegistrationSink, SubmissionReceipt};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const FIRST_FRAME_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Collecting,
    Complete,
    Submitted,
    Discarded,
}

impl SessionState {
    /// Submitted and discarded sessions accept no further work.
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Submitted | SessionState::Discarded)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started { session_id: Uuid, device: String },
    Progress(Progress),
    Captured { angle: Angle, quality: f32, confidence: f32 },
    Rejected(AcceptanceDecision),
    /// `None` means every capture was discarded.
    Retaken { angle: Option<Angle> },
    Completed { session_id: Uuid },
    Stopped,
    Submitted(SubmissionReceipt),
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Stored { angle: Angle, progress: Progress },
    Rejected(AcceptanceDecision),
    /// Scored but not stored because capture is manual.
    Evaluated(AcceptanceDecision),
    /// No usable frame yet; try again on the next tick.
    NoFrame,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Everything the view layer needs to render the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub subject_id: String,
    pub state: SessionState,
    pub camera_active: bool,
    pub device: Option<String>,
    pub current_angle: Option<Angle>,
    pub captured: Vec<Angle>,
    pub progress: Progress,
    pub auto_capture: bool,
    /// Latest scored frame passes every check for the current angle.
    pub ready: bool,
    pub last_decision: Option<AcceptanceDecision>,
    pub last_error: Option<SessionError>,
    /// Face box from the latest scored frame.
    pub face: Option<FaceRegion>,
}

struct CaptureSession {
    id: Uuid,
    subject_id: String,
    state: SessionState,
    aggregator: CaptureAggregator,
    current: Angle,
    last_decision: Option<AcceptanceDecision>,
    last_error: Option<SessionError>,
    last_scored: u64,
    last_face: Option<FaceRegion>,
}

pub struct CaptureController {
    provider: Arc<dyn CameraProvider>,
    camera: CameraConfig,
    capture: CaptureConfig,
    analyzer: QualityAnalyzer,
    policy: AcceptancePolicy,
    session: Option<CaptureSession>,
    sampler: Option<FrameSampler>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl CaptureController {
    pub fn new(provider: Arc<dyn CameraProvider>, config: &Config) -> Self {
        Self {
            provider,
            camera: config.camera.clone(),
            capture: config.capture.clone(),
            analyzer: QualityAnalyzer::new(&config.acceptance),
            policy: AcceptancePolicy::from_config(&config.acceptance),
            session: None,
            sampler: None,
            subscribers: Vec::new(),
        }
    }

    /// Receives every event published from now on.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Records the failure on the session, publishes it and hands it back.
    fn fail(&mut self, err: CaptureError) -> CaptureError {
        tracing::warn!("Capture session error: {}", err);
        let error = SessionError { kind: err.kind(), message: err.to_string() };
        if let Some(session) = self.session.as_mut() {
            session.last_error = Some(error.clone());
        }
        self.emit(SessionEvent::Error { kind: error.kind, message: error.message });
        err
    }

    /// Opens a new session for `subject_id`, releasing any camera held by a
    /// previous one. The camera is not acquired until [`start`](Self::start).
    pub fn begin_session(&mut self, subject_id: &str) -> Uuid {
        self.stop();

        let aggregator = CaptureAggregator::new(self.capture.angles.clone(), self.capture.effective_min_required());
        let current = aggregator.angles().first().copied().unwrap_or(Angle::Frontal);
        let id = Uuid::new_v4();
        tracing::info!(
            "Capture session {} for {}: {} of {} angles required",
            id,
            subject_id,
            aggregator.min_required(),
            aggregator.angles().len()
        );

        self.session = Some(CaptureSession {
            id,
            subject_id: subject_id.to_string(),
            state: SessionState::Idle,
            aggregator,
            current,
            last_decision: None,
            last_error: None,
            last_scored: 0,
            last_face: None,
        });
        id
    }

    fn active_session(&self) -> Result<&CaptureSession> {
        match self.session.as_ref() {
            Some(session) if !session.state.is_finished() => Ok(session),
            _ => Err(CaptureError::SessionInactive),
        }
    }

    fn active_session_mut(&mut self) -> Result<&mut CaptureSession> {
        match self.session.as_mut() {
            Some(session) if !session.state.is_finished() => Ok(session),
            _ => Err(CaptureError::SessionInactive),
        }
    }

    /// Acquires the camera and starts sampling.
    ///
    /// Fails with the provider's error, or with `DeviceTimeout` when the
    /// device neither opens nor delivers a first frame within the configured
    /// acquisition timeout. A camera already held is released first.
    pub fn start(&mut self) -> Result<()> {
        if self.active_session().is_err() {
            return Err(self.fail(CaptureError::SessionInactive));
        }
        self.release_camera();

        let timeout = Duration::from_millis(self.camera.acquire_timeout_ms);
        let started = Instant::now();
        let constraints = CameraConstraints::from(&self.camera);

        let source = match acquire_with_timeout(Arc::clone(&self.provider), constraints, timeout) {
            Ok(source) => source,
            Err(e) => return Err(self.fail(e)),
        };

        let slot = FrameSlot::new();
        let interval = Duration::from_millis(self.camera.sample_interval_ms);
        let mut sampler = match FrameSampler::spawn(source, interval, slot.clone()) {
            Ok(sampler) => sampler,
            Err(e) => return Err(self.fail(e)),
        };

        // Ready means a frame with real dimensions; 0x0 frames come from a
        // device that has not started streaming.
        while !slot.latest().map_or(false, |frame| frame.validate().is_ok()) {
            if let Some(failure) = slot.take_failure() {
                sampler.stop();
                return Err(self.fail(CaptureError::DeviceUnavailable(failure)));
            }
            if started.elapsed() >= timeout {
                sampler.stop();
                return Err(self.fail(CaptureError::DeviceTimeout(timeout)));
            }
            std::thread::sleep(FIRST_FRAME_POLL);
        }

        let device = sampler.device().to_string();
        self.sampler = Some(sampler);

        let session_id = match self.session.as_mut() {
            Some(session) => {
                session.last_error = None;
                if session.state == SessionState::Idle {
                    session.state = SessionState::Collecting;
                }
                session.id
            }
            None => return Err(CaptureError::SessionInactive),
        };

        tracing::info!("Camera started for session {}: {}", session_id, device);
        self.emit(SessionEvent::Started { session_id, device });
        Ok(())
    }

    pub fn is_camera_active(&self) -> bool {
        self.sampler.as_ref().map_or(false, |s| !s.slot().is_closed())
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.sampler.as_ref().and_then(|s| s.slot().latest())
    }

    /// Most recent frame for scoring, or the sampler's terminal failure.
    fn sample(&mut self) -> Result<Option<Arc<Frame>>> {
        let Some(sampler) = self.sampler.as_ref() else {
            return Err(CaptureError::SessionInactive);
        };
        if let Some(failure) = sampler.slot().take_failure() {
            self.release_camera();
            return Err(self.fail(CaptureError::DeviceUnavailable(failure)));
        }
        Ok(sampler.slot().latest())
    }

    /// Scores the newest frame against `angle` and stores it when the gate allows.
    ///
    /// Under [`GateMode::Advisory`] the frame is stored even when checks fail.
    pub fn capture_current_frame(&mut self, angle: Angle) -> Result<CaptureOutcome> {
        self.check_angle(angle)?;
        if !self.is_camera_active() {
            return Err(self.fail(CaptureError::SessionInactive));
        }

        let Some(frame) = self.sample()? else {
            return Ok(CaptureOutcome::NoFrame);
        };
        let Some((decision, report)) = self.score(&frame, angle)? else {
            return Ok(CaptureOutcome::NoFrame);
        };

        if !decision.accepted() && self.capture.gate == GateMode::Enforce {
            tracing::debug!("{}", decision);
            self.emit(SessionEvent::Rejected(decision.clone()));
            return Ok(CaptureOutcome::Rejected(decision));
        }
        if !decision.accepted() {
            tracing::info!("Storing {} despite failed checks (advisory gate)", angle);
        }

        let capture = Capture::from_frame(angle, &frame, &report, self.capture.jpeg_quality)
            .map_err(|e| self.fail(e))?;
        self.store(angle, capture)
    }

    /// Refuses angles outside the session, recording the refusal for the view.
    fn check_angle(&mut self, angle: Angle) -> Result<()> {
        let required = match self.active_session() {
            Ok(session) => session.aggregator.angles().contains(&angle),
            Err(e) => return Err(self.fail(e)),
        };
        if !required {
            return Err(self.fail(CaptureError::AngleNotRequired(angle)));
        }
        Ok(())
    }

    /// Scores the newest unseen frame for the current angle.
    ///
    /// With automatic capture enabled an accepted frame is stored; otherwise
    /// the decision only refreshes the `ready` hint. Returns `None` when there
    /// is no new frame or no camera.
    pub fn poll(&mut self) -> Result<Option<CaptureOutcome>> {
        let (angle, last_scored) = match self.active_session() {
            Ok(session) => (session.current, session.last_scored),
            Err(_) => return Ok(None),
        };
        if !self.is_camera_active() {
            return Ok(None);
        }

        let frame = match self.sample()? {
            Some(frame) if frame.sequence != last_scored => frame,
            _ => return Ok(None),
        };
        let Some((decision, report)) = self.score(&frame, angle)? else {
            return Ok(Some(CaptureOutcome::NoFrame));
        };

        if !self.capture.effective_auto_capture() {
            return Ok(Some(CaptureOutcome::Evaluated(decision)));
        }
        if !decision.accepted() {
            return Ok(Some(CaptureOutcome::Rejected(decision)));
        }

        let capture = Capture::from_frame(angle, &frame, &report, self.capture.jpeg_quality)
            .map_err(|e| self.fail(e))?;
        self.store(angle, capture).map(Some)
    }

    /// `None` for frames that are not ready yet.
    fn score(
        &mut self,
        frame: &Frame,
        angle: Angle,
    ) -> Result<Option<(AcceptanceDecision, QualityReport)>> {
        let report = match self.analyzer.analyze(frame) {
            Ok(report) => report,
            Err(e) if e.is_silently_recoverable() => {
                tracing::debug!("Skipping frame {}: {}", frame.sequence, e);
                return Ok(None);
            }
            Err(e) => return Err(self.fail(e)),
        };
        let decision = self.policy.evaluate(angle, &report);

        let session = self.active_session_mut()?;
        session.last_scored = frame.sequence;
        session.last_face = report.face.region;
        if angle == session.current {
            session.last_decision = Some(decision.clone());
        }
        Ok(Some((decision, report)))
    }

    fn store(&mut self, angle: Angle, capture: Capture) -> Result<CaptureOutcome> {
        let (quality, confidence) = (capture.quality, capture.confidence);
        let session = self.active_session_mut()?;
        let progress = session.aggregator.add(angle, capture)?;

        if let Some(next) = session.aggregator.next_missing() {
            session.current = next;
        }
        session.last_decision = None;
        session.last_error = None;

        let newly_complete = progress.complete && session.state == SessionState::Collecting;
        if newly_complete {
            session.state = SessionState::Complete;
        }
        let all_captured = progress.missing.is_empty();
        let session_id = session.id;

        tracing::info!(
            "Captured {} (quality {:.2}, confidence {:.2}): {}/{} required",
            angle, quality, confidence, progress.captured, progress.required
        );
        self.emit(SessionEvent::Captured { angle, quality, confidence });
        self.emit(SessionEvent::Progress(progress.clone()));
        if newly_complete {
            tracing::info!("Session {} complete", session_id);
            self.emit(SessionEvent::Completed { session_id });
        }
        if all_captured {
            self.stop();
        }

        Ok(CaptureOutcome::Stored { angle, progress })
    }

    /// Drops the capture for `angle`, makes it current and resumes sampling.
    pub fn retake(&mut self, angle: Angle) -> Result<()> {
        self.check_angle(angle)?;
        let session = self.active_session_mut()?;
        session.aggregator.remove(angle);
        session.current = angle;
        session.last_decision = None;
        if !session.aggregator.is_complete() && session.state == SessionState::Complete {
            session.state = SessionState::Collecting;
        }
        let progress = session.aggregator.progress();

        tracing::info!("Retaking {}", angle);
        self.emit(SessionEvent::Retaken { angle: Some(angle) });
        self.emit(SessionEvent::Progress(progress));
        self.resume()
    }

    pub fn retake_all(&mut self) -> Result<()> {
        let session = self.active_session_mut()?;
        session.aggregator.clear();
        session.current = session.aggregator.angles().first().copied().unwrap_or(Angle::Frontal);
        session.last_decision = None;
        if session.state == SessionState::Complete {
            session.state = SessionState::Collecting;
        }
        let progress = session.aggregator.progress();

        tracing::info!("Retaking all angles");
        self.emit(SessionEvent::Retaken { angle: None });
        self.emit(SessionEvent::Progress(progress));
        self.resume()
    }

    fn resume(&mut self) -> Result<()> {
        if self.is_camera_active() {
            return Ok(());
        }
        self.start()
    }

    fn release_camera(&mut self) -> bool {
        match self.sampler.take() {
            Some(mut sampler) => {
                sampler.stop();
                true
            }
            None => false,
        }
    }

    /// Releases the camera. Idempotent; captures stay in place.
    pub fn stop(&mut self) {
        if self.release_camera() {
            self.emit(SessionEvent::Stopped);
        }
    }

    /// Stops the camera and throws away every capture of the session.
    pub fn discard(&mut self) {
        self.stop();
        if let Some(session) = self.session.as_mut() {
            if session.state != SessionState::Submitted {
                session.aggregator.clear();
                session.state = SessionState::Discarded;
                tracing::info!("Session {} discarded", session.id);
            }
        }
    }

    pub fn current_angle(&self) -> Option<Angle> {
        self.session.as_ref().map(|s| s.current)
    }

    pub fn select_angle(&mut self, angle: Angle) -> Result<()> {
        self.check_angle(angle)?;
        let session = self.active_session_mut()?;
        if session.current != angle {
            session.current = angle;
            session.last_decision = None;
        }
        Ok(())
    }

    /// Moves the current angle by `step` positions, wrapping around.
    pub fn cycle_angle(&mut self, step: isize) -> Result<Angle> {
        let next = match self.active_session() {
            Ok(session) => {
                let angles = session.aggregator.angles();
                let position = angles.iter().position(|a| *a == session.current).unwrap_or(0) as isize;
                let len = (angles.len() as isize).max(1);
                angles.get((position + step).rem_euclid(len) as usize).copied()
            }
            Err(e) => return Err(self.fail(e)),
        };
        let Some(next) = next else {
            let current = self.current_angle().unwrap_or(Angle::Frontal);
            return Err(self.fail(CaptureError::AngleNotRequired(current)));
        };
        self.select_angle(next)?;
        Ok(next)
    }

    pub fn progress(&self) -> Option<Progress> {
        self.session.as_ref().map(|s| s.aggregator.progress())
    }

    pub fn status(&self) -> Option<SessionStatus> {
        let session = self.session.as_ref()?;
        Some(SessionStatus {
            session_id: session.id,
            subject_id: session.subject_id.clone(),
            state: session.state,
            camera_active: self.is_camera_active(),
            device: self.sampler.as_ref().map(|s| s.device().to_string()),
            current_angle: Some(session.current),
            captured: session
                .aggregator
                .angles()
                .iter()
                .copied()
                .filter(|a| session.aggregator.contains(*a))
                .collect(),
            progress: session.aggregator.progress(),
            auto_capture: self.capture.effective_auto_capture(),
            ready: session.last_decision.as_ref().map_or(false, |d| d.accepted()),
            last_decision: session.last_decision.clone(),
            last_error: session.last_error.clone(),
            face: session.last_face,
        })
    }

    pub fn captures(&self) -> Vec<&Capture> {
        match self.session.as_ref() {
            Some(session) => session
                .aggregator
                .angles()
                .iter()
                .filter_map(|a| session.aggregator.get(*a))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn build_payload(&self) -> Result<RegistrationPayload> {
        let session = self.active_session()?;
        session.aggregator.build_payload(&session.subject_id, session.id)
    }

    /// Hands the payload to `sink`. The camera is released first.
    ///
    /// On failure the session keeps its captures so the caller can retry.
    pub fn submit(&mut self, sink: &dyn RegistrationSink) -> Result<SubmissionReceipt> {
        let payload = match self.build_payload() {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(e)),
        };
        self.stop();

        tracing::info!(
            "Submitting {} captures for {} to {}",
            payload.capture_count(),
            payload.subject_id(),
            sink.name()
        );
        match sink.submit(&payload) {
            Ok(receipt) => {
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::Submitted;
                    session.last_error = None;
                }
                self.emit(SessionEvent::Submitted(receipt.clone()));
                Ok(receipt)
            }
            Err(e) => {
                tracing::error!("Submission to {} failed: {}", sink.name(), e);
                let err = match e {
                    CaptureError::SubmissionFailed(_) => e,
                    other => CaptureError::SubmissionFailed(other.to_string()),
                };
                Err(self.fail(err))
            }
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticProvider;
    use crate::common::config::{AcceptanceConfig, CapturePreset};

    fn config(preset: CapturePreset) -> Config {
        let mut config = Config::default();
        config.camera.width = 160;
        config.camera.height = 120;
        config.camera.sample_interval_ms = 10;
        config.camera.acquire_timeout_ms = 1000;
        config.acceptance = AcceptanceConfig::permissive();
        config.capture = CaptureConfig::from_preset(preset);
        config
    }

    fn wait_for_frame(controller: &CaptureController) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while controller.latest_frame().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_capture_requires_started_camera() {
        let provider = Arc::new(SyntheticProvider::new());
        let mut controller = CaptureController::new(provider, &config(CapturePreset::Quick));
        assert!(matches!(
            controller.capture_current_frame(Angle::Frontal),
            Err(CaptureError::SessionInactive)
        ));
        controller.begin_session("E100");
        assert!(matches!(
            controller.capture_current_frame(Angle::Frontal),
            Err(CaptureError::SessionInactive)
        ));
    }

    #[test]
    fn test_start_moves_session_to_collecting() {
        let provider = Arc::new(SyntheticProvider::new());
        let mut controller = CaptureController::new(provider.clone(), &config(CapturePreset::Quick));
        let events = controller.subscribe();
        controller.begin_session("E100");
        controller.start().unwrap();

        let status = controller.status().unwrap();
        assert_eq!(status.state, SessionState::Collecting);
        assert!(status.camera_active);
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Started { .. })));
        assert_eq!(provider.open_handles(), 1);

        controller.stop();
        controller.stop();
        assert_eq!(provider.open_handles(), 0);
        assert!(!controller.status().unwrap().camera_active);
    }

    #[test]
    fn test_denied_camera_is_recorded_on_session() {
        let provider = Arc::new(SyntheticProvider::denied());
        let mut controller = CaptureController::new(provider, &config(CapturePreset::Quick));
        controller.begin_session("E100");
        let err = controller.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let status = controller.status().unwrap();
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.last_error.unwrap().kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_manual_capture_advances_current_angle() {
        let provider = Arc::new(SyntheticProvider::new());
        let mut controller = CaptureController::new(provider, &config(CapturePreset::Quick));
        controller.begin_session("E100");
        controller.start().unwrap();
        wait_for_frame(&controller);

        let outcome = controller.capture_current_frame(Angle::Frontal).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Stored { angle: Angle::Frontal, .. }));
        assert_eq!(controller.current_angle(), Some(Angle::LeftProfile));
    }

    #[test]
    fn test_refused_commands_are_recorded_on_status() {
        let provider = Arc::new(SyntheticProvider::new());
        let mut config = config(CapturePreset::Quick);
        config.capture.angles = vec![Angle::Frontal, Angle::LeftProfile];
        let mut controller = CaptureController::new(provider, &config);
        let events = controller.subscribe();
        controller.begin_session("E100");

        assert!(controller.select_angle(Angle::Up).is_err());
        assert_eq!(controller.status().unwrap().last_error.unwrap().kind, ErrorKind::AngleNotRequired);

        assert!(controller.capture_current_frame(Angle::Frontal).is_err());
        let error = controller.status().unwrap().last_error.unwrap();
        assert_eq!(error.kind, ErrorKind::SessionInactive);
        assert_eq!(events.try_iter().filter(|e| matches!(e, SessionEvent::Error { .. })).count(), 2);
    }

    #[test]
    fn test_cycle_angle_without_angles_is_an_error() {
        let provider = Arc::new(SyntheticProvider::new());
        let mut config = config(CapturePreset::Quick);
        config.capture.angles.clear();
        let mut controller = CaptureController::new(provider, &config);
        controller.begin_session("E100");
        assert!(matches!(controller.cycle_angle(1), Err(CaptureError::AngleNotRequired(_))));
        assert!(controller.status().unwrap().last_error.is_some());
    }

    #[test]
    fn test_cycle_angle_wraps() {
        let provider = Arc::new(SyntheticProvider::new());
        let mut controller = CaptureController::new(provider, &config(CapturePreset::Quick));
        controller.begin_session("E100");
        assert_eq!(controller.cycle_angle(-1).unwrap(), Angle::Down);
        assert_eq!(controller.cycle_angle(1).unwrap(), Angle::Frontal);
    }
}
