use facecheck::common::config::{AcceptanceConfig, CaptureConfig, CapturePreset, GateMode};
use facecheck::core::CaptureOutcome;
use facecheck::{
    Angle, CaptureController, CaptureError, Config, EnrollmentStore, ErrorKind, RegistrationPayload,
    RegistrationSink, SessionEvent, SessionState, SubmissionReceipt, SyntheticProvider,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_config(preset: CapturePreset) -> Config {
    let mut config = Config::default();
    config.camera.width = 160;
    config.camera.height = 120;
    config.camera.sample_interval_ms = 10;
    config.camera.acquire_timeout_ms = 1000;
    config.acceptance = AcceptanceConfig::permissive();
    config.capture = CaptureConfig::from_preset(preset);
    config
}

fn started(provider: &SyntheticProvider, config: &Config) -> CaptureController {
    let mut controller = CaptureController::new(Arc::new(provider.clone()), config);
    controller.begin_session("EMP001");
    controller.start().unwrap();
    wait_until(|| controller.latest_frame().is_some());
    controller
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn capture(controller: &mut CaptureController, provider: &SyntheticProvider, angle: Angle) -> CaptureOutcome {
    provider.show_angle(angle);
    controller.capture_current_frame(angle).unwrap()
}

struct FailingSink;

impl RegistrationSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn submit(&self, _payload: &RegistrationPayload) -> facecheck::Result<SubmissionReceipt> {
        Err(CaptureError::SubmissionFailed("backend returned 503".into()))
    }
}

#[test]
fn test_quick_flow_builds_payload_from_two_angles() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));

    assert!(matches!(capture(&mut controller, &provider, Angle::Frontal), CaptureOutcome::Stored { .. }));
    assert!(matches!(
        controller.build_payload(),
        Err(CaptureError::InsufficientCaptures { captured: 1, required: 2 })
    ));

    let outcome = capture(&mut controller, &provider, Angle::LeftProfile);
    match outcome {
        CaptureOutcome::Stored { progress, .. } => {
            assert!(progress.complete);
            assert_eq!(progress.percent, 100);
            assert_eq!(progress.missing, vec![Angle::RightProfile, Angle::Up, Angle::Down]);
        }
        other => panic!("expected a stored capture, got {:?}", other),
    }

    let status = controller.status().unwrap();
    assert_eq!(status.state, SessionState::Complete);
    // optional angles can still be added
    assert!(status.camera_active);

    let payload = controller.build_payload().unwrap();
    assert_eq!(payload.capture_count(), 2);
    assert_eq!(payload.angles(), vec![Angle::Frontal, Angle::LeftProfile]);
    assert_eq!(payload.representative().unwrap().angle, Angle::Frontal);
    assert_eq!(payload.subject_id(), "EMP001");
    assert!(payload.captures().iter().all(|c| !c.jpeg.is_empty()));
}

#[test]
fn test_five_angle_session_completes_on_last_capture() {
    let provider = SyntheticProvider::new();
    let mut config = test_config(CapturePreset::Quick);
    config.capture.min_required = Some(5);
    let mut controller = started(&provider, &config);
    let events = controller.subscribe();

    for (i, angle) in Angle::ALL.iter().enumerate() {
        assert!(controller.build_payload().is_err(), "payload available after {} captures", i);
        capture(&mut controller, &provider, *angle);
        let complete = controller.status().unwrap().state == SessionState::Complete;
        assert_eq!(complete, i == 4);
    }

    // every angle captured: the camera is released
    assert!(!controller.is_camera_active());
    assert_eq!(provider.open_handles(), 0);
    assert_eq!(controller.build_payload().unwrap().capture_count(), 5);

    let completions = events.try_iter().filter(|e| matches!(e, SessionEvent::Completed { .. })).count();
    assert_eq!(completions, 1);
}

#[test]
fn test_recapturing_an_angle_replaces_it() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));

    capture(&mut controller, &provider, Angle::Frontal);
    let first = controller.captures()[0].sha256.clone();
    let seen = controller.latest_frame().unwrap().sequence;
    wait_until(|| controller.latest_frame().map_or(false, |f| f.sequence > seen));
    capture(&mut controller, &provider, Angle::Frontal);

    assert_eq!(controller.captures().len(), 1);
    assert_eq!(controller.progress().unwrap().captured, 1);
    assert!(!first.is_empty());
}

#[test]
fn test_retake_drops_angle_and_reopens_session() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));
    capture(&mut controller, &provider, Angle::Frontal);
    capture(&mut controller, &provider, Angle::LeftProfile);
    assert_eq!(controller.status().unwrap().state, SessionState::Complete);

    controller.retake(Angle::Frontal).unwrap();
    let status = controller.status().unwrap();
    assert_eq!(status.state, SessionState::Collecting);
    assert_eq!(status.current_angle, Some(Angle::Frontal));
    assert_eq!(status.captured, vec![Angle::LeftProfile]);
    assert!(controller.build_payload().is_err());

    controller.retake_all().unwrap();
    assert_eq!(controller.progress().unwrap().captured, 0);
    assert_eq!(controller.current_angle(), Some(Angle::Frontal));
}

#[test]
fn test_retake_restarts_a_released_camera() {
    let provider = SyntheticProvider::new();
    let mut config = test_config(CapturePreset::Quick);
    config.capture.angles = vec![Angle::Frontal, Angle::LeftProfile];
    let mut controller = started(&provider, &config);
    capture(&mut controller, &provider, Angle::Frontal);
    capture(&mut controller, &provider, Angle::LeftProfile);
    assert!(!controller.is_camera_active());

    controller.retake(Angle::LeftProfile).unwrap();
    assert!(controller.is_camera_active());
    assert_eq!(provider.open_handles(), 1);
}

#[test]
fn test_no_capture_after_stop() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));
    controller.stop();

    assert_eq!(provider.open_handles(), 0);
    assert!(controller.latest_frame().is_none());
    assert!(matches!(
        controller.capture_current_frame(Angle::Frontal),
        Err(CaptureError::SessionInactive)
    ));
    assert!(controller.poll().unwrap().is_none());
    assert_eq!(controller.progress().unwrap().captured, 0);
}

#[test]
fn test_angle_outside_session_is_refused() {
    let provider = SyntheticProvider::new();
    let mut config = test_config(CapturePreset::Quick);
    config.capture.angles = vec![Angle::Frontal, Angle::LeftProfile];
    let mut controller = started(&provider, &config);

    assert!(matches!(
        controller.capture_current_frame(Angle::Up),
        Err(CaptureError::AngleNotRequired(Angle::Up))
    ));
    assert!(controller.select_angle(Angle::Down).is_err());
}

#[test]
fn test_denied_camera_surfaces_as_state() {
    let provider = SyntheticProvider::denied();
    let mut controller = CaptureController::new(Arc::new(provider.clone()), &test_config(CapturePreset::Quick));
    let events = controller.subscribe();
    controller.begin_session("EMP001");

    assert!(matches!(controller.start(), Err(CaptureError::PermissionDenied(_))));
    let status = controller.status().unwrap();
    assert!(!status.camera_active);
    assert_eq!(status.last_error.unwrap().kind, ErrorKind::PermissionDenied);
    assert!(events
        .try_iter()
        .any(|e| matches!(e, SessionEvent::Error { kind: ErrorKind::PermissionDenied, .. })));
}

#[test]
fn test_stalled_camera_times_out() {
    let provider = SyntheticProvider::stalled(Duration::from_millis(600));
    let mut config = test_config(CapturePreset::Quick);
    config.camera.acquire_timeout_ms = 100;
    let mut controller = CaptureController::new(Arc::new(provider.clone()), &config);
    controller.begin_session("EMP001");

    let err = controller.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceTimeout);
    assert_eq!(controller.status().unwrap().state, SessionState::Idle);

    // the late source is released once it arrives
    wait_until(|| provider.open_handles() == 0);
}

#[test]
fn test_device_that_never_streams_times_out() {
    let provider = SyntheticProvider::new();
    provider.blank_frames(true);
    let mut config = test_config(CapturePreset::Quick);
    config.camera.acquire_timeout_ms = 200;
    let mut controller = CaptureController::new(Arc::new(provider.clone()), &config);
    controller.begin_session("EMP001");

    let err = controller.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceTimeout);
    let status = controller.status().unwrap();
    assert_eq!(status.state, SessionState::Idle);
    assert!(!status.camera_active);
    assert_eq!(status.last_error.unwrap().kind, ErrorKind::DeviceTimeout);
    assert_eq!(provider.open_handles(), 0);
}

#[test]
fn test_blank_frames_are_skipped() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));
    provider.blank_frames(true);
    wait_until(|| controller.latest_frame().map_or(false, |f| f.width() == 0));

    let outcome = controller.capture_current_frame(Angle::Frontal).unwrap();
    assert!(matches!(outcome, CaptureOutcome::NoFrame));
    assert_eq!(controller.progress().unwrap().captured, 0);
    assert!(controller.status().unwrap().last_error.is_none());

    provider.blank_frames(false);
    let seen = controller.latest_frame().unwrap().sequence;
    wait_until(|| controller.latest_frame().map_or(false, |f| f.sequence > seen));
    assert!(matches!(
        controller.capture_current_frame(Angle::Frontal).unwrap(),
        CaptureOutcome::Stored { .. }
    ));
}

#[test]
fn test_guided_preset_captures_every_angle_automatically() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Guided));

    wait_until(|| {
        if let Some(angle) = controller.current_angle() {
            provider.show_angle(angle);
        }
        controller.poll().unwrap();
        !controller.is_camera_active()
    });

    let status = controller.status().unwrap();
    assert_eq!(status.state, SessionState::Complete);
    assert_eq!(status.captured, Angle::ALL.to_vec());
    assert_eq!(provider.open_handles(), 0);
    assert_eq!(controller.build_payload().unwrap().capture_count(), 5);
}

#[test]
fn test_manual_poll_only_evaluates() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));

    let mut outcome = None;
    wait_until(|| {
        outcome = controller.poll().unwrap();
        outcome.is_some()
    });
    assert!(matches!(outcome, Some(CaptureOutcome::Evaluated(ref d)) if d.accepted()));
    assert!(controller.status().unwrap().ready);
    assert_eq!(controller.progress().unwrap().captured, 0);
}

#[test]
fn test_gate_mode_decides_storage_of_failed_frames() {
    let provider = SyntheticProvider::new();
    let mut config = test_config(CapturePreset::Quick);
    config.acceptance.min_quality = 1.0;

    let mut enforcing = started(&provider, &config);
    let outcome = enforcing.capture_current_frame(Angle::Frontal).unwrap();
    match outcome {
        CaptureOutcome::Rejected(decision) => assert!(!decision.hints().is_empty()),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(enforcing.progress().unwrap().captured, 0);
    enforcing.stop();

    config.capture.gate = GateMode::Advisory;
    let mut advisory = started(&provider, &config);
    assert!(matches!(
        advisory.capture_current_frame(Angle::Frontal).unwrap(),
        CaptureOutcome::Stored { .. }
    ));
    assert!(!advisory.status().unwrap().ready);
}

#[test]
fn test_submit_to_local_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = EnrollmentStore::new_with_paths(tmp.path().join("records"), tmp.path().join("images")).unwrap();
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));

    assert!(controller.submit(&store).is_err());
    assert!(!store.exists("EMP001"));

    capture(&mut controller, &provider, Angle::Frontal);
    capture(&mut controller, &provider, Angle::RightProfile);
    let receipt = controller.submit(&store).unwrap();

    assert_eq!(receipt.capture_count, 2);
    assert_eq!(receipt.sink, "local");
    assert_eq!(controller.status().unwrap().state, SessionState::Submitted);
    assert_eq!(provider.open_handles(), 0);
    assert!(matches!(controller.build_payload(), Err(CaptureError::SessionInactive)));

    let record = store.get("EMP001").unwrap();
    assert_eq!(record.angles(), vec![Angle::Frontal, Angle::RightProfile]);
    assert!(record.captures.iter().all(|c| !c.jpeg.is_empty()));
}

#[test]
fn test_failed_submission_keeps_captures() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));
    capture(&mut controller, &provider, Angle::Frontal);
    capture(&mut controller, &provider, Angle::LeftProfile);

    let err = controller.submit(&FailingSink).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubmissionFailed);

    let status = controller.status().unwrap();
    assert_eq!(status.state, SessionState::Complete);
    assert_eq!(status.last_error.unwrap().kind, ErrorKind::SubmissionFailed);
    assert_eq!(controller.build_payload().unwrap().capture_count(), 2);
}

#[test]
fn test_discard_clears_session() {
    let provider = SyntheticProvider::new();
    let mut controller = started(&provider, &test_config(CapturePreset::Quick));
    capture(&mut controller, &provider, Angle::Frontal);

    controller.discard();
    assert_eq!(provider.open_handles(), 0);
    assert_eq!(controller.status().unwrap().state, SessionState::Discarded);
    assert!(controller.captures().is_empty());
    assert!(controller.start().is_err());
}

#[test]
fn test_dropping_controller_releases_camera() {
    let provider = SyntheticProvider::new();
    {
        let _controller = started(&provider, &test_config(CapturePreset::Quick));
        assert_eq!(provider.open_handles(), 1);
    }
    assert_eq!(provider.open_handles(), 0);
}
