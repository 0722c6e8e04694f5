pub mod ascii_preview;

pub use ascii_preview::AsciiRenderer;

use crate::common::config::PreviewConfig;
use crate::common::error::{CaptureError, Result};
use crate::core::session::{CaptureController, SessionState};
use crate::service::{RegistrationSink, SubmissionReceipt};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, style, terminal};
use std::io::{self, Write};
use std::time::Duration;

/// How an interactive enrollment ended.
#[derive(Debug)]
pub enum EnrollmentOutcome {
    Submitted(SubmissionReceipt),
    Aborted,
}

/// Operator commands, decoded from key presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Capture,
    Retake,
    RetakeAll,
    NextAngle,
    PreviousAngle,
    Submit,
    Restart,
    Abort,
}

pub fn command_for_key(key: &KeyEvent) -> Option<Command> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Command::Abort);
    }
    match key.code {
        KeyCode::Char('c') | KeyCode::Char(' ') | KeyCode::Enter => Some(Command::Capture),
        KeyCode::Char('r') => Some(Command::Retake),
        KeyCode::Char('R') => Some(Command::RetakeAll),
        KeyCode::Char('n') | KeyCode::Right => Some(Command::NextAngle),
        KeyCode::Char('p') | KeyCode::Left => Some(Command::PreviousAngle),
        KeyCode::Char('s') => Some(Command::Submit),
        KeyCode::Char('o') => Some(Command::Restart),
        KeyCode::Esc | KeyCode::Char('q') => Some(Command::Abort),
        _ => None,
    }
}

fn read_command(timeout: Duration) -> io::Result<Option<Command>> {
    if event::poll(timeout)? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(command_for_key(&key));
            }
        }
    }
    Ok(None)
}

/// Raw mode plus hidden cursor for as long as it lives.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode()
            .map_err(|e| CaptureError::Other(anyhow::anyhow!("Failed to enable raw mode: {}", e)))?;
        execute!(io::stdout(), terminal::Clear(terminal::ClearType::All), cursor::Hide).ok();
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        execute!(io::stdout(), cursor::Show).ok();
        terminal::disable_raw_mode().ok();
    }
}

/// Runs the interactive capture loop until the operator submits or aborts.
///
/// The session must already be open; the camera is started here. Errors from
/// individual commands are shown in the status area and the loop carries on,
/// so the operator can retry or restart the camera with `o`.
pub fn run_enrollment(
    controller: &mut CaptureController,
    sink: &dyn RegistrationSink,
    preview: &PreviewConfig,
) -> Result<EnrollmentOutcome> {
    let _guard = TerminalGuard::enter()?;
    let renderer = AsciiRenderer::new(preview.width, preview.height);
    let refresh = Duration::from_millis(preview.refresh_ms);

    if let Err(e) = controller.start() {
        tracing::warn!("Camera start failed: {}", e);
    }

    loop {
        if let Err(e) = controller.poll() {
            tracing::debug!("Poll failed: {}", e);
        }

        let Some(status) = controller.status() else {
            return Err(CaptureError::SessionInactive);
        };

        let mut screen = String::new();
        if preview.enabled {
            match controller.latest_frame() {
                Some(frame) => screen.push_str(&renderer.render(&frame.image, status.face.as_ref(), &status)),
                None if status.state == SessionState::Complete => {
                    screen.push_str("Capture complete. Press s to submit.")
                }
                None => screen.push_str("Camera inactive. Press o to start it."),
            }
            screen.push_str("\r\n\r\n");
        }
        for line in renderer.status_lines(&status) {
            screen.push_str(&format!("{:<80}\r\n", line));
        }
        execute!(
            io::stdout(),
            cursor::MoveTo(0, 0),
            terminal::Clear(terminal::ClearType::FromCursorDown),
            style::Print(&screen)
        )
        .ok();
        io::stdout().flush().ok();

        let command = read_command(refresh)
            .map_err(|e| CaptureError::Other(anyhow::anyhow!("Failed to read input: {}", e)))?;
        let Some(command) = command else { continue };

        let current = status.current_angle.unwrap_or(crate::core::angle::Angle::Frontal);
        let result = match command {
            Command::Capture if !status.auto_capture => controller.capture_current_frame(current).map(|_| ()),
            Command::Capture => Ok(()),
            Command::Retake => controller.retake(current),
            Command::RetakeAll => controller.retake_all(),
            Command::NextAngle => controller.cycle_angle(1).map(|_| ()),
            Command::PreviousAngle => controller.cycle_angle(-1).map(|_| ()),
            Command::Restart => controller.start(),
            Command::Submit => match controller.submit(sink) {
                Ok(receipt) => return Ok(EnrollmentOutcome::Submitted(receipt)),
                Err(e) => Err(e),
            },
            Command::Abort => {
                controller.discard();
                return Ok(EnrollmentOutcome::Aborted);
            }
        };
        if let Err(e) = result {
            tracing::debug!("{:?} failed: {}", command, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_key_bindings() {
        assert_eq!(command_for_key(&key(KeyCode::Char(' '))), Some(Command::Capture));
        assert_eq!(command_for_key(&key(KeyCode::Char('r'))), Some(Command::Retake));
        assert_eq!(command_for_key(&key(KeyCode::Char('R'))), Some(Command::RetakeAll));
        assert_eq!(command_for_key(&key(KeyCode::Esc)), Some(Command::Abort));
        assert_eq!(command_for_key(&key(KeyCode::Char('x'))), None);
        assert_eq!(
            command_for_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Command::Abort)
        );
    }
}
