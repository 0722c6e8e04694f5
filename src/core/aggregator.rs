use crate::common::error::{CaptureError, Result};
use crate::core::angle::Angle;
use crate::core::capture::Capture;
use crate::core::payload::RegistrationPayload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Snapshot emitted after every change to the capture set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub captured: usize,
    pub required: usize,
    pub total_angles: usize,
    /// Captured share of `required`, capped at 100.
    pub percent: u8,
    pub complete: bool,
    pub missing: Vec<Angle>,
}

/// Owns the angle to capture mapping for one session.
///
/// Holds at most one capture per angle; adding for an angle that already
/// has one replaces it.
#[derive(Debug, Clone)]
pub struct CaptureAggregator {
    angles: Vec<Angle>,
    min_required: usize,
    captures: BTreeMap<Angle, Capture>,
}

impl CaptureAggregator {
    /// `min_required` is clamped to `1..=angles.len()`.
    pub fn new(angles: Vec<Angle>, min_required: usize) -> Self {
        let mut unique = Vec::with_capacity(angles.len());
        for angle in angles {
            if !unique.contains(&angle) {
                unique.push(angle);
            }
        }
        let min_required = min_required.clamp(1, unique.len().max(1));
        Self { angles: unique, min_required, captures: BTreeMap::new() }
    }

    pub fn angles(&self) -> &[Angle] {
        &self.angles
    }

    pub fn min_required(&self) -> usize {
        self.min_required
    }

    pub fn add(&mut self, angle: Angle, mut capture: Capture) -> Result<Progress> {
        if !self.angles.contains(&angle) {
            return Err(CaptureError::AngleNotRequired(angle));
        }
        capture.angle = angle;
        if self.captures.insert(angle, capture).is_some() {
            tracing::debug!("Replaced capture for {}", angle);
        }
        Ok(self.progress())
    }

    pub fn remove(&mut self, angle: Angle) -> Option<Capture> {
        self.captures.remove(&angle)
    }

    pub fn clear(&mut self) {
        self.captures.clear();
    }

    pub fn get(&self, angle: Angle) -> Option<&Capture> {
        self.captures.get(&angle)
    }

    pub fn contains(&self, angle: Angle) -> bool {
        self.captures.contains_key(&angle)
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.captures.len() >= self.min_required
    }

    /// First required angle, in session order, still lacking a capture.
    pub fn next_missing(&self) -> Option<Angle> {
        self.angles.iter().copied().find(|a| !self.captures.contains_key(a))
    }

    pub fn progress(&self) -> Progress {
        let captured = self.captures.len();
        let percent = ((captured * 100) / self.min_required).min(100) as u8;
        Progress {
            captured,
            required: self.min_required,
            total_angles: self.angles.len(),
            percent,
            complete: self.is_complete(),
            missing: self.angles.iter().copied().filter(|a| !self.captures.contains_key(a)).collect(),
        }
    }

    /// Refuses with `InsufficientCaptures` until the minimum is met.
    pub fn build_payload(&self, subject_id: &str, session_id: Uuid) -> Result<RegistrationPayload> {
        if !self.is_complete() {
            return Err(CaptureError::InsufficientCaptures {
                captured: self.captures.len(),
                required: self.min_required,
            });
        }
        let captures = self
            .angles
            .iter()
            .filter_map(|a| self.captures.get(a).cloned())
            .collect();
        Ok(RegistrationPayload::new(subject_id.to_string(), session_id, captures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::HeadPose;
    use chrono::Utc;

    fn capture(angle: Angle, quality: f32) -> Capture {
        Capture {
            angle,
            jpeg: vec![angle as u8],
            sha256: String::new(),
            width: 4,
            height: 4,
            captured_at: Utc::now(),
            quality,
            confidence: 0.9,
            liveness: 0.8,
            anti_spoofing: 0.8,
            pose: HeadPose::default(),
            eye_count: 2,
            eye_distance: 10.0,
            simulated: true,
        }
    }

    #[test]
    fn test_one_capture_per_angle() {
        let mut agg = CaptureAggregator::new(Angle::ALL.to_vec(), 5);
        agg.add(Angle::Frontal, capture(Angle::Frontal, 0.5)).unwrap();
        let progress = agg.add(Angle::Frontal, capture(Angle::Frontal, 0.9)).unwrap();
        assert_eq!(progress.captured, 1);
        assert_eq!(agg.get(Angle::Frontal).unwrap().quality, 0.9);
    }

    #[test]
    fn test_unknown_angle_is_refused() {
        let mut agg = CaptureAggregator::new(vec![Angle::Frontal, Angle::LeftProfile], 2);
        let err = agg.add(Angle::Up, capture(Angle::Up, 0.7)).unwrap_err();
        assert!(matches!(err, CaptureError::AngleNotRequired(Angle::Up)));
        assert!(agg.is_empty());
    }

    #[test]
    fn test_progress_percent_and_missing() {
        let mut agg = CaptureAggregator::new(Angle::ALL.to_vec(), 2);
        let progress = agg.add(Angle::Down, capture(Angle::Down, 0.7)).unwrap();
        assert_eq!(progress.percent, 50);
        assert!(!progress.complete);
        assert_eq!(progress.missing.len(), 4);
        assert_eq!(agg.next_missing(), Some(Angle::Frontal));

        let progress = agg.add(Angle::Up, capture(Angle::Up, 0.7)).unwrap();
        assert_eq!(progress.percent, 100);
        assert!(progress.complete);
    }

    #[test]
    fn test_representative_prefers_frontal_then_best_quality() {
        let mut agg = CaptureAggregator::new(Angle::ALL.to_vec(), 2);
        agg.add(Angle::Up, capture(Angle::Up, 0.6)).unwrap();
        agg.add(Angle::Down, capture(Angle::Down, 0.8)).unwrap();
        let payload = agg.build_payload("E1", Uuid::new_v4()).unwrap();
        assert_eq!(payload.representative().unwrap().angle, Angle::Down);
        assert!((payload.average_quality() - 0.7).abs() < 1e-6);

        agg.add(Angle::Frontal, capture(Angle::Frontal, 0.5)).unwrap();
        let payload = agg.build_payload("E1", Uuid::new_v4()).unwrap();
        assert_eq!(payload.representative().unwrap().angle, Angle::Frontal);
        assert_eq!(payload.angles(), vec![Angle::Frontal, Angle::Up, Angle::Down]);
    }

    #[test]
    fn test_every_subset_below_minimum_refuses_payload() {
        for min in [2usize, 5] {
            for mask in 0u32..(1 << Angle::ALL.len()) {
                let mut agg = CaptureAggregator::new(Angle::ALL.to_vec(), min);
                for (bit, angle) in Angle::ALL.iter().enumerate() {
                    if mask & (1 << bit) != 0 {
                        agg.add(*angle, capture(*angle, 0.7)).unwrap();
                    }
                }

                let stored = mask.count_ones() as usize;
                assert_eq!(agg.len(), stored);
                assert_eq!(agg.is_complete(), stored >= min, "mask {:05b}, min {}", mask, min);
                match agg.build_payload("E1", Uuid::new_v4()) {
                    Ok(payload) => {
                        assert!(stored >= min, "mask {:05b}, min {}", mask, min);
                        assert_eq!(payload.capture_count(), stored);
                    }
                    Err(CaptureError::InsufficientCaptures { captured, required }) => {
                        assert!(stored < min, "mask {:05b}, min {}", mask, min);
                        assert_eq!((captured, required), (stored, min));
                    }
                    Err(other) => panic!("unexpected error {}", other),
                }
            }
        }
    }

    #[test]
    fn test_minimum_is_clamped_to_angle_count() {
        let agg = CaptureAggregator::new(vec![Angle::Frontal, Angle::Frontal], 5);
        assert_eq!(agg.angles().len(), 1);
        assert_eq!(agg.min_required(), 1);
    }
}
