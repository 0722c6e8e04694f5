use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Head orientation a capture flow asks the subject to hold.
///
/// Yaw and pitch are measured in image coordinates: negative yaw means the
/// facial features have shifted toward the left edge of the frame, positive
/// pitch means they have shifted toward the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Angle {
    Frontal,
    LeftProfile,
    RightProfile,
    Up,
    Down,
}

impl Angle {
    pub const ALL: [Angle; 5] = [
        Angle::Frontal,
        Angle::LeftProfile,
        Angle::RightProfile,
        Angle::Up,
        Angle::Down,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Angle::Frontal => "frontal",
            Angle::LeftProfile => "left_profile",
            Angle::RightProfile => "right_profile",
            Angle::Up => "up",
            Angle::Down => "down",
        }
    }

    /// Instruction shown to the subject while this angle is pending.
    pub fn prompt(&self) -> &'static str {
        match self {
            Angle::Frontal => "Look straight at the camera",
            Angle::LeftProfile => "Turn your head to the left",
            Angle::RightProfile => "Turn your head to the right",
            Angle::Up => "Tilt your chin up",
            Angle::Down => "Tilt your chin down",
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Angle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "frontal" | "front" | "center" => Ok(Angle::Frontal),
            "left_profile" | "left" => Ok(Angle::LeftProfile),
            "right_profile" | "right" => Ok(Angle::RightProfile),
            "up" => Ok(Angle::Up),
            "down" => Ok(Angle::Down),
            other => Err(format!("unknown angle label: {}", other)),
        }
    }
}
