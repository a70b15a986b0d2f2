// Message types exchanged with cubes

use serde::{Deserialize, Serialize};

// Timed dual-wheel drive, pattern engine -> cube
// Duty is signed motor power (-115..115), not a velocity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: i16,
    pub right: i16,
    pub duration_ms: u32,
}

impl DriveCommand {
    pub fn new(left: i16, right: i16, duration_ms: u32) -> Self {
        Self {
            left,
            right,
            duration_ms,
        }
    }

    /// Zero duty, zero duration: the stop command
    pub fn stop() -> Self {
        Self::new(0, 0, 0)
    }

    /// Equal duty on both wheels
    pub fn is_straight(&self) -> bool {
        self.left == self.right
    }

    /// Opposite, equal-magnitude duty (turn in place)
    pub fn is_spin(&self) -> bool {
        self.left != 0 && self.left == -self.right
    }
}

// Sound request, pattern engine -> cube
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundCommand {
    pub preset: u8,
}

/// Link status reported by a cube bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeStatus {
    pub connected: bool,
    pub sound: bool,
}

/// Asynchronous signals a cube can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    DoubleTap,
    ButtonPress,
}
