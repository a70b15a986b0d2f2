// Calibration, clamp bounds, timing, topics
use std::path::Path;

use serde::{Deserialize, Serialize};

// Turn calibration: ms of in-place rotation per requested degree
pub const MS_PER_DEG: f32 = 6.0;

// Extra wait after every timed command so the wheels stop before the next one
pub const MOTOR_SETTLE_MS: u32 = 50;

// Duty limits accepted by the cube firmware
pub const MAX_SPEED: i32 = 115;
pub const TURN_DUTY: i32 = 70;

// Duration clamps (ms)
pub const MOVE_MS_MIN: u32 = 10;
pub const MOVE_MS_MAX: u32 = 8000;
pub const TURN_MS_MIN: u32 = 30;
pub const TURN_MS_MAX: u32 = 2000;
pub const WAIT_MS_MAX: u32 = 10_000;

// Turn angle clamp (degrees, either direction)
pub const MAX_ANGLE_DEG: i32 = 360;

// Beep: preset id, how long the sound plays, and the spin pulse used when it can't
pub const BEEP_PRESET: u8 = 3;
pub const BEEP_SOUND_MS: u64 = 700;
pub const BEEP_FALLBACK_DUTY: i16 = 100;
pub const BEEP_FALLBACK_MS: u32 = 120;
pub const BEEP_FALLBACK_SETTLE_MS: u32 = 50;

// Runner pacing
pub const INTER_CUBE_PAUSE_MS: u64 = 300;
pub const STARTUP_DELAY_MS: u64 = 500;

// Zenoh topics, `{}` is the cube index
pub const TOPIC_CMD_DRIVE: &str = "cube/{}/cmd/drive"; // drive commands
pub const TOPIC_CMD_SOUND: &str = "cube/{}/cmd/sound"; // sound presets
pub const TOPIC_STATE_LINK: &str = "cube/{}/state/link"; // bridge link status
pub const TOPIC_EVENT_TRIGGER: &str = "cube/{}/event/trigger"; // double-tap etc.

// How long connect_zenoh waits for cubes to report a link state
pub const DISCOVERY_WINDOW_MS: u64 = 2000;

/// Expand a topic template for one cube
pub fn topic(template: &str, cube: usize) -> String {
    template.replace("{}", &cube.to_string())
}

/// Error loading a calibration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Speed, duration and angle bounds applied by the motion primitives
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub max_speed: i32,
    pub move_ms_min: u32,
    pub move_ms_max: u32,
    pub turn_ms_min: u32,
    pub turn_ms_max: u32,
    pub max_angle_deg: i32,
    pub turn_duty: i32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            max_speed: MAX_SPEED,
            move_ms_min: MOVE_MS_MIN,
            move_ms_max: MOVE_MS_MAX,
            turn_ms_min: TURN_MS_MIN,
            turn_ms_max: TURN_MS_MAX,
            max_angle_deg: MAX_ANGLE_DEG,
            turn_duty: TURN_DUTY,
        }
    }
}

/// Values lesson patterns use when a student doesn't pick their own
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LessonDefaults {
    pub speed: i32,
    pub move_ms: i32,
    pub turn_deg: i32,
}

impl Default for LessonDefaults {
    fn default() -> Self {
        Self {
            speed: 80,
            move_ms: 1000,
            turn_deg: 90,
        }
    }
}

impl LessonDefaults {
    /// Keep defaults inside the ranges the lesson sliders allowed
    fn clamped(self) -> Self {
        Self {
            speed: self.speed.clamp(10, MAX_SPEED),
            move_ms: self.move_ms.clamp(50, 3000),
            turn_deg: self.turn_deg.clamp(5, 180),
        }
    }
}

/// Process-wide tunables. Set once at startup, read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub ms_per_deg: f32,
    pub motor_settle_ms: u32,
    pub bounds: Bounds,
    pub defaults: LessonDefaults,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            ms_per_deg: MS_PER_DEG,
            motor_settle_ms: MOTOR_SETTLE_MS,
            bounds: Bounds::default(),
            defaults: LessonDefaults::default(),
        }
    }
}

impl CalibrationConfig {
    /// Parse from JSON; missing fields fall back to defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        Ok(cfg.normalized())
    }

    /// Load a JSON calibration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Apply command-line overrides, then normalize the result
    pub fn with_overrides(mut self, ms_per_deg: Option<f32>, settle_ms: Option<u32>) -> Self {
        if let Some(ms_per_deg) = ms_per_deg {
            self.ms_per_deg = ms_per_deg;
        }
        if let Some(settle_ms) = settle_ms {
            self.motor_settle_ms = settle_ms;
        }
        self.normalized()
    }

    /// Replace values the motion model can't use.
    ///
    /// A negative or NaN calibration would make every turn hit the minimum. Duty
    /// limits are capped at the hardware max speed.
    pub fn normalized(mut self) -> Self {
        if !self.ms_per_deg.is_finite() || self.ms_per_deg < 0.0 {
            self.ms_per_deg = MS_PER_DEG;
        }
        let max_speed = self.bounds.max_speed.unsigned_abs().min(MAX_SPEED as u32) as i32;
        self.bounds.max_speed = max_speed;
        self.bounds.turn_duty = self.bounds.turn_duty.unsigned_abs().min(max_speed as u32) as i32;
        self.defaults = self.defaults.clamped();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_expansion() {
        assert_eq!(topic(TOPIC_CMD_DRIVE, 2), "cube/2/cmd/drive");
        assert_eq!(topic(TOPIC_EVENT_TRIGGER, 0), "cube/0/event/trigger");
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let cfg = CalibrationConfig::from_json("{}").unwrap();
        assert_eq!(cfg, CalibrationConfig::default());
        assert_eq!(cfg.bounds.max_speed, 115);
        assert_eq!(cfg.motor_settle_ms, 50);
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let cfg =
            CalibrationConfig::from_json(r#"{"ms_per_deg": 4.5, "bounds": {"turn_ms_max": 1500}}"#)
                .unwrap();
        assert_eq!(cfg.ms_per_deg, 4.5);
        assert_eq!(cfg.bounds.turn_ms_max, 1500);
        assert_eq!(cfg.bounds.turn_ms_min, TURN_MS_MIN);
        assert_eq!(cfg.motor_settle_ms, MOTOR_SETTLE_MS);
    }

    #[test]
    fn test_bad_calibration_replaced() {
        let cfg = CalibrationConfig::from_json(r#"{"ms_per_deg": -2.0}"#).unwrap();
        assert_eq!(cfg.ms_per_deg, MS_PER_DEG);
    }

    #[test]
    fn test_duty_bounds_capped() {
        let cfg = CalibrationConfig::from_json(r#"{"bounds": {"max_speed": 40000}}"#).unwrap();
        assert_eq!(cfg.bounds.max_speed, MAX_SPEED);
        assert_eq!(cfg.bounds.turn_duty, TURN_DUTY);

        let cfg =
            CalibrationConfig::from_json(r#"{"bounds": {"max_speed": 60, "turn_duty": -90}}"#)
                .unwrap();
        assert_eq!(cfg.bounds.max_speed, 60);
        assert_eq!(cfg.bounds.turn_duty, 60);
    }

    #[test]
    fn test_overrides_are_normalized() {
        let cfg = CalibrationConfig::default().with_overrides(Some(f32::NAN), Some(80));
        assert_eq!(cfg.ms_per_deg, MS_PER_DEG);
        assert_eq!(cfg.motor_settle_ms, 80);

        let cfg = CalibrationConfig::default().with_overrides(Some(-3.0), None);
        assert_eq!(cfg.ms_per_deg, MS_PER_DEG);
        assert_eq!(cfg.motor_settle_ms, MOTOR_SETTLE_MS);

        let cfg = CalibrationConfig::default().with_overrides(Some(4.5), None);
        assert_eq!(cfg.ms_per_deg, 4.5);
    }

    #[test]
    fn test_lesson_defaults_clamped() {
        let cfg =
            CalibrationConfig::from_json(r#"{"defaults": {"speed": 500, "turn_deg": 1}}"#).unwrap();
        assert_eq!(cfg.defaults.speed, 115);
        assert_eq!(cfg.defaults.turn_deg, 5);
        assert_eq!(cfg.defaults.move_ms, 1000);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            CalibrationConfig::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
