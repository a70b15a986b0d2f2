// Open-loop turn calibration for the two-wheel cube
// Converts a requested angle into a timed spin, and estimates the angle back from a spin.
//
// The cube has no heading sensor, so duration stands in for angle:
//     duration_ms = clamp(round(|deg| * ms_per_deg), turn_ms_min, turn_ms_max)

use crate::config::{CalibrationConfig, MAX_SPEED, TURN_DUTY};
use crate::messages::DriveCommand;

/// Clamp without panicking on inverted bounds (bounds may come from a config file)
pub(crate) fn clamp_i64(value: i64, min: i64, max: i64) -> i64 {
    value.max(min).min(max)
}

/// Largest wheel duty a command may carry, never above the hardware limit
pub(crate) fn max_duty(cal: &CalibrationConfig) -> i64 {
    (cal.bounds.max_speed.unsigned_abs() as i64).min(MAX_SPEED as i64)
}

/// Clamp to `±max_duty` and narrow to a wheel duty
pub(crate) fn clamp_duty(value: i64, cal: &CalibrationConfig) -> i16 {
    let max = max_duty(cal);
    let duty = clamp_i64(value, -max, max);
    i16::try_from(duty).unwrap_or(if duty < 0 { i16::MIN } else { i16::MAX })
}

/// Limit a requested angle to the configured range
pub fn clamp_angle(deg: i32, cal: &CalibrationConfig) -> i32 {
    let max = cal.bounds.max_angle_deg.unsigned_abs() as i64;
    clamp_i64(deg as i64, -max, max) as i32
}

/// Spin duration for an angle (after angle clamping)
pub fn turn_duration_ms(deg: i32, cal: &CalibrationConfig) -> u32 {
    let deg = clamp_angle(deg, cal);
    // Half-way values round to even
    let raw = (deg.unsigned_abs() as f32 * cal.ms_per_deg).round_ties_even() as i64;
    clamp_i64(
        raw,
        cal.bounds.turn_ms_min as i64,
        cal.bounds.turn_ms_max as i64,
    ) as u32
}

/// Build the spin command for a signed angle (positive = clockwise / right)
pub fn plan_turn(deg: i32, cal: &CalibrationConfig) -> DriveCommand {
    let deg = clamp_angle(deg, cal);
    let duration_ms = turn_duration_ms(deg, cal);
    let duty = clamp_duty(cal.bounds.turn_duty.unsigned_abs() as i64, cal);

    if deg >= 0 {
        DriveCommand::new(duty, -duty, duration_ms)
    } else {
        DriveCommand::new(-duty, duty, duration_ms)
    }
}

/// Heading change (deg, clockwise positive) a command is expected to produce.
///
/// Straight and stop commands give 0. Spins scale linearly with duty relative to
/// the calibrated turn duty.
pub fn estimated_heading_change(cmd: &DriveCommand, ms_per_deg: f32) -> f32 {
    if !cmd.is_spin() || ms_per_deg <= 0.0 {
        return 0.0;
    }
    let duty_ratio = cmd.left.unsigned_abs() as f32 / TURN_DUTY as f32;
    let magnitude = cmd.duration_ms as f32 / ms_per_deg * duty_ratio;
    if cmd.left > 0 { magnitude } else { -magnitude }
}
