// Clamp & command: the single path every motion takes to reach a cube
//
// Every primitive clamps its inputs, hands one DriveCommand to the cube, then
// suspends for duration + settle so the caller never overlaps two motions.

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use super::calibration::{clamp_duty, clamp_i64, plan_turn};
use crate::config::{CalibrationConfig, WAIT_MS_MAX};
use crate::cube::CubeHandle;
use crate::messages::DriveCommand;

/// Motion primitives bound to one cube and one calibration.
///
/// Patterns receive a `Motion` and call its methods in sequence. Inputs are
/// never rejected: out-of-range speeds, durations and angles are clamped.
pub struct Motion<'a> {
    cube: &'a dyn CubeHandle,
    cal: &'a CalibrationConfig,
}

impl<'a> Motion<'a> {
    pub fn new(cube: &'a dyn CubeHandle, cal: &'a CalibrationConfig) -> Self {
        Self { cube, cal }
    }

    pub fn cube(&self) -> &'a dyn CubeHandle {
        self.cube
    }

    pub fn calibration(&self) -> &'a CalibrationConfig {
        self.cal
    }

    /// Duty limited to the configured max speed
    pub fn clamp_speed(&self, speed: i32) -> i16 {
        clamp_duty(speed as i64, self.cal)
    }

    /// Duration limited to the configured move range
    pub fn clamp_move_ms(&self, ms: i32) -> u32 {
        clamp_i64(
            ms as i64,
            self.cal.bounds.move_ms_min as i64,
            self.cal.bounds.move_ms_max as i64,
        ) as u32
    }

    /// Send one command and wait it out. Drive failures are dropped here.
    pub(crate) async fn issue(&self, cmd: DriveCommand, settle_ms: u32) {
        if let Err(e) = self.cube.drive(cmd).await {
            debug!("{}: drive {:?} dropped: {}", self.cube.name(), cmd, e);
        }
        sleep(Duration::from_millis(
            cmd.duration_ms as u64 + settle_ms as u64,
        ))
        .await;
    }

    /// Clamp duty on both wheels and the duration, then issue with the motor settle time
    pub async fn drive_timed(&self, left: i32, right: i32, ms: i32) {
        let cmd = DriveCommand::new(
            self.clamp_speed(left),
            self.clamp_speed(right),
            self.clamp_move_ms(ms),
        );
        self.issue(cmd, self.cal.motor_settle_ms).await;
    }

    /// Straight motion, negative speed drives backward
    pub async fn move_forward(&self, speed: i32, ms: i32) {
        self.drive_timed(speed, speed, ms).await;
    }

    pub async fn move_backward(&self, speed: i32, ms: i32) {
        self.drive_timed(speed.saturating_neg(), speed.saturating_neg(), ms)
            .await;
    }

    /// Turn in place, positive degrees = clockwise
    pub async fn turn_right(&self, deg: i32) {
        let cmd = plan_turn(deg, self.cal);
        self.issue(cmd, self.cal.motor_settle_ms).await;
    }

    /// Same as `turn_right(-deg)`
    pub async fn turn_left(&self, deg: i32) {
        self.turn_right(deg.saturating_neg()).await;
    }

    /// Pause without driving
    pub async fn wait_ms(&self, ms: i32) {
        let ms = clamp_i64(ms as i64, 0, WAIT_MS_MAX as i64) as u64;
        sleep(Duration::from_millis(ms)).await;
    }

    pub async fn stop(&self) {
        safe_stop(Some(self.cube)).await;
    }
}

/// Best-effort stop: zero duty, zero duration, failures ignored.
///
/// Bypasses clamping so the zero duration reaches the cube as-is.
pub async fn safe_stop(cube: Option<&dyn CubeHandle>) {
    let Some(cube) = cube else {
        return;
    };
    if let Err(e) = cube.drive(DriveCommand::stop()).await {
        debug!("{}: stop dropped: {}", cube.name(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::SimCube;
    use tokio::time::Instant;

    fn elapsed_ms(start: Instant) -> u128 {
        start.elapsed().as_millis()
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_forward_clamps_and_waits() {
        let cube = SimCube::new("t");
        let cal = CalibrationConfig::default();
        let m = Motion::new(&cube, &cal);

        let start = Instant::now();
        m.move_forward(500, 20_000).await;
        assert_eq!(cube.drive_commands(), vec![DriveCommand::new(115, 115, 8000)]);
        assert_eq!(elapsed_ms(start), 8050);

        cube.clear();
        let start = Instant::now();
        m.move_forward(-500, -4).await;
        assert_eq!(cube.drive_commands(), vec![DriveCommand::new(-115, -115, 10)]);
        assert_eq!(elapsed_ms(start), 60);
    }

    #[test]
    fn test_clamp_ranges() {
        let cube = SimCube::new("t");
        let cal = CalibrationConfig::default();
        let m = Motion::new(&cube, &cal);
        for s in [i32::MIN, -1000, -116, -115, 0, 42, 115, 116, i32::MAX] {
            let c = m.clamp_speed(s) as i32;
            assert!((-115..=115).contains(&c), "speed {} -> {}", s, c);
        }
        for d in [i32::MIN, -1, 0, 9, 10, 500, 8000, 8001, i32::MAX] {
            let c = m.clamp_move_ms(d);
            assert!((10..=8000).contains(&c), "ms {} -> {}", d, c);
        }
        assert_eq!(m.clamp_speed(80), 80);
        assert_eq!(m.clamp_move_ms(700), 700);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_max_speed_never_wraps() {
        let cube = SimCube::new("t");
        let mut cal = CalibrationConfig::default();
        cal.bounds.max_speed = 40_000;
        let m = Motion::new(&cube, &cal);
        assert_eq!(m.clamp_speed(40_000), 115);
        assert_eq!(m.clamp_speed(-40_000), -115);

        m.move_forward(40_000, 100).await;
        assert_eq!(cube.drive_commands(), vec![DriveCommand::new(115, 115, 100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_left_matches_turn_right_negated() {
        let cal = CalibrationConfig::default();
        for deg in [-720, -360, -91, -1, 0, 1, 45, 90, 359, 360, 1000, i32::MAX] {
            let left = SimCube::new("l");
            let right = SimCube::new("r");
            Motion::new(&left, &cal).turn_left(deg).await;
            Motion::new(&right, &cal).turn_right(deg.saturating_neg()).await;
            assert_eq!(left.drive_commands(), right.drive_commands(), "deg {}", deg);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_timing() {
        let cube = SimCube::new("t");
        let cal = CalibrationConfig::default();
        let m = Motion::new(&cube, &cal);

        let start = Instant::now();
        m.turn_right(90).await;
        assert_eq!(elapsed_ms(start), 540 + 50);

        let start = Instant::now();
        m.turn_left(90).await;
        assert_eq!(elapsed_ms(start), 540 + 50);
        assert_eq!(
            cube.drive_commands(),
            vec![DriveCommand::new(70, -70, 540), DriveCommand::new(-70, 70, 540)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_square_returns_to_start_heading() {
        let cube = SimCube::new("t");
        let cal = CalibrationConfig::default();
        let m = Motion::new(&cube, &cal);

        for _ in 0..4 {
            m.move_forward(80, 700).await;
            m.turn_right(90).await;
        }
        let heading = cube.heading_deg();
        let off = (heading % 360.0 + 360.0) % 360.0;
        assert!(off < 1.0 || off > 359.0, "heading {}", heading);
        assert_eq!(cube.drives().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ms_clamped() {
        let cube = SimCube::new("t");
        let cal = CalibrationConfig::default();
        let m = Motion::new(&cube, &cal);

        let start = Instant::now();
        m.wait_ms(-50).await;
        assert_eq!(elapsed_ms(start), 0);
        m.wait_ms(60_000).await;
        assert_eq!(elapsed_ms(start), 10_000);
        assert!(cube.drives().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_cube_still_waits() {
        let cube = SimCube::new("t");
        cube.set_connected(false);
        let cal = CalibrationConfig::default();
        let m = Motion::new(&cube, &cal);

        let start = Instant::now();
        m.move_forward(80, 100).await;
        assert_eq!(elapsed_ms(start), 150);
        assert!(cube.drives().is_empty());
    }

    #[tokio::test]
    async fn test_safe_stop_never_fails() {
        let cube = SimCube::new("t");
        safe_stop(Some(&cube)).await;
        assert_eq!(cube.drive_commands(), vec![DriveCommand::stop()]);

        let gone = SimCube::new("gone");
        gone.set_connected(false);
        safe_stop(Some(&gone)).await;
        assert!(gone.drives().is_empty());

        safe_stop(None).await;
    }
}
