// Composite shapes built from the primitives: wiggle, nudge, blink, polygon, spiral

use tracing::debug;

use super::calibration::clamp_i64;
use super::primitives::Motion;

// Regular polygon input ranges
pub const POLYGON_SIDES: (i32, i32) = (3, 12);
pub const POLYGON_SIDE_MS: (i32, i32) = (80, 4000);

// Spiral input ranges
pub const SPIRAL_TURNS: (i32, i32) = (1, 20);
pub const SPIRAL_START_MS: (i32, i32) = (100, 1500);
pub const SPIRAL_STEP_MS: (i32, i32) = (10, 500);
pub const SPIRAL_TURN_DEG: (i32, i32) = (5, 60);
pub const SPIRAL_STEPS_PER_TURN: i32 = 8;

// Shared by polygon and spiral
pub const SHAPE_SPEED: (i32, i32) = (10, 115);

// Blink legs are kept short
pub const BLINK_MS: (i32, i32) = (10, 2000);

fn clamp(value: i32, range: (i32, i32)) -> i32 {
    clamp_i64(value as i64, range.0 as i64, range.1 as i64) as i32
}

/// Exterior turn for a regular polygon.
///
/// Written as 180 - interior, where interior = 180 - round(360 / sides); this
/// reduces to round(360 / sides).
pub fn polygon_turn_deg(sides: i32) -> i32 {
    let sides = clamp(sides, POLYGON_SIDES);
    let interior = 180 - (360.0 / sides as f32).round_ties_even() as i32;
    180 - interior
}

/// Forward durations a spiral requests, one per step, before move clamping
pub fn spiral_durations(turns: i32, start_ms: i32, step_ms: i32) -> Vec<i32> {
    let turns = clamp(turns, SPIRAL_TURNS);
    let start_ms = clamp(start_ms, SPIRAL_START_MS);
    let step_ms = clamp(step_ms, SPIRAL_STEP_MS);
    (0..turns * SPIRAL_STEPS_PER_TURN)
        .map(|i| start_ms + i * step_ms)
        .collect()
}

impl Motion<'_> {
    /// Right-then-left spin pulses at turn duty, `repeats` times (negative is none)
    pub async fn wiggle(&self, repeats: i32, turn_ms: i32) {
        let duty = self.calibration().bounds.turn_duty;
        for _ in 0..repeats.max(0) {
            self.drive_timed(duty, -duty, turn_ms).await;
            self.drive_timed(-duty, duty, turn_ms).await;
        }
    }

    /// Forward for `ms`, then back at the same speed for `ms / 2`
    pub async fn nudge(&self, speed: i32, ms: i32) {
        self.move_forward(speed, ms).await;
        self.move_backward(speed, ms / 2).await;
    }

    /// Short forward/back hop used as an acknowledgement
    pub async fn blink_motion(&self, speed: i32, forward_ms: i32, back_ms: i32) {
        let speed = self.clamp_speed(speed) as i32;
        let forward_ms = clamp(forward_ms, BLINK_MS);
        let back_ms = clamp(back_ms, BLINK_MS);

        self.move_forward(speed, forward_ms).await;
        self.move_backward(speed, back_ms).await;
    }

    /// Drive a closed regular polygon, turning right at each corner
    pub async fn regular_polygon(&self, sides: i32, side_ms: i32, speed: i32) {
        let sides = clamp(sides, POLYGON_SIDES);
        let side_ms = clamp(side_ms, POLYGON_SIDE_MS);
        let speed = clamp(speed, SHAPE_SPEED);
        let turn = polygon_turn_deg(sides);

        debug!("polygon: {} sides, {}ms, turn {}", sides, side_ms, turn);
        for _ in 0..sides {
            self.move_forward(speed, side_ms).await;
            self.turn_right(turn).await;
        }
    }

    /// Expanding spiral: constant turn, forward time growing by `step_ms` each step
    pub async fn spiral(
        &self,
        turns: i32,
        start_ms: i32,
        step_ms: i32,
        speed: i32,
        turn_per_step_deg: i32,
    ) {
        let speed = clamp(speed, SHAPE_SPEED);
        let turn = clamp(turn_per_step_deg, SPIRAL_TURN_DEG);
        let durations = spiral_durations(turns, start_ms, step_ms);

        debug!("spiral: {} steps, turn {}", durations.len(), turn);
        for ms in durations {
            self.move_forward(speed, ms).await;
            self.turn_right(turn).await;
        }
    }
}
