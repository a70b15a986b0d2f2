// Motion primitives for two-wheel cubes
//
// Provides:
// - Clamp & command primitives (move, turn, wait, stop)
// - Open-loop turn calibration (degrees <-> spin duration)
// - Composite shapes (wiggle, nudge, blink, polygon, spiral)
// - Beep feedback with a motion fallback

pub mod calibration;
mod composite;
mod feedback;
mod primitives;

pub use calibration::{estimated_heading_change, plan_turn, turn_duration_ms};
pub use composite::{polygon_turn_deg, spiral_durations};
pub use feedback::Feedback;
pub use primitives::{Motion, safe_stop};
