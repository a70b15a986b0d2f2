// Cube handles for the pattern engine
//
// Provides:
// - The CubeHandle capability trait the motion layer drives
// - A simulated cube that records what it receives
// - A zenoh-backed cube for real hardware behind a bridge

mod handle;
pub mod sim;
pub mod zenoh_link;

pub use handle::{CubeError, CubeHandle};
pub use sim::{SimCube, SimOptions, connect_simulated};
pub use zenoh_link::{ZenohCube, connect_zenoh};
