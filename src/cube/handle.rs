// Capability interface for one physical (or simulated) cube

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::messages::{DriveCommand, TriggerKind};

/// Failure of a single actuator operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CubeError {
    #[error("Cube is not connected")]
    NotConnected,

    #[error("Operation not supported by this cube")]
    Unsupported,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// One cube as seen by the motion layer.
///
/// Handles are owned by whoever connected them and shared as `Arc<dyn CubeHandle>`.
/// A cube can drop its link at any time; operations then return
/// `CubeError::NotConnected` instead of panicking.
#[async_trait]
pub trait CubeHandle: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Fire-and-forget timed drive. Returns as soon as the command is handed off.
    async fn drive(&self, cmd: DriveCommand) -> Result<(), CubeError>;

    /// Start a preset sound. Fails when audio is unavailable.
    async fn play_sound(&self, preset: u8) -> Result<(), CubeError>;

    /// Stream of trigger events, if this cube can produce them
    fn triggers(&self) -> Option<broadcast::Receiver<TriggerKind>>;
}
