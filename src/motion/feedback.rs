// Beep: audio cue with a motion fallback when the cube can't play sound

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use super::primitives::Motion;
use crate::config::{
    BEEP_FALLBACK_DUTY, BEEP_FALLBACK_MS, BEEP_FALLBACK_SETTLE_MS, BEEP_PRESET, BEEP_SOUND_MS,
};
use crate::messages::DriveCommand;

/// Which form of feedback a beep ended up producing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Sound,
    Pulse,
}

impl Motion<'_> {
    /// Play the beep preset, or spin briefly if sound fails.
    ///
    /// Exactly one of the two happens per call.
    pub async fn beep(&self) -> Feedback {
        match self.cube().play_sound(BEEP_PRESET).await {
            Ok(()) => {
                sleep(Duration::from_millis(BEEP_SOUND_MS)).await;
                Feedback::Sound
            }
            Err(e) => {
                debug!("{}: sound failed ({}), pulsing instead", self.cube().name(), e);
                let pulse =
                    DriveCommand::new(BEEP_FALLBACK_DUTY, -BEEP_FALLBACK_DUTY, BEEP_FALLBACK_MS);
                self.issue(pulse, BEEP_FALLBACK_SETTLE_MS).await;
                Feedback::Pulse
            }
        }
    }
}
