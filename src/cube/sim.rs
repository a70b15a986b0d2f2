// In-memory cube used by the simulator binary and the tests
//
// Records every command it accepts together with the (tokio) time it arrived,
// so timing can be checked against a paused clock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use super::handle::{CubeError, CubeHandle};
use crate::config::MS_PER_DEG;
use crate::messages::{DriveCommand, TriggerKind};
use crate::motion::calibration::estimated_heading_change;

const TRIGGER_CAPACITY: usize = 16;

/// A drive command as received by the simulated cube
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceivedDrive {
    pub at: Instant,
    pub cmd: DriveCommand,
}

/// A sound attempt, successful or not
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundAttempt {
    pub at: Instant,
    pub preset: u8,
    pub played: bool,
}

#[derive(Default)]
struct Log {
    drives: Vec<ReceivedDrive>,
    sounds: Vec<SoundAttempt>,
}

pub struct SimCube {
    name: String,
    connected: AtomicBool,
    sound: AtomicBool,
    ms_per_deg: f32,
    log: Mutex<Log>,
    trigger_tx: broadcast::Sender<TriggerKind>,
}

impl SimCube {
    pub fn new(name: impl Into<String>) -> Self {
        let (trigger_tx, _) = broadcast::channel(TRIGGER_CAPACITY);
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            sound: AtomicBool::new(true),
            ms_per_deg: MS_PER_DEG,
            log: Mutex::new(Log::default()),
            trigger_tx,
        }
    }

    /// Calibration used for heading estimation
    pub fn with_ms_per_deg(mut self, ms_per_deg: f32) -> Self {
        self.ms_per_deg = ms_per_deg;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_sound_supported(&self, supported: bool) {
        self.sound.store(supported, Ordering::SeqCst);
    }

    /// Emit a trigger as if the physical cube raised it.
    /// Returns how many listeners received it.
    pub fn fire_trigger(&self, kind: TriggerKind) -> usize {
        debug!("{}: trigger {:?}", self.name, kind);
        self.trigger_tx.send(kind).unwrap_or(0)
    }

    /// Drive commands accepted so far
    pub fn drives(&self) -> Vec<ReceivedDrive> {
        self.lock().drives.clone()
    }

    pub fn drive_commands(&self) -> Vec<DriveCommand> {
        self.lock().drives.iter().map(|d| d.cmd).collect()
    }

    pub fn sounds(&self) -> Vec<SoundAttempt> {
        self.lock().sounds.clone()
    }

    pub fn clear(&self) {
        let mut log = self.lock();
        log.drives.clear();
        log.sounds.clear();
    }

    /// Net heading change (deg, clockwise positive) implied by the accepted commands
    pub fn heading_deg(&self) -> f32 {
        self.lock()
            .drives
            .iter()
            .map(|d| estimated_heading_change(&d.cmd, self.ms_per_deg))
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        // Logging never panics while holding the lock, poisoning is not expected
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CubeHandle for SimCube {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn drive(&self, cmd: DriveCommand) -> Result<(), CubeError> {
        if !self.is_connected() {
            return Err(CubeError::NotConnected);
        }
        debug!(
            "{}: drive left={} right={} for {}ms",
            self.name, cmd.left, cmd.right, cmd.duration_ms
        );
        self.lock().drives.push(ReceivedDrive {
            at: Instant::now(),
            cmd,
        });
        Ok(())
    }

    async fn play_sound(&self, preset: u8) -> Result<(), CubeError> {
        let result = if !self.is_connected() {
            Err(CubeError::NotConnected)
        } else if !self.sound.load(Ordering::SeqCst) {
            Err(CubeError::Unsupported)
        } else {
            Ok(())
        };
        self.lock().sounds.push(SoundAttempt {
            at: Instant::now(),
            preset,
            played: result.is_ok(),
        });
        result
    }

    fn triggers(&self) -> Option<broadcast::Receiver<TriggerKind>> {
        Some(self.trigger_tx.subscribe())
    }
}

/// How the simulated set of cubes should look
#[derive(Debug, Clone, Default)]
pub struct SimOptions {
    /// Indices that come back as `None` (never found)
    pub absent: HashSet<usize>,
    /// Indices that are found but report disconnected
    pub disconnected: HashSet<usize>,
    /// Simulate a build without audio
    pub no_sound: bool,
    pub ms_per_deg: Option<f32>,
}

/// Connect `count` simulated cubes.
///
/// Returns the concrete cubes (so callers can fire triggers and inspect logs)
/// alongside the handle set the runner consumes.
pub fn connect_simulated(
    count: usize,
    options: &SimOptions,
) -> (Vec<Arc<SimCube>>, Vec<Option<Arc<dyn CubeHandle>>>) {
    let mut sims = Vec::with_capacity(count);
    let mut handles: Vec<Option<Arc<dyn CubeHandle>>> = Vec::with_capacity(count);

    for i in 0..count {
        let mut cube = SimCube::new(format!("sim-{}", i));
        if let Some(ms_per_deg) = options.ms_per_deg {
            cube = cube.with_ms_per_deg(ms_per_deg);
        }
        cube.set_sound_supported(!options.no_sound);
        cube.set_connected(!options.disconnected.contains(&i));

        let cube = Arc::new(cube);
        sims.push(cube.clone());
        if options.absent.contains(&i) {
            handles.push(None);
        } else {
            handles.push(Some(cube as Arc<dyn CubeHandle>));
        }
    }

    info!(
        "Simulator: {} cube(s), {} absent, {} disconnected",
        count,
        options.absent.len(),
        options.disconnected.len()
    );
    (sims, handles)
}
