// Event-triggered reactions (double-tap)
//
// Each subscription is a task listening on one cube's trigger stream. A trigger
// that arrives while the group is busy is dropped, never queued. A reaction that
// started first holds off the next run until it finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;
use crate::cube::CubeHandle;
use crate::messages::TriggerKind;
use crate::motion::Motion;
use crate::runner::{Pattern, PatternResult, ReactionGate, RunContext};

/// Identifies one listener registered on a `RunContext`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
}

impl Subscriptions {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Default double-tap reaction: blink, half turn, beep
pub struct DoubleTapReaction;

#[async_trait]
impl Pattern for DoubleTapReaction {
    fn name(&self) -> &str {
        "double-tap"
    }

    async fn run(&self, motion: &Motion<'_>) -> PatternResult {
        motion.blink_motion(80, 180, 140).await;
        motion.turn_right(180).await;
        motion.beep().await;
        Ok(())
    }
}

impl RunContext {
    /// Run `reaction` on `cube` once per double-tap, unless the group is busy.
    ///
    /// Returns `None` if the cube has no trigger stream.
    pub fn subscribe(
        &self,
        cube: Arc<dyn CubeHandle>,
        cal: CalibrationConfig,
        reaction: Arc<dyn Pattern>,
    ) -> Option<SubscriptionId> {
        let Some(rx) = cube.triggers() else {
            warn!("{}: trigger events not available", cube.name());
            return None;
        };

        let id = SubscriptionId(self.subscriptions.next_id.fetch_add(1, Ordering::SeqCst));
        let task = tokio::spawn(listen(rx, cube, cal, reaction, self.reaction_gate()));
        self.subscriptions.lock().insert(id, task);
        Some(id)
    }

    /// Stop one listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.lock().remove(&id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe_all(&self) {
        for (_, task) in self.subscriptions.lock().drain() {
            task.abort();
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

async fn listen(
    mut rx: tokio::sync::broadcast::Receiver<TriggerKind>,
    cube: Arc<dyn CubeHandle>,
    cal: CalibrationConfig,
    reaction: Arc<dyn Pattern>,
    gate: ReactionGate,
) {
    loop {
        match rx.recv().await {
            Ok(TriggerKind::DoubleTap) => {
                let Some(_running) = gate.try_enter() else {
                    debug!("{}: double-tap ignored, pattern running", cube.name());
                    continue;
                };
                info!("{}: double-tap, running '{}'", cube.name(), reaction.name());
                let motion = Motion::new(cube.as_ref(), &cal);
                if let Err(e) = reaction.run(&motion).await {
                    warn!("{}: reaction '{}' failed: {}", cube.name(), reaction.name(), e);
                }
            }
            Ok(other) => debug!("{}: unhandled trigger {:?}", cube.name(), other),
            Err(RecvError::Lagged(n)) => warn!("{}: missed {} trigger(s)", cube.name(), n),
            Err(RecvError::Closed) => {
                debug!("{}: trigger stream closed", cube.name());
                break;
            }
        }
    }
}
