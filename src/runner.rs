// Pattern sequencer: runs one pattern on the first cube or on every cube in turn
// Note: the busy flag keeps new reactions from starting during a run, and a run waits
// for reactions already in flight before it drives anything

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{CalibrationConfig, INTER_CUBE_PAUSE_MS};
use crate::cube::CubeHandle;
use crate::motion::{Motion, safe_stop};
use crate::trigger::Subscriptions;

pub type PatternResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A live sequence of motion primitives.
///
/// Returning early (or with an error) ends the pattern for that cube; the runner
/// still stops the cube and moves on.
#[async_trait]
pub trait Pattern: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, motion: &Motion<'_>) -> PatternResult;
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("No usable cubes (none present and connected)")]
    NoCubes,

    #[error("A pattern is already running on this group")]
    Busy,
}

/// Which cubes a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    First,
    All,
}

/// Outcome per cube index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: Vec<usize>,
    pub failed: Vec<usize>,
    pub skipped: Vec<usize>,
}

// Clears the busy flag when the run ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// Triggered reactions currently driving a cube
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    async fn wait_idle(&self) {
        loop {
            // Registered before the check so a wakeup in between isn't lost
            let idle = self.idle.notified();
            let count = self.count.load(Ordering::SeqCst);
            if count == 0 {
                return;
            }
            debug!("Waiting for {} reaction(s) to finish", count);
            idle.await;
        }
    }
}

/// Held by a listener while its reaction runs
pub(crate) struct ReactionGuard(Arc<InFlight>);

impl Drop for ReactionGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Listener side of a `RunContext`: reads the busy flag, counts reactions
#[derive(Clone)]
pub(crate) struct ReactionGate {
    busy: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
}

impl ReactionGate {
    /// Admit one reaction, or `None` while a run holds the group.
    ///
    /// The count goes up before the second busy check, and a run sets busy before
    /// reading the count, so at least one side always sees the other.
    pub(crate) fn try_enter(&self) -> Option<ReactionGuard> {
        if self.busy.load(Ordering::SeqCst) {
            return None;
        }
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        let guard = ReactionGuard(self.in_flight.clone());
        if self.busy.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }
}

/// Shared state for one group of cubes.
///
/// The sequencer is the only writer of the busy flag. Trigger listeners
/// subscribed through this context only read it, and count their own
/// reactions so a run can wait for them.
#[derive(Clone, Default)]
pub struct RunContext {
    busy: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    pub(crate) subscriptions: Arc<Subscriptions>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Triggered reactions still running
    pub fn reactions_in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    pub(crate) fn reaction_gate(&self) -> ReactionGate {
        ReactionGate {
            busy: self.busy.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    // Claims the group, then lets reactions already started run to the end
    async fn begin_run(&self) -> Result<BusyGuard, RunError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(RunError::Busy);
        }
        let guard = BusyGuard(self.busy.clone());
        self.in_flight.wait_idle().await;
        Ok(guard)
    }
}

fn usable(cube: &Option<Arc<dyn CubeHandle>>) -> Option<&dyn CubeHandle> {
    cube.as_deref().filter(|c| c.is_connected())
}

pub struct Runner {
    cal: CalibrationConfig,
    ctx: RunContext,
}

impl Runner {
    pub fn new(cal: CalibrationConfig, ctx: RunContext) -> Self {
        Self { cal, ctx }
    }

    pub async fn run(
        &self,
        mode: RunMode,
        cubes: &[Option<Arc<dyn CubeHandle>>],
        pattern: &dyn Pattern,
    ) -> Result<RunReport, RunError> {
        match mode {
            RunMode::First => self.run_on_first(cubes, pattern).await,
            RunMode::All => self.run_on_all(cubes, pattern).await,
        }
    }

    /// Run the pattern on the first present, connected cube, then stop it
    pub async fn run_on_first(
        &self,
        cubes: &[Option<Arc<dyn CubeHandle>>],
        pattern: &dyn Pattern,
    ) -> Result<RunReport, RunError> {
        let Some((index, cube)) = cubes
            .iter()
            .enumerate()
            .find_map(|(i, c)| usable(c).map(|c| (i, c)))
        else {
            return Err(RunError::NoCubes);
        };

        let _guard = self.ctx.begin_run().await?;
        let mut report = RunReport::default();
        self.run_one(index, cube, pattern, &mut report).await;
        Ok(report)
    }

    /// Run the pattern on each usable cube in order, pausing between cubes
    pub async fn run_on_all(
        &self,
        cubes: &[Option<Arc<dyn CubeHandle>>],
        pattern: &dyn Pattern,
    ) -> Result<RunReport, RunError> {
        if !cubes.iter().any(|c| usable(c).is_some()) {
            return Err(RunError::NoCubes);
        }

        let _guard = self.ctx.begin_run().await?;
        let mut report = RunReport::default();

        for (index, cube) in cubes.iter().enumerate() {
            // Connectivity is checked when the cube's turn comes, not up front
            let Some(cube) = usable(cube) else {
                warn!("Cube {} absent or disconnected, skipping", index);
                report.skipped.push(index);
                continue;
            };
            self.run_one(index, cube, pattern, &mut report).await;
            sleep(Duration::from_millis(INTER_CUBE_PAUSE_MS)).await;
        }

        info!(
            "Group run finished: {} ok, {} failed, {} skipped",
            report.executed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn run_one(
        &self,
        index: usize,
        cube: &dyn CubeHandle,
        pattern: &dyn Pattern,
        report: &mut RunReport,
    ) {
        info!("Running pattern '{}' on {}", pattern.name(), cube.name());
        let motion = Motion::new(cube, &self.cal);

        match pattern.run(&motion).await {
            Ok(()) => {
                info!("Pattern '{}' finished on {}", pattern.name(), cube.name());
                report.executed.push(index);
            }
            Err(e) => {
                warn!(
                    "Pattern '{}' ended early on {}: {}",
                    pattern.name(),
                    cube.name(),
                    e
                );
                report.failed.push(index);
            }
        }
        safe_stop(Some(cube)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{SimCube, SimOptions, connect_simulated};
    use crate::messages::DriveCommand;
    use std::sync::atomic::AtomicUsize;

    struct Forward {
        ms: i32,
        calls: AtomicUsize,
    }

    impl Forward {
        fn new(ms: i32) -> Self {
            Self {
                ms,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Pattern for Forward {
        fn name(&self) -> &str {
            "forward"
        }

        async fn run(&self, motion: &Motion<'_>) -> PatternResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            motion.move_forward(80, self.ms).await;
            Ok(())
        }
    }

    struct Bails;

    #[async_trait]
    impl Pattern for Bails {
        fn name(&self) -> &str {
            "bails"
        }

        async fn run(&self, motion: &Motion<'_>) -> PatternResult {
            motion.move_forward(50, 100).await;
            Err("student code gave up".into())
        }
    }

    fn runner(ctx: &RunContext) -> Runner {
        Runner::new(CalibrationConfig::default(), ctx.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_run_skips_disconnected() {
        let options = SimOptions {
            disconnected: [1].into_iter().collect(),
            ..SimOptions::default()
        };
        let (sims, handles) = connect_simulated(3, &options);
        let ctx = RunContext::new();
        let pattern = Forward::new(100);

        let report = runner(&ctx).run_on_all(&handles, &pattern).await.unwrap();
        assert_eq!(report.executed, vec![0, 2]);
        assert_eq!(report.skipped, vec![1]);
        assert_eq!(pattern.calls.load(Ordering::SeqCst), 2);
        assert!(sims[1].drives().is_empty());

        let first = sims[0].drives();
        let third = sims[2].drives();
        assert_eq!(
            first.iter().map(|d| d.cmd).collect::<Vec<_>>(),
            vec![DriveCommand::new(80, 80, 100), DriveCommand::stop()]
        );
        assert_eq!(third.len(), 2);
        // stop on cube 0, 300ms pause, then cube 2 starts
        let gap = third[0].at - first[1].at;
        assert_eq!(gap, Duration::from_millis(300));
        assert!(!ctx.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_run_skips_absent() {
        let options = SimOptions {
            absent: [0].into_iter().collect(),
            ..SimOptions::default()
        };
        let (sims, handles) = connect_simulated(2, &options);
        let report = runner(&RunContext::new())
            .run_on_all(&handles, &Forward::new(50))
            .await
            .unwrap();
        assert_eq!(report.executed, vec![1]);
        assert_eq!(report.skipped, vec![0]);
        assert!(sims[0].drives().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cube_dropping_mid_run_is_skipped() {
        let (sims, handles) = connect_simulated(2, &SimOptions::default());
        let ctx = RunContext::new();
        let r = runner(&ctx);
        let pattern = Forward::new(1000);

        let second = sims[1].clone();
        let run = r.run_on_all(&handles, &pattern);
        let drop_link = async move {
            sleep(Duration::from_millis(200)).await;
            second.set_connected(false);
        };
        let (report, ()) = tokio::join!(run, drop_link);

        let report = report.unwrap();
        assert_eq!(report.executed, vec![0]);
        assert_eq!(report.skipped, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_first_uses_first_connected() {
        let options = SimOptions {
            absent: [0].into_iter().collect(),
            disconnected: [1].into_iter().collect(),
            ..SimOptions::default()
        };
        let (sims, handles) = connect_simulated(4, &options);
        let report = runner(&RunContext::new())
            .run_on_first(&handles, &Forward::new(100))
            .await
            .unwrap();
        assert_eq!(report.executed, vec![2]);
        assert_eq!(
            sims[2].drive_commands(),
            vec![DriveCommand::new(80, 80, 100), DriveCommand::stop()]
        );
        assert!(sims[3].drives().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cubes_is_an_error() {
        let ctx = RunContext::new();
        let r = runner(&ctx);
        let empty: Vec<Option<Arc<dyn CubeHandle>>> = Vec::new();
        assert!(matches!(
            r.run_on_first(&empty, &Forward::new(10)).await,
            Err(RunError::NoCubes)
        ));

        let options = SimOptions {
            disconnected: [0, 1].into_iter().collect(),
            ..SimOptions::default()
        };
        let (sims, handles) = connect_simulated(2, &options);
        assert!(matches!(
            r.run(RunMode::All, &handles, &Forward::new(10)).await,
            Err(RunError::NoCubes)
        ));
        assert!(sims.iter().all(|s| s.drives().is_empty()));
        assert!(!ctx.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pattern_still_stops_and_clears_busy() {
        let (sims, handles) = connect_simulated(2, &SimOptions::default());
        let ctx = RunContext::new();
        let report = runner(&ctx).run_on_all(&handles, &Bails).await.unwrap();

        assert_eq!(report.failed, vec![0, 1]);
        assert!(report.executed.is_empty());
        for sim in &sims {
            assert_eq!(sim.drive_commands().last(), Some(&DriveCommand::stop()));
        }
        assert!(!ctx.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_refuses_reactions_while_busy() {
        let ctx = RunContext::new();
        let gate = ctx.reaction_gate();
        let reaction = gate.try_enter();
        assert!(reaction.is_some());
        assert_eq!(ctx.reactions_in_flight(), 1);
        drop(reaction);
        assert_eq!(ctx.reactions_in_flight(), 0);

        let cube = Arc::new(SimCube::new("a"));
        let handles: Vec<Option<Arc<dyn CubeHandle>>> =
            vec![Some(cube.clone() as Arc<dyn CubeHandle>)];
        let r = runner(&ctx);
        let tap_mid_run = async {
            sleep(Duration::from_millis(100)).await;
            let refused = gate.try_enter().is_none();
            (refused, ctx.reactions_in_flight())
        };
        let pattern = Forward::new(500);
        let (run, (refused, count)) =
            tokio::join!(r.run_on_first(&handles, &pattern), tap_mid_run);
        assert!(run.is_ok());
        assert!(refused);
        assert_eq!(count, 0);
        assert!(gate.try_enter().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_reactions_in_flight() {
        let cube = Arc::new(SimCube::new("a"));
        let handles: Vec<Option<Arc<dyn CubeHandle>>> =
            vec![Some(cube.clone() as Arc<dyn CubeHandle>)];
        let ctx = RunContext::new();
        let gate = ctx.reaction_gate();
        let reaction = gate.try_enter();
        let start = tokio::time::Instant::now();

        let finish_reaction = async {
            sleep(Duration::from_millis(400)).await;
            drop(reaction);
        };
        let r = runner(&ctx);
        let pattern = Forward::new(100);
        let (report, ()) =
            tokio::join!(r.run_on_first(&handles, &pattern), finish_reaction);

        assert!(report.is_ok());
        let drives = cube.drives();
        assert_eq!(drives[0].at - start, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_during_run_and_second_run_rejected() {
        let cube = Arc::new(SimCube::new("a"));
        let handles: Vec<Option<Arc<dyn CubeHandle>>> =
            vec![Some(cube.clone() as Arc<dyn CubeHandle>)];
        let ctx = RunContext::new();
        let r = runner(&ctx);
        let long = Forward::new(2000);
        let short = Forward::new(10);

        let check = async {
            sleep(Duration::from_millis(100)).await;
            assert!(ctx.is_busy());
            r.run_on_first(&handles, &short).await
        };
        let (first, second) = tokio::join!(r.run_on_first(&handles, &long), check);

        assert!(first.is_ok());
        assert!(matches!(second, Err(RunError::Busy)));
        assert_eq!(short.calls.load(Ordering::SeqCst), 0);
        assert!(!ctx.is_busy());
    }
}
