use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use cube_pattern_runtime::config::{CalibrationConfig, DISCOVERY_WINDOW_MS, STARTUP_DELAY_MS};
use cube_pattern_runtime::cube::{
    CubeHandle, SimCube, SimOptions, connect_simulated, connect_zenoh,
};
use cube_pattern_runtime::messages::TriggerKind;
use cube_pattern_runtime::motion::safe_stop;
use cube_pattern_runtime::patterns::{Branch, PatternKind};
use cube_pattern_runtime::runner::{RunContext, RunMode, Runner};
use cube_pattern_runtime::trigger::DoubleTapReaction;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// In-process simulated cubes
    Sim,
    /// Cubes behind a zenoh bridge
    Zenoh,
}

/// Run a movement pattern on one or more cubes
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[arg(long, value_enum, default_value_t = Transport::Sim)]
    transport: Transport,

    /// Number of cubes to connect
    #[arg(short = 'n', long, default_value_t = 1)]
    cubes: usize,

    /// Run on every connected cube in turn instead of only the first
    #[arg(long)]
    all: bool,

    #[arg(short, long, value_enum, default_value_t = PatternKind::Student)]
    pattern: PatternKind,

    /// Branch taken by patterns with a condition
    #[arg(long, value_enum, default_value_t = Branch::Random)]
    branch: Branch,

    /// Calibration JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override turn calibration (ms per degree)
    #[arg(long)]
    ms_per_deg: Option<f32>,

    /// Override motor settle time (ms)
    #[arg(long)]
    settle_ms: Option<u32>,

    /// Simulator: cube indices that report disconnected
    #[arg(long, value_delimiter = ',')]
    sim_disconnected: Vec<usize>,

    /// Simulator: cubes can't play sound
    #[arg(long)]
    sim_no_sound: bool,

    /// Exit after the pattern instead of waiting for double-taps
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for per-command output)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn calibration(cli: &Cli) -> Result<CalibrationConfig, BoxError> {
    let cal = match &cli.config {
        Some(path) => CalibrationConfig::load(path)?,
        None => CalibrationConfig::default(),
    };
    Ok(cal.with_overrides(cli.ms_per_deg, cli.settle_ms))
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let cal = calibration(&cli)?;
    info!(
        "Calibration: {}ms/deg, {}ms settle",
        cal.ms_per_deg, cal.motor_settle_ms
    );

    let (sims, cubes) = match cli.transport {
        Transport::Sim => {
            let options = SimOptions {
                disconnected: cli.sim_disconnected.iter().copied().collect(),
                no_sound: cli.sim_no_sound,
                ms_per_deg: Some(cal.ms_per_deg),
                ..SimOptions::default()
            };
            connect_simulated(cli.cubes, &options)
        }
        Transport::Zenoh => {
            let cubes =
                connect_zenoh(cli.cubes, Duration::from_millis(DISCOVERY_WINDOW_MS)).await?;
            (Vec::new(), cubes)
        }
    };

    let connected: Vec<Arc<dyn CubeHandle>> = cubes
        .iter()
        .flatten()
        .filter(|c| c.is_connected())
        .cloned()
        .collect();
    info!("Connected {} of {} cube(s)", connected.len(), cli.cubes);

    let ctx = RunContext::new();
    for cube in &connected {
        ctx.subscribe(cube.clone(), cal, Arc::new(DoubleTapReaction));
    }

    tokio::time::sleep(Duration::from_millis(STARTUP_DELAY_MS)).await;

    let runner = Runner::new(cal, ctx.clone());
    let mode = if cli.all { RunMode::All } else { RunMode::First };
    let pattern = cli.pattern.build(cli.branch);
    let result = runner.run(mode, &cubes, pattern.as_ref()).await;

    let outcome = match result {
        Ok(report) => {
            info!(
                "Done: executed {:?}, failed {:?}, skipped {:?}",
                report.executed, report.failed, report.skipped
            );
            if cli.once {
                Ok(())
            } else {
                wait_for_quit(cli.transport, sims).await
            }
        }
        Err(e) => Err(e.into()),
    };

    ctx.unsubscribe_all();
    for cube in &connected {
        safe_stop(Some(cube.as_ref())).await;
    }
    outcome
}

async fn wait_for_quit(transport: Transport, sims: Vec<Arc<SimCube>>) -> Result<(), BoxError> {
    match transport {
        Transport::Sim => {
            info!("Ready. Press 1-9 to double-tap a cube, q to quit");
            tokio::task::spawn_blocking(move || keyboard_taps(&sims)).await??;
        }
        Transport::Zenoh => {
            info!("Ready. Double-tap a cube any time, Ctrl+C to quit");
            tokio::signal::ctrl_c().await?;
        }
    }
    Ok(())
}

// Digit keys stand in for physical double-taps on simulated cubes
fn keyboard_taps(sims: &[Arc<SimCube>]) -> std::io::Result<()> {
    enable_raw_mode()?;
    let result = (|| -> std::io::Result<()> {
        loop {
            if !event::poll(Duration::from_millis(50))? {
                continue;
            }
            let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
                continue;
            };
            if kind != KeyEventKind::Press {
                continue;
            }
            match code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char(c) => {
                    let Some(n) = c.to_digit(10).filter(|n| *n > 0) else {
                        continue;
                    };
                    if let Some(sim) = sims.get(n as usize - 1) {
                        sim.fire_trigger(TriggerKind::DoubleTap);
                    }
                }
                _ => {}
            }
        }
    })();
    disable_raw_mode()?;
    result
}
