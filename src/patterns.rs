// Built-in lesson patterns
// Each one is a short call sequence over the motion primitives, the kind of thing a
// student writes: loops, a branch, a shape.

use async_trait::async_trait;
use clap::ValueEnum;
use rand_core::{OsRng, TryRngCore};
use tracing::{info, warn};

use crate::motion::Motion;
use crate::runner::{Pattern, PatternResult};

/// Which built-in pattern to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PatternKind {
    /// Square, random spin-or-nudge, then a spiral
    Student,
    /// Square drawn with a for loop
    ForLoop,
    /// Spin and beep until a counter runs out
    WhileLoop,
    /// Spin or wiggle depending on a condition
    IfElse,
    /// Square, beep, wiggle
    Challenge,
    /// Pentagon and triangle from the lesson defaults
    Shapes,
}

/// How the if/else pattern picks its branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Branch {
    #[default]
    Random,
    Spin,
    Move,
}

impl Branch {
    fn resolve(self) -> bool {
        match self {
            Branch::Spin => true,
            Branch::Move => false,
            Branch::Random => coin_flip(),
        }
    }
}

fn coin_flip() -> bool {
    match OsRng.try_next_u32() {
        Ok(bits) => bits & 1 == 1,
        Err(e) => {
            warn!("OS randomness unavailable ({}), taking the spin branch", e);
            true
        }
    }
}

impl PatternKind {
    pub fn build(self, branch: Branch) -> Box<dyn Pattern> {
        match self {
            PatternKind::Student => Box::new(StudentPattern { branch }),
            PatternKind::ForLoop => Box::new(ForLoopPattern),
            PatternKind::WhileLoop => Box::new(WhileLoopPattern),
            PatternKind::IfElse => Box::new(IfElsePattern { branch }),
            PatternKind::Challenge => Box::new(ChallengePattern),
            PatternKind::Shapes => Box::new(ShapesPattern),
        }
    }
}

async fn square(motion: &Motion<'_>, side_ms: i32) {
    for _ in 0..4 {
        motion.move_forward(80, side_ms).await;
        motion.turn_right(90).await;
    }
}

pub struct StudentPattern {
    pub branch: Branch,
}

#[async_trait]
impl Pattern for StudentPattern {
    fn name(&self) -> &str {
        "student"
    }

    async fn run(&self, motion: &Motion<'_>) -> PatternResult {
        square(motion, 600).await;

        if self.branch.resolve() {
            motion.turn_right(360).await;
        } else {
            motion.nudge(70, 250).await;
            motion.beep().await;
        }

        motion.spiral(6, 300, 80, 85, 25).await;
        Ok(())
    }
}

pub struct ForLoopPattern;

#[async_trait]
impl Pattern for ForLoopPattern {
    fn name(&self) -> &str {
        "for-loop"
    }

    async fn run(&self, motion: &Motion<'_>) -> PatternResult {
        square(motion, 600).await;
        motion.beep().await;
        Ok(())
    }
}

pub struct WhileLoopPattern;

#[async_trait]
impl Pattern for WhileLoopPattern {
    fn name(&self) -> &str {
        "while-loop"
    }

    async fn run(&self, motion: &Motion<'_>) -> PatternResult {
        let mut spins = 0;
        while spins < 3 {
            motion.turn_right(120).await;
            motion.beep().await;
            spins += 1;
        }
        motion.wiggle(2, 180).await;
        motion.beep().await;
        Ok(())
    }
}

pub struct IfElsePattern {
    pub branch: Branch,
}

#[async_trait]
impl Pattern for IfElsePattern {
    fn name(&self) -> &str {
        "if-else"
    }

    async fn run(&self, motion: &Motion<'_>) -> PatternResult {
        let spin = self.branch.resolve();
        info!("if-else: {}", if spin { "spin" } else { "wiggle and move" });

        if spin {
            motion.turn_right(360).await;
            motion.beep().await;
        } else {
            motion.wiggle(2, 180).await;
            motion.move_forward(80, 600).await;
        }
        motion.beep().await;
        Ok(())
    }
}

pub struct ChallengePattern;

#[async_trait]
impl Pattern for ChallengePattern {
    fn name(&self) -> &str {
        "challenge"
    }

    async fn run(&self, motion: &Motion<'_>) -> PatternResult {
        square(motion, 700).await;
        motion.beep().await;
        motion.wiggle(2, 180).await;
        Ok(())
    }
}

pub struct ShapesPattern;

#[async_trait]
impl Pattern for ShapesPattern {
    fn name(&self) -> &str {
        "shapes"
    }

    async fn run(&self, motion: &Motion<'_>) -> PatternResult {
        let d = motion.calibration().defaults;
        motion.regular_polygon(5, d.move_ms, d.speed).await;
        motion.turn_left(d.turn_deg).await;
        motion.regular_polygon(3, d.move_ms, d.speed).await;
        motion.beep().await;
        Ok(())
    }
}
