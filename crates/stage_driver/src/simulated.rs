use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use shared::domain::Axis;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::{KnifeArmState, OutputLine, StageDriver};

/// Physical behaviour of the simulated stage.
#[derive(Debug, Clone)]
pub struct SimulationProfile {
    /// Actual motor speeds in micrometres per second.
    pub speed_x: f64,
    pub speed_y: f64,
    pub speed_z: f64,
    pub knife_travel: Duration,
    pub cut_duration: Duration,
    pub retract_duration: Duration,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            speed_x: 40.0,
            speed_y: 40.0,
            speed_z: 5.0,
            knife_travel: Duration::from_millis(1500),
            cut_duration: Duration::from_secs(2),
            retract_duration: Duration::from_secs(1),
        }
    }
}

/// Injected faults. Positioning offsets are added to the final position of
/// every move on that axis.
#[derive(Debug, Clone, Default)]
pub struct StageFaults {
    pub offset_x: f64,
    pub offset_y: f64,
    pub offset_z: f64,
    pub stuck_axes: Vec<Axis>,
    pub position_read_fails: bool,
    pub near_stalls: bool,
    /// Number of consecutive clear commands whose motion never completes.
    pub clear_stalls: u32,
    pub cut_fails: bool,
    pub retract_fails: bool,
}

impl StageFaults {
    fn offset(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.offset_x,
            Axis::Y => self.offset_y,
            Axis::Z => self.offset_z,
        }
    }
}

/// Actuations recorded by the simulated stage, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum StageCall {
    Move(Axis, f64),
    Near,
    Clear,
    Cut,
    Retract,
    Output(OutputLine, bool),
}

#[derive(Debug, Clone, Copy)]
struct AxisMotion {
    origin: f64,
    target: f64,
    started: Instant,
    speed: f64,
    offset: f64,
    stuck: bool,
}

impl AxisMotion {
    fn at_rest(position: f64) -> Self {
        Self {
            origin: position,
            target: position,
            started: Instant::now(),
            speed: 0.0,
            offset: 0.0,
            stuck: false,
        }
    }

    fn position(&self, now: Instant) -> f64 {
        if self.stuck {
            return self.origin;
        }
        let distance = (self.target - self.origin).abs();
        let travelled = self.speed * now.saturating_duration_since(self.started).as_secs_f64();
        if travelled >= distance {
            self.target + self.offset
        } else {
            self.origin + travelled.copysign(self.target - self.origin)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct KnifeMotion {
    state: KnifeArmState,
    heading: Option<(KnifeArmState, Option<Instant>)>,
}

impl KnifeMotion {
    fn observe(&mut self, now: Instant) -> KnifeArmState {
        if let Some((destination, Some(arrives))) = self.heading {
            if now >= arrives {
                self.state = destination;
                self.heading = None;
            }
        }
        self.state
    }

    fn head_to(&mut self, destination: KnifeArmState, arrives: Option<Instant>) {
        self.state = KnifeArmState::Moving;
        self.heading = Some((destination, arrives));
    }
}

#[derive(Debug)]
struct SimState {
    profile: SimulationProfile,
    faults: StageFaults,
    axes: [AxisMotion; 3],
    knife: KnifeMotion,
    stroke: bool,
    oscillator: bool,
    journal: Vec<StageCall>,
}

/// In-memory stage driven by tokio's clock, so tests can run it under a
/// paused runtime. Clones share the same state.
#[derive(Debug, Clone)]
pub struct SimulatedStage {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedStage {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                profile,
                faults: StageFaults::default(),
                axes: [AxisMotion::at_rest(0.0); 3],
                knife: KnifeMotion {
                    state: KnifeArmState::Cleared,
                    heading: None,
                },
                stroke: false,
                oscillator: false,
                journal: Vec::new(),
            })),
        }
    }

    pub fn with_faults(self, faults: StageFaults) -> Self {
        self.state().faults = faults;
        self
    }

    pub fn set_faults(&self, faults: StageFaults) {
        self.state().faults = faults;
    }

    /// Puts an axis at rest at `position` without recording a move.
    pub fn place(&self, axis: Axis, position: f64) {
        self.state().axes[index(axis)] = AxisMotion::at_rest(position);
    }

    pub fn journal(&self) -> Vec<StageCall> {
        self.state().journal.clone()
    }

    pub fn outputs(&self) -> (bool, bool) {
        let state = self.state();
        (state.stroke, state.oscillator)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn index(axis: Axis) -> usize {
    match axis {
        Axis::X => 0,
        Axis::Y => 1,
        Axis::Z => 2,
    }
}

#[async_trait]
impl StageDriver for SimulatedStage {
    async fn position(&mut self, axis: Axis) -> Result<f64> {
        let state = self.state();
        if state.faults.position_read_fails {
            bail!("position read failed on {axis}");
        }
        Ok(state.axes[index(axis)].position(Instant::now()))
    }

    async fn start_move(&mut self, axis: Axis, target: f64) -> Result<()> {
        let mut state = self.state();
        let now = Instant::now();
        let current = state.axes[index(axis)].position(now);
        let speed = match axis {
            Axis::X => state.profile.speed_x,
            Axis::Y => state.profile.speed_y,
            Axis::Z => state.profile.speed_z,
        };
        let motion = AxisMotion {
            origin: current,
            target,
            started: now,
            speed,
            offset: state.faults.offset(axis),
            stuck: state.faults.stuck_axes.contains(&axis),
        };
        state.axes[index(axis)] = motion;
        state.journal.push(StageCall::Move(axis, target));
        debug!(%axis, from = current, to = target, "simulated move started");
        Ok(())
    }

    async fn near(&mut self) -> Result<()> {
        let mut state = self.state();
        let arrives = (!state.faults.near_stalls).then(|| Instant::now() + state.profile.knife_travel);
        state.knife.head_to(KnifeArmState::Near, arrives);
        state.journal.push(StageCall::Near);
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        let mut state = self.state();
        let arrives = if state.faults.clear_stalls > 0 {
            state.faults.clear_stalls -= 1;
            None
        } else {
            Some(Instant::now() + state.profile.knife_travel)
        };
        state.knife.head_to(KnifeArmState::Cleared, arrives);
        state.journal.push(StageCall::Clear);
        Ok(())
    }

    async fn cut(&mut self) -> Result<()> {
        let duration = {
            let mut state = self.state();
            state.journal.push(StageCall::Cut);
            if state.faults.cut_fails {
                bail!("cut stroke did not complete");
            }
            state.profile.cut_duration
        };
        sleep(duration).await;
        Ok(())
    }

    async fn retract(&mut self) -> Result<()> {
        let duration = {
            let mut state = self.state();
            state.journal.push(StageCall::Retract);
            if state.faults.retract_fails {
                bail!("knife retract did not complete");
            }
            state.profile.retract_duration
        };
        sleep(duration).await;
        Ok(())
    }

    async fn knife_state(&mut self) -> Result<KnifeArmState> {
        Ok(self.state().knife.observe(Instant::now()))
    }

    async fn set_output(&mut self, line: OutputLine, on: bool) -> Result<()> {
        let mut state = self.state();
        match line {
            OutputLine::Stroke => state.stroke = on,
            OutputLine::Oscillator => state.oscillator = on,
        }
        state.journal.push(StageCall::Output(line, on));
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/simulated_tests.rs"]
mod tests;
