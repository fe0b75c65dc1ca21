use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::Axis;

mod simulated;

pub use simulated::{SimulatedStage, SimulationProfile, StageCall, StageFaults};

/// Position of the knife arm as reported by the clear-motor state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnifeArmState {
    Cleared,
    Near,
    Moving,
}

/// Digital control lines that arm the cutting stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLine {
    Stroke,
    Oscillator,
}

/// Primitives offered by the stage/microtome driver. Moves and knife
/// positioning only start the motion; callers observe completion through
/// [`StageDriver::position`] and [`StageDriver::knife_state`].
#[async_trait]
pub trait StageDriver: Send {
    async fn position(&mut self, axis: Axis) -> anyhow::Result<f64>;
    async fn start_move(&mut self, axis: Axis, target: f64) -> anyhow::Result<()>;
    async fn near(&mut self) -> anyhow::Result<()>;
    async fn clear(&mut self) -> anyhow::Result<()>;
    /// Runs one cutting stroke to completion.
    async fn cut(&mut self) -> anyhow::Result<()>;
    async fn retract(&mut self) -> anyhow::Result<()>;
    async fn knife_state(&mut self) -> anyhow::Result<KnifeArmState>;
    async fn set_output(&mut self, line: OutputLine, on: bool) -> anyhow::Result<()>;
}
