use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// X and Y share the looser lateral tolerance and the retry-once rule.
    pub fn is_lateral(self) -> bool {
        matches!(self, Axis::X | Axis::Y)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(label)
    }
}

/// Per-axis-family positioning tolerances in micrometres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub xy: f64,
    pub z: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self { xy: 0.04, z: 0.004 }
    }
}

impl Tolerances {
    pub fn for_axis(&self, axis: Axis) -> f64 {
        if axis.is_lateral() {
            self.xy
        } else {
            self.z
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisState {
    pub axis: Axis,
    /// Last known position in micrometres.
    pub position: f64,
    /// Calibrated motor speed in micrometres per second.
    pub calibrated_speed: f64,
    pub tolerance: f64,
}

impl AxisState {
    pub fn new(axis: Axis, calibrated_speed: f64, tolerance: f64) -> Self {
        Self {
            axis,
            position: 0.0,
            calibrated_speed,
            tolerance,
        }
    }

    /// Expected travel time between two positions at the calibrated speed.
    /// An unusable speed yields a zero estimate rather than an infinite one.
    pub fn travel_time(&self, from: f64, to: f64) -> Duration {
        if !(self.calibrated_speed.is_finite() && self.calibrated_speed > 0.0) {
            return Duration::ZERO;
        }
        let secs = (to - from).abs() / self.calibrated_speed;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    /// Inclusive comparison: a deviation equal to the tolerance is accepted.
    pub fn within_tolerance(&self, target: f64, actual: f64) -> bool {
        (actual - target).abs() <= self.tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutCycleState {
    Idle,
    Nearing,
    StrokeUp,
    Cutting,
    StrokeDown,
    Retracting,
    Clearing,
    ClearRetry,
    Done,
    Failed,
}

impl CutCycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CutCycleState::Done | CutCycleState::Failed)
    }
}

impl fmt::Display for CutCycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CutCycleState::Idle => "idle",
            CutCycleState::Nearing => "nearing",
            CutCycleState::StrokeUp => "stroke up",
            CutCycleState::Cutting => "cutting",
            CutCycleState::StrokeDown => "stroke down",
            CutCycleState::Retracting => "retracting",
            CutCycleState::Clearing => "clearing",
            CutCycleState::ClearRetry => "clear retry",
            CutCycleState::Done => "done",
            CutCycleState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
