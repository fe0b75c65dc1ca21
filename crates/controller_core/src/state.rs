use shared::domain::{Axis, AxisState};

use crate::config::ControllerConfig;

/// Everything the controller knows about the stage between commands.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub x: AxisState,
    pub y: AxisState,
    pub z: AxisState,
    pub use_oscillation: bool,
}

impl ControllerState {
    pub fn new(config: &ControllerConfig) -> Self {
        let tolerances = config.tolerances;
        Self {
            x: AxisState::new(Axis::X, config.motor_speed_x, tolerances.xy),
            y: AxisState::new(Axis::Y, config.motor_speed_y, tolerances.xy),
            z: AxisState::new(Axis::Z, config.motor_speed_z, tolerances.z),
            use_oscillation: config.use_oscillation,
        }
    }

    pub fn axis(&self, axis: Axis) -> &AxisState {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut AxisState {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}
