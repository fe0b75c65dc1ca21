use std::time::Duration;

use shared::domain::Tolerances;

/// Fixed delays and timeouts used by the handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    pub poll_interval: Duration,
    /// Added to the expected XY travel time before the first read-back.
    pub xy_move_margin: Duration,
    /// Wait before the second XY read-back after a tolerance miss.
    pub xy_retry_delay: Duration,
    /// Wait before the single Z read-back.
    pub z_settle: Duration,
    pub knife_timeout: Duration,
    pub knife_poll: Duration,
    pub stroke_settle: Duration,
    pub clear_retry_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            xy_move_margin: Duration::from_millis(100),
            xy_retry_delay: Duration::from_millis(1500),
            z_settle: Duration::from_millis(300),
            knife_timeout: Duration::from_secs(4),
            knife_poll: Duration::from_millis(100),
            stroke_settle: Duration::from_millis(300),
            clear_retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings {
    /// One-way travel of each round trip, in micrometres.
    pub distance: f64,
    pub round_trips: u32,
    pub move_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            distance: 50.0,
            round_trips: 10,
            move_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub tolerances: Tolerances,
    pub motor_speed_x: f64,
    pub motor_speed_y: f64,
    pub motor_speed_z: f64,
    pub use_oscillation: bool,
    pub timings: Timings,
    pub calibration: CalibrationSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            motor_speed_x: 40.0,
            motor_speed_y: 40.0,
            motor_speed_z: 5.0,
            use_oscillation: true,
            timings: Timings::default(),
            calibration: CalibrationSettings::default(),
        }
    }
}
