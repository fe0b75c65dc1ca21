use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use channel::{ChannelLayout, HandoffMode};
use controller_core::{CalibrationSettings, ControllerConfig, Timings};
use serde::Deserialize;
use shared::domain::Tolerances;
use stage_driver::SimulationProfile;

const DEFAULT_CONFIG_FILE: &str = "controller.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub channel_dir: PathBuf,
    pub channel_stem: String,
    pub handoff: HandoffMode,
    pub tolerances: Tolerances,
    pub motor_speed_x: f64,
    pub motor_speed_y: f64,
    pub motor_speed_z: f64,
    pub use_oscillation: bool,
    pub timings: TimingSettings,
    pub calibration: CalibrationFileSettings,
    pub simulation: SimulationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let core = ControllerConfig::default();
        Self {
            channel_dir: PathBuf::from("./microtome"),
            channel_stem: "ssd_msg".into(),
            handoff: HandoffMode::default(),
            tolerances: core.tolerances,
            motor_speed_x: core.motor_speed_x,
            motor_speed_y: core.motor_speed_y,
            motor_speed_z: core.motor_speed_z,
            use_oscillation: core.use_oscillation,
            timings: TimingSettings::default(),
            calibration: CalibrationFileSettings::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

/// Handler delays in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub poll_interval_ms: u64,
    pub xy_move_margin_ms: u64,
    pub xy_retry_delay_ms: u64,
    pub z_settle_ms: u64,
    pub knife_timeout_ms: u64,
    pub knife_poll_ms: u64,
    pub stroke_settle_ms: u64,
    pub clear_retry_delay_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        let timings = Timings::default();
        Self {
            poll_interval_ms: millis(timings.poll_interval),
            xy_move_margin_ms: millis(timings.xy_move_margin),
            xy_retry_delay_ms: millis(timings.xy_retry_delay),
            z_settle_ms: millis(timings.z_settle),
            knife_timeout_ms: millis(timings.knife_timeout),
            knife_poll_ms: millis(timings.knife_poll),
            stroke_settle_ms: millis(timings.stroke_settle),
            clear_retry_delay_ms: millis(timings.clear_retry_delay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationFileSettings {
    pub distance: f64,
    pub round_trips: u32,
    pub move_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for CalibrationFileSettings {
    fn default() -> Self {
        let calibration = CalibrationSettings::default();
        Self {
            distance: calibration.distance,
            round_trips: calibration.round_trips,
            move_timeout_ms: millis(calibration.move_timeout),
            poll_interval_ms: millis(calibration.poll_interval),
        }
    }
}

/// Physical behaviour of the simulated stage the binary drives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub speed_x: f64,
    pub speed_y: f64,
    pub speed_z: f64,
    pub knife_travel_ms: u64,
    pub cut_ms: u64,
    pub retract_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        let profile = SimulationProfile::default();
        Self {
            speed_x: profile.speed_x,
            speed_y: profile.speed_y,
            speed_z: profile.speed_z,
            knife_travel_ms: millis(profile.knife_travel),
            cut_ms: millis(profile.cut_duration),
            retract_ms: millis(profile.retract_duration),
        }
    }
}

impl Settings {
    pub fn layout(&self) -> ChannelLayout {
        ChannelLayout::new(&self.channel_dir, &self.channel_stem)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let t = &self.timings;
        let c = &self.calibration;
        ControllerConfig {
            tolerances: self.tolerances,
            motor_speed_x: self.motor_speed_x,
            motor_speed_y: self.motor_speed_y,
            motor_speed_z: self.motor_speed_z,
            use_oscillation: self.use_oscillation,
            timings: Timings {
                poll_interval: Duration::from_millis(t.poll_interval_ms),
                xy_move_margin: Duration::from_millis(t.xy_move_margin_ms),
                xy_retry_delay: Duration::from_millis(t.xy_retry_delay_ms),
                z_settle: Duration::from_millis(t.z_settle_ms),
                knife_timeout: Duration::from_millis(t.knife_timeout_ms),
                knife_poll: Duration::from_millis(t.knife_poll_ms),
                stroke_settle: Duration::from_millis(t.stroke_settle_ms),
                clear_retry_delay: Duration::from_millis(t.clear_retry_delay_ms),
            },
            calibration: CalibrationSettings {
                distance: c.distance,
                round_trips: c.round_trips,
                move_timeout: Duration::from_millis(c.move_timeout_ms),
                poll_interval: Duration::from_millis(c.poll_interval_ms),
            },
        }
    }

    pub fn simulation_profile(&self) -> SimulationProfile {
        let s = &self.simulation;
        SimulationProfile {
            speed_x: s.speed_x,
            speed_y: s.speed_y,
            speed_z: s.speed_z,
            knife_travel: Duration::from_millis(s.knife_travel_ms),
            cut_duration: Duration::from_millis(s.cut_ms),
            retract_duration: Duration::from_millis(s.retract_ms),
        }
    }
}

/// Defaults, then the TOML file, then `MICROTOME__*` environment overrides.
/// An explicitly named file must exist; the default file is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => read_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            read_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => Settings::default(),
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn read_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub(crate) fn apply_env_overrides(
    settings: &mut Settings,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = var("MICROTOME__CHANNEL_DIR") {
        settings.channel_dir = PathBuf::from(v);
    }
    if let Some(v) = var("MICROTOME__CHANNEL_STEM") {
        settings.channel_stem = v;
    }
    if let Some(v) = var("MICROTOME__MOTOR_SPEED_X") {
        settings.motor_speed_x = v
            .trim()
            .parse()
            .with_context(|| format!("MICROTOME__MOTOR_SPEED_X is not a number: '{v}'"))?;
    }
    if let Some(v) = var("MICROTOME__MOTOR_SPEED_Y") {
        settings.motor_speed_y = v
            .trim()
            .parse()
            .with_context(|| format!("MICROTOME__MOTOR_SPEED_Y is not a number: '{v}'"))?;
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
