//! Controller side of the microtome link: polls the shared-directory channel,
//! runs one command at a time against a [`StageDriver`] and publishes the
//! outcome files.

use channel::{ChannelError, ControllerChannel};
use shared::protocol::Command;
use stage_driver::StageDriver;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

mod calibrate;
pub mod config;
mod confirm;
pub mod cut_cycle;
mod dispatch;
mod error;
mod idle;
pub mod state;

pub use calibrate::motor_speed;
pub use config::{CalibrationSettings, ControllerConfig, Timings};
pub use cut_cycle::{CycleKind, CycleReport, StepRecord};
pub use error::HandlerError;
pub use idle::IdleTracker;
pub use state::ControllerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

pub struct Controller {
    channel: ControllerChannel,
    driver: Box<dyn StageDriver>,
    state: ControllerState,
    timings: Timings,
    calibration: CalibrationSettings,
    idle: IdleTracker,
}

impl Controller {
    pub fn new(
        channel: ControllerChannel,
        driver: Box<dyn StageDriver>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            channel,
            driver,
            state: ControllerState::new(config),
            timings: config.timings.clone(),
            calibration: config.calibration.clone(),
            idle: IdleTracker::new(Instant::now()),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Polls the channel at the configured interval until a `Stop` command
    /// has been handled.
    pub async fn run(&mut self) -> Result<(), ChannelError> {
        self.channel.prepare()?;
        info!(
            dir = %self.channel.layout().dir().display(),
            interval_ms = self.timings.poll_interval.as_millis() as u64,
            "controller polling for commands"
        );

        let mut ticker = time::interval(self.timings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.idle.reset(Instant::now());
        loop {
            ticker.tick().await;
            if self.step().await == LoopControl::Stop {
                info!("stop command received, leaving command loop");
                return Ok(());
            }
        }
    }

    /// One scheduler tick: picks up at most one command and runs it to
    /// completion.
    pub async fn step(&mut self) -> LoopControl {
        match self.channel.poll() {
            Ok(true) => {}
            Ok(false) => {
                if let Some(idle_for) = self.idle.observe(Instant::now()) {
                    info!(idle_minutes = idle_for.as_secs() / 60, "waiting for commands");
                }
                return LoopControl::Continue;
            }
            Err(err) => {
                warn!(%err, "could not poll for commands");
                return LoopControl::Continue;
            }
        }

        let descriptor = match self.channel.take_command() {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return LoopControl::Continue,
            Err(err) => {
                self.report_channel_failure(&err);
                return LoopControl::Continue;
            }
        };
        self.idle.reset(Instant::now());

        if let Err(err) = self.channel.clear_stale_outcomes() {
            self.report_channel_failure(&err);
            return LoopControl::Continue;
        }

        let Some(command) = Command::from_descriptor(&descriptor) else {
            debug!(name = %descriptor.name, "ignoring unrecognised command");
            return LoopControl::Continue;
        };

        let started = Instant::now();
        debug!(command = command.wire_name(), "executing command");
        let result = self.dispatch(command).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(command = command.wire_name(), elapsed_ms, "command completed"),
            Err(err) => self.report_failure(command, err),
        }

        if command == Command::Stop {
            LoopControl::Stop
        } else {
            LoopControl::Continue
        }
    }

    fn report_failure(&self, command: Command, err: &HandlerError) {
        error!(command = command.wire_name(), %err, "command failed");
        if let Some(payload) = err.last_known() {
            if let Err(write_err) = self.channel.write_return(payload) {
                error!(%write_err, "could not write last known position");
            }
        }
        if let Err(write_err) = self.channel.fail(&err.to_string()) {
            error!(%write_err, "could not write error file");
        }
    }

    fn report_channel_failure(&self, err: &ChannelError) {
        error!(%err, "channel i/o failed");
        if let Err(write_err) = self.channel.fail(&err.to_string()) {
            error!(%write_err, "could not write error file");
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
