use std::{collections::VecDeque, time::Duration};

use serde::Serialize;
use shared::{
    domain::Axis,
    protocol::{AxisSet, Command, MoveMode, MoveTarget, Payload, Reply, Response, HANDSHAKE_REPLY},
};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{ClientError, MicrotomeClient, Result};

const HISTORY_LEN: usize = 200;
const SWEEP_RANGE_NM: (f64, f64) = (30.0, 1000.0);

#[derive(Debug, Clone, PartialEq)]
pub struct MicrotomeSettings {
    /// Motor speeds the host assumes for move durations, in µm/s.
    pub motor_speed_x: f64,
    pub motor_speed_y: f64,
    /// Extra wait added to every XY move estimate.
    pub stage_move_wait_interval: Duration,
    pub full_cut_duration: Duration,
    /// Added to the full-cut duration before a cut counts as lost.
    pub cut_grace: Duration,
    pub xy_tolerance: f64,
    /// Largest Z step accepted in safe mode, in µm.
    pub z_safe_step: f64,
    pub z_retry_delay: Duration,
    /// Wait for commands with no duration of their own.
    pub command_timeout: Duration,
    pub calibration_timeout: Duration,
}

impl Default for MicrotomeSettings {
    fn default() -> Self {
        Self {
            motor_speed_x: 40.0,
            motor_speed_y: 40.0,
            stage_move_wait_interval: Duration::from_millis(100),
            full_cut_duration: Duration::from_secs(10),
            cut_grace: Duration::from_secs(15),
            xy_tolerance: 0.04,
            z_safe_step: 0.205,
            z_retry_delay: Duration::from_secs(2),
            command_timeout: Duration::from_secs(10),
            calibration_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AxisCounters {
    pub moves: u64,
    /// Total requested travel in µm.
    pub distance: f64,
    /// Total estimated travel time.
    pub duration: Duration,
    pub failures: u64,
}

/// Move diagnostics kept for the operator. The history windows hold one
/// flag per move for the most recent moves.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MoveStatistics {
    pub x: AxisCounters,
    pub y: AxisCounters,
    pub z: AxisCounters,
    pub slow_xy_moves: u64,
    slow_xy_history: VecDeque<bool>,
    failed_x_history: VecDeque<bool>,
    failed_y_history: VecDeque<bool>,
    failed_z_history: VecDeque<bool>,
}

impl MoveStatistics {
    pub fn axis(&self, axis: Axis) -> &AxisCounters {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// Slow XY moves among the recent ones.
    pub fn recent_slow_moves(&self) -> usize {
        self.slow_xy_history.iter().filter(|slow| **slow).count()
    }

    /// Failed moves of `axis` among the recent ones.
    pub fn recent_failures(&self, axis: Axis) -> usize {
        self.failure_history(axis).iter().filter(|failed| **failed).count()
    }

    pub fn recent_moves(&self, axis: Axis) -> usize {
        self.failure_history(axis).len()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn failure_history(&self, axis: Axis) -> &VecDeque<bool> {
        match axis {
            Axis::X => &self.failed_x_history,
            Axis::Y => &self.failed_y_history,
            Axis::Z => &self.failed_z_history,
        }
    }

    fn record_failure(&mut self, axis: Axis, failed: bool) {
        if failed {
            match axis {
                Axis::X => self.x.failures += 1,
                Axis::Y => self.y.failures += 1,
                Axis::Z => self.z.failures += 1,
            }
        }
        let history = match axis {
            Axis::X => &mut self.failed_x_history,
            Axis::Y => &mut self.failed_y_history,
            Axis::Z => &mut self.failed_z_history,
        };
        push_bounded(history, failed);
    }

    fn record_slow(&mut self, slow: bool) {
        if slow {
            self.slow_xy_moves += 1;
        }
        push_bounded(&mut self.slow_xy_history, slow);
    }
}

fn push_bounded(history: &mut VecDeque<bool>, flag: bool) {
    if history.len() == HISTORY_LEN {
        history.pop_front();
    }
    history.push_back(flag);
}

/// Stage operations of the imaging application. Tracks the last known
/// position and move diagnostics across commands.
pub struct Microtome {
    client: MicrotomeClient,
    settings: MicrotomeSettings,
    last_known_x: Option<f64>,
    last_known_y: Option<f64>,
    last_known_z: Option<f64>,
    statistics: MoveStatistics,
}

impl Microtome {
    pub fn new(client: MicrotomeClient, settings: MicrotomeSettings) -> Self {
        Self {
            client,
            settings,
            last_known_x: None,
            last_known_y: None,
            last_known_z: None,
            statistics: MoveStatistics::default(),
        }
    }

    pub fn settings(&self) -> &MicrotomeSettings {
        &self.settings
    }

    pub fn statistics(&self) -> &MoveStatistics {
        &self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
    }

    pub fn last_known_xy(&self) -> Option<(f64, f64)> {
        self.last_known_x.zip(self.last_known_y)
    }

    pub fn last_known_z(&self) -> Option<f64> {
        self.last_known_z
    }

    /// True when the controller answered the handshake.
    pub async fn handshake(&self) -> Result<bool> {
        let response = self
            .client
            .send_command(Command::Handshake, self.settings.command_timeout)
            .await?;
        Ok(response.returned().and_then(Payload::first_line) == Some(HANDSHAKE_REPLY))
    }

    pub async fn get_stage_xy(&mut self) -> Result<(f64, f64)> {
        let command = Command::GetPosition { axes: AxisSet::XY };
        let [x, y] = self.query::<2>(command).await?;
        self.last_known_x = Some(x);
        self.last_known_y = Some(y);
        Ok((x, y))
    }

    pub async fn get_stage_z(&mut self) -> Result<f64> {
        let command = Command::GetPosition { axes: AxisSet::Z };
        let [z] = self.query::<1>(command).await?;
        if let Some(previous) = self.last_known_z {
            if (z - previous).abs() > 0.01 {
                warn!(previous, z, "Z position changed since the last reading");
            }
        }
        self.last_known_z = Some(z);
        Ok(z)
    }

    pub async fn get_stage_xyz(&mut self) -> Result<(f64, f64, f64)> {
        let (x, y) = self.get_stage_xy().await?;
        let z = self.get_stage_z().await?;
        Ok((x, y, z))
    }

    /// Expected duration of an XY move, including the wait interval.
    pub fn stage_move_duration(&self, from: (f64, f64), to: (f64, f64)) -> Duration {
        let x = travel(from.0, to.0, self.settings.motor_speed_x);
        let y = travel(from.1, to.1, self.settings.motor_speed_y);
        x.max(y) + self.settings.stage_move_wait_interval
    }

    /// Confirmed XY move. A Warning means the motors were slow but arrived;
    /// an Error carries the position the stage actually reached.
    pub async fn move_stage_to_xy(&mut self, x: f64, y: f64) -> Result<()> {
        let (from_x, from_y) = self.last_known_xy().unwrap_or((x, y));
        let duration_x = travel(from_x, x, self.settings.motor_speed_x);
        let duration_y = travel(from_y, y, self.settings.motor_speed_y);
        let wait = self.stage_move_duration((from_x, from_y), (x, y)) + self.settings.command_timeout;

        let command = Command::SetPosition {
            target: MoveTarget::XY { x, y },
            mode: MoveMode::Confirmed,
        };
        let response = self.client.send_command(command, wait).await?;

        let stats = &mut self.statistics;
        stats.x.moves += 1;
        stats.y.moves += 1;
        stats.x.distance += (x - from_x).abs();
        stats.y.distance += (y - from_y).abs();
        stats.x.duration += duration_x;
        stats.y.duration += duration_y;

        match &response.reply {
            Reply::Error { message, returned } => {
                if let Some(Ok([actual_x, actual_y])) =
                    returned.as_ref().map(Payload::exact_values::<2>)
                {
                    self.last_known_x = Some(actual_x);
                    self.last_known_y = Some(actual_y);
                }
                let (actual_x, actual_y) = self.last_known_xy().unwrap_or((x, y));
                let tolerance = self.settings.xy_tolerance;
                self.statistics
                    .record_failure(Axis::X, (x - actual_x).abs() > tolerance);
                self.statistics
                    .record_failure(Axis::Y, (y - actual_y).abs() > tolerance);
                Err(ClientError::Rejected {
                    command: command.wire_name(),
                    message: message.clone(),
                })
            }
            _ => {
                self.last_known_x = Some(x);
                self.last_known_y = Some(y);
                self.statistics.record_slow(response.warning.is_some());
                self.statistics.record_failure(Axis::X, false);
                self.statistics.record_failure(Axis::Y, false);
                Ok(())
            }
        }
    }

    /// Confirmed Z move. In safe mode a step larger than the configured
    /// limit is refused before anything is sent.
    pub async fn move_stage_to_z(&mut self, z: f64, safe_mode: bool) -> Result<()> {
        let limit = self.settings.z_safe_step;
        if let Some(from) = self.last_known_z {
            if safe_mode && from >= 0.0 && (z - from).abs() > limit {
                return Err(ClientError::ZMoveTooLarge { from, to: z, limit });
            }
        }

        let command = Command::SetPosition {
            target: MoveTarget::Z(z),
            mode: MoveMode::Confirmed,
        };
        let response = self
            .client
            .send_command(command, self.settings.command_timeout)
            .await?;

        self.statistics.z.moves += 1;
        self.statistics.z.distance += self.last_known_z.map_or(0.0, |from| (z - from).abs());

        match &response.reply {
            Reply::Error { message, returned } => {
                if let Some(Ok([actual])) = returned.as_ref().map(Payload::exact_values::<1>) {
                    self.last_known_z = Some(actual);
                }
                self.statistics.record_failure(Axis::Z, true);
                Err(ClientError::Rejected {
                    command: command.wire_name(),
                    message: message.clone(),
                })
            }
            _ => {
                self.last_known_z = Some(z);
                self.statistics.record_failure(Axis::Z, false);
                Ok(())
            }
        }
    }

    /// Runs the acquisition cut cycle and returns the elapsed time reported
    /// by the controller.
    pub async fn do_full_cut(&self) -> Result<Option<f64>> {
        let wait = self.settings.full_cut_duration + self.settings.cut_grace;
        let response = self.client.send_command(Command::FullCut, wait).await?;
        match check(Command::FullCut, response)?.reply {
            Reply::AckCut { elapsed_secs } => Ok(elapsed_secs),
            _ => Ok(None),
        }
    }

    /// Cut cycle for the approach, with the knife already near.
    pub async fn do_full_approach_cut(&self) -> Result<()> {
        let wait = self.settings.full_cut_duration + self.settings.cut_grace;
        self.run(Command::FullApproachCut, wait).await
    }

    /// Cuts `sweep_distance_nm` above `z` to clear debris and returns to `z`.
    /// The return move is attempted even when the cut failed.
    pub async fn do_sweep(&mut self, z: f64, sweep_distance_nm: f64) -> Result<()> {
        let (min_nm, max_nm) = SWEEP_RANGE_NM;
        if !(min_nm..=max_nm).contains(&sweep_distance_nm) {
            return Err(ClientError::SweepDistanceOutOfRange {
                distance_nm: sweep_distance_nm,
                min_nm,
                max_nm,
            });
        }

        let sweep_z = z - sweep_distance_nm / 1000.0;
        let swept = match self.move_z_with_retry(sweep_z).await {
            Ok(()) => self.do_full_cut().await.map(|_| ()),
            Err(err) => Err(err),
        };
        let restored = self.move_z_with_retry(z).await;
        swept.and(restored)
    }

    async fn move_z_with_retry(&mut self, z: f64) -> Result<()> {
        match self.move_stage_to_z(z, false).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(z, %err, "Z move failed, trying once more");
                sleep(self.settings.z_retry_delay).await;
                self.move_stage_to_z(z, false).await
            }
        }
    }

    /// Sends new motor speeds to the controller and uses them for the host's
    /// own move estimates.
    pub async fn set_motor_speeds(&mut self, speed_x: f64, speed_y: f64) -> Result<()> {
        let command = Command::SetMotorSpeedXY { speed_x, speed_y };
        self.run(command, self.settings.command_timeout).await?;
        self.settings.motor_speed_x = speed_x;
        self.settings.motor_speed_y = speed_y;
        Ok(())
    }

    pub async fn measure_motor_speeds(&mut self) -> Result<(f64, f64)> {
        let command = Command::MeasureMotorSpeedXY;
        let response = self
            .client
            .send_command(command, self.settings.calibration_timeout)
            .await?;
        let response = check(command, response)?;
        let [speed_x, speed_y] = values::<2>(command, response.returned())?;
        let usable = |speed: f64| speed.is_finite() && speed > 0.0;
        if !(usable(speed_x) && usable(speed_y)) {
            warn!(speed_x, speed_y, "ignoring unusable measured motor speeds");
            return Err(ClientError::UnusableSpeed {
                command: command.wire_name(),
                speed_x,
                speed_y,
            });
        }
        self.settings.motor_speed_x = speed_x;
        self.settings.motor_speed_y = speed_y;
        info!(speed_x, speed_y, "measured motor speeds");
        Ok((speed_x, speed_y))
    }

    pub async fn near_knife(&self) -> Result<()> {
        self.run(Command::Near, self.settings.command_timeout).await
    }

    pub async fn clear_knife(&self) -> Result<()> {
        self.run(Command::Clear, self.settings.command_timeout).await
    }

    pub async fn cut(&self) -> Result<()> {
        self.run(Command::Cut, self.settings.command_timeout).await
    }

    pub async fn retract_knife(&self) -> Result<()> {
        self.run(Command::Retract, self.settings.command_timeout).await
    }

    pub async fn stop(&self) -> Result<()> {
        let response = self.client.stop(self.settings.command_timeout).await?;
        check(Command::Stop, response).map(|_| ())
    }

    async fn run(&self, command: Command, wait: Duration) -> Result<()> {
        let response = self.client.send_command(command, wait).await?;
        check(command, response).map(|_| ())
    }

    async fn query<const N: usize>(&self, command: Command) -> Result<[f64; N]> {
        let response = self
            .client
            .send_command(command, self.settings.command_timeout)
            .await?;
        let response = check(command, response)?;
        values::<N>(command, response.returned())
    }
}

fn check(command: Command, response: Response) -> Result<Response> {
    match response.reply {
        Reply::Error { message, .. } => Err(ClientError::Rejected {
            command: command.wire_name(),
            message,
        }),
        _ => Ok(response),
    }
}

fn values<const N: usize>(command: Command, payload: Option<&Payload>) -> Result<[f64; N]> {
    payload
        .cloned()
        .unwrap_or_default()
        .exact_values::<N>()
        .map_err(|source| ClientError::Malformed {
            command: command.wire_name(),
            source,
        })
}

fn travel(from: f64, to: f64, speed: f64) -> Duration {
    if !(speed.is_finite() && speed > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64((to - from).abs() / speed).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
