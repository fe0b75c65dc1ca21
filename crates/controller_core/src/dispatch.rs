use shared::{
    domain::Axis,
    protocol::{Command, MoveMode, MoveTarget, Payload, HANDSHAKE_REPLY, STOP_REPLY},
};
use stage_driver::KnifeArmState;
use tokio::time::timeout;
use tracing::info;

use crate::{cut_cycle::CycleKind, Controller, HandlerError};

impl Controller {
    /// Runs the handler for `command`. Each handler writes its own
    /// completion file; failures are reported by the caller.
    pub(crate) async fn dispatch(&mut self, command: Command) -> Result<(), HandlerError> {
        match command {
            Command::Handshake => {
                self.channel.write_return(&Payload::text(HANDSHAKE_REPLY))?;
            }
            Command::Cut => {
                self.driver.cut().await.map_err(HandlerError::stage("cut"))?;
                self.channel.acknowledge()?;
            }
            Command::Retract => {
                self.driver
                    .retract()
                    .await
                    .map_err(HandlerError::stage("retract"))?;
                self.channel.acknowledge()?;
            }
            Command::Near => {
                self.position_knife(KnifeArmState::Near).await?;
                self.channel.acknowledge()?;
            }
            Command::Clear => {
                self.position_knife(KnifeArmState::Cleared).await?;
                self.channel.acknowledge()?;
            }
            Command::FullCut => self.cut_and_report(CycleKind::Full).await?,
            Command::FullApproachCut => self.cut_and_report(CycleKind::Approach).await?,
            Command::GetPosition { axes } => {
                let mut values = Vec::with_capacity(axes.axes().len());
                for &axis in axes.axes() {
                    values.push(self.read_position(axis).await?);
                }
                self.channel.write_return(&Payload::positions(&values))?;
            }
            Command::SetPosition {
                target,
                mode: MoveMode::Unconfirmed,
            } => {
                self.start_moves(target).await?;
                for (axis, position) in target.targets() {
                    self.state.axis_mut(axis).position = position;
                }
                self.channel.acknowledge()?;
            }
            Command::SetPosition {
                target,
                mode: MoveMode::Confirmed,
            } => {
                self.move_confirmed(target).await?;
                self.channel.acknowledge()?;
            }
            Command::SetMotorSpeedXY { speed_x, speed_y } => {
                let usable = |speed: f64| speed.is_finite() && speed > 0.0;
                if !(usable(speed_x) && usable(speed_y)) {
                    return Err(HandlerError::InvalidSpeed {
                        x: speed_x,
                        y: speed_y,
                    });
                }
                self.state.x.calibrated_speed = speed_x;
                self.state.y.calibrated_speed = speed_y;
                info!(speed_x, speed_y, "motor speeds updated");
                self.channel.acknowledge()?;
            }
            Command::MeasureMotorSpeedXY => {
                let [speed_x, speed_y] = self.measure_motor_speeds().await?;
                self.channel
                    .write_return(&Payload::speeds(&[speed_x, speed_y]))?;
                self.channel.acknowledge()?;
            }
            Command::Stop => {
                self.channel.write_return(&Payload::text(STOP_REPLY))?;
            }
        }
        Ok(())
    }

    pub(crate) async fn read_position(&mut self, axis: Axis) -> Result<f64, HandlerError> {
        let position = self
            .driver
            .position(axis)
            .await
            .map_err(HandlerError::stage("position read"))?;
        self.state.axis_mut(axis).position = position;
        Ok(position)
    }

    /// Issues the move for every axis in `target` back to back so the motors
    /// run concurrently.
    pub(crate) async fn start_moves(&mut self, target: MoveTarget) -> Result<(), HandlerError> {
        for (axis, position) in target.targets() {
            self.driver
                .start_move(axis, position)
                .await
                .map_err(HandlerError::stage("move"))?;
        }
        Ok(())
    }

    /// Commands the knife towards `expected` and polls the clear-motor state
    /// until it arrives or the knife timeout elapses.
    pub(crate) async fn position_knife(
        &mut self,
        expected: KnifeArmState,
    ) -> Result<(), HandlerError> {
        match expected {
            KnifeArmState::Near => self.driver.near().await.map_err(HandlerError::stage("near"))?,
            _ => self
                .driver
                .clear()
                .await
                .map_err(HandlerError::stage("clear"))?,
        }

        let knife_timeout = self.timings.knife_timeout;
        let poll = self.timings.knife_poll;
        let driver = &mut self.driver;
        let wait = async {
            loop {
                let state = driver
                    .knife_state()
                    .await
                    .map_err(HandlerError::stage("knife state query"))?;
                if state == expected {
                    return Ok::<(), HandlerError>(());
                }
                tokio::time::sleep(poll).await;
            }
        };
        timeout(knife_timeout, wait)
            .await
            .map_err(|_| HandlerError::KnifeTimeout {
                expected,
                timeout: knife_timeout,
            })?
    }
}
