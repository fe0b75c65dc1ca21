use std::time::Duration;

use shared::domain::Axis;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use crate::{Controller, HandlerError};

/// Average speed over `round_trips` out-and-back legs of `distance`.
/// Returns 0 when no time elapsed.
pub fn motor_speed(round_trips: u32, distance: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    f64::from(round_trips) * 2.0 * distance / secs
}

impl Controller {
    /// Times round trips on X and then Y. Any leg that misses the move
    /// timeout, or an axis whose speed comes out zero, aborts the whole
    /// measurement and leaves the stored speeds untouched.
    pub(crate) async fn measure_motor_speeds(&mut self) -> Result<[f64; 2], HandlerError> {
        self.drive_to(Axis::X, 0.0).await?;
        self.drive_to(Axis::Y, 0.0).await?;

        let speed_x = self.time_round_trips(Axis::X).await?;
        let speed_y = self.time_round_trips(Axis::Y).await?;

        self.state.x.calibrated_speed = speed_x;
        self.state.y.calibrated_speed = speed_y;
        info!(speed_x, speed_y, "motor speeds measured");
        Ok([speed_x, speed_y])
    }

    async fn time_round_trips(&mut self, axis: Axis) -> Result<f64, HandlerError> {
        let round_trips = self.calibration.round_trips;
        let distance = self.calibration.distance;

        let started = Instant::now();
        for _ in 0..round_trips {
            self.drive_to(axis, distance).await?;
            self.drive_to(axis, 0.0).await?;
        }
        let elapsed = started.elapsed();
        let speed = motor_speed(round_trips, distance, elapsed);
        debug!(%axis, elapsed_ms = elapsed.as_millis() as u64, speed, "round trips timed");
        if !speed.is_finite() || speed <= 0.0 {
            return Err(HandlerError::UnusableSpeed { axis, speed });
        }
        Ok(speed)
    }

    /// Starts an unconfirmed move and polls until the axis is within
    /// tolerance of `target`.
    async fn drive_to(&mut self, axis: Axis, target: f64) -> Result<(), HandlerError> {
        self.driver
            .start_move(axis, target)
            .await
            .map_err(HandlerError::stage("move"))?;

        let move_timeout = self.calibration.move_timeout;
        let poll = self.calibration.poll_interval;
        let axis_state = *self.state.axis(axis);
        let driver = &mut self.driver;
        let arrival = async {
            loop {
                let position = driver
                    .position(axis)
                    .await
                    .map_err(HandlerError::stage("position read"))?;
                if axis_state.within_tolerance(target, position) {
                    return Ok::<f64, HandlerError>(position);
                }
                sleep(poll).await;
            }
        };
        let position = timeout(move_timeout, arrival)
            .await
            .map_err(|_| HandlerError::Calibration {
                axis,
                target,
                timeout: move_timeout,
            })??;
        self.state.axis_mut(axis).position = position;
        Ok(())
    }
}
