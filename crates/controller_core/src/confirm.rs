use std::time::Duration;

use shared::{
    domain::Axis,
    protocol::{MoveTarget, Payload},
};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{Controller, HandlerError};

impl Controller {
    /// Moves to `target` and reads the position back. Lateral moves get one
    /// more read-back after a Warning; Z fails on the first miss.
    pub(crate) async fn move_confirmed(&mut self, target: MoveTarget) -> Result<(), HandlerError> {
        let targets = target.targets();

        let mut expected = Duration::ZERO;
        for &(axis, goal) in &targets {
            let current = self.read_position(axis).await?;
            expected = expected.max(self.state.axis(axis).travel_time(current, goal));
        }

        self.start_moves(target).await?;

        let lateral = targets.iter().all(|(axis, _)| axis.is_lateral());
        let settle = if lateral {
            expected + self.timings.xy_move_margin
        } else {
            self.timings.z_settle
        };
        debug!(expected_ms = expected.as_millis() as u64, "waiting for move to finish");
        sleep(settle).await;

        let actual = self.read_back(&targets).await?;
        let Some(report) = self.misses(&targets, &actual) else {
            return Ok(());
        };

        if !lateral {
            return Err(HandlerError::OutOfTolerance {
                report,
                last_known: Payload::positions(&actual),
            });
        }

        warn!(%report, "move outside tolerance, checking again");
        self.channel.warn(&report)?;
        sleep(self.timings.xy_retry_delay).await;

        let actual = self.read_back(&targets).await?;
        match self.misses(&targets, &actual) {
            None => Ok(()),
            Some(report) => Err(HandlerError::OutOfTolerance {
                report,
                last_known: Payload::positions(&actual),
            }),
        }
    }

    async fn read_back(&mut self, targets: &[(Axis, f64)]) -> Result<Vec<f64>, HandlerError> {
        let mut actual = Vec::with_capacity(targets.len());
        for &(axis, _) in targets {
            actual.push(self.read_position(axis).await?);
        }
        Ok(actual)
    }

    /// Describes every axis that missed its target, or `None` when all
    /// landed within tolerance.
    fn misses(&self, targets: &[(Axis, f64)], actual: &[f64]) -> Option<String> {
        let missed: Vec<String> = targets
            .iter()
            .zip(actual)
            .filter(|((axis, goal), position)| {
                !self.state.axis(*axis).within_tolerance(*goal, **position)
            })
            .map(|((axis, goal), position)| {
                format!("{axis} did not reach target {goal:.3} (actual {position:.3})")
            })
            .collect();
        (!missed.is_empty()).then(|| missed.join("; "))
    }
}
