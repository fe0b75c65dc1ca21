//! The multi-step cutting sequence. Every step runs even after an earlier
//! one failed, so the knife is always retracted and cleared.

use std::time::Duration;

use serde::Serialize;
use shared::domain::CutCycleState;
use stage_driver::{KnifeArmState, OutputLine};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::{Controller, HandlerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Acquisition cycle, completed through the AckCut file.
    Full,
    /// Same cycle without knife positioning; the operator manages the knife.
    Approach,
}

impl CycleKind {
    pub fn steps(self) -> &'static [CutCycleState] {
        use CutCycleState::*;
        match self {
            CycleKind::Full => &[
                Nearing, StrokeUp, Cutting, StrokeDown, Retracting, Clearing,
            ],
            CycleKind::Approach => &[StrokeUp, Cutting, StrokeDown, Retracting],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub state: CutCycleState,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub steps: Vec<StepRecord>,
    /// `Done` or `Failed`.
    pub outcome: CutCycleState,
    pub elapsed: Duration,
    /// Set when the first clear timed out and the retry brought the knife back.
    pub clear_recovered: bool,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == CutCycleState::Done
    }

    pub fn visited(&self) -> Vec<CutCycleState> {
        self.steps.iter().map(|step| step.state).collect()
    }

    /// One line listing every failed step, used as the Error file content.
    pub fn failure_summary(&self) -> String {
        self.steps
            .iter()
            .filter_map(|step| {
                step.failure
                    .as_ref()
                    .map(|failure| format!("{}: {failure}", step.state))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Controller {
    pub async fn run_cut_cycle(&mut self, kind: CycleKind) -> CycleReport {
        let started = Instant::now();
        let mut steps = Vec::with_capacity(kind.steps().len() + 1);
        let mut clear_recovered = false;

        for &state in kind.steps() {
            debug!(step = %state, "cut cycle step");
            let failure = self.run_step(state).await.err();
            let clear_timed_out = state == CutCycleState::Clearing && failure.is_some();
            if let Some(err) = &failure {
                warn!(step = %state, %err, "cut cycle step failed");
            }
            steps.push(StepRecord {
                state,
                failure: failure.map(|err| err.to_string()),
            });

            if clear_timed_out {
                let retry = self.run_step(CutCycleState::ClearRetry).await.err();
                match &retry {
                    Some(err) => warn!(%err, "knife clear retry failed"),
                    None => {
                        info!("knife cleared on second attempt");
                        clear_recovered = true;
                    }
                }
                steps.push(StepRecord {
                    state: CutCycleState::ClearRetry,
                    failure: retry.map(|err| err.to_string()),
                });
            }
        }

        // A recovered clear supersedes the failed first attempt.
        let failed = steps.iter().any(|step| {
            step.failure.is_some() && !(clear_recovered && step.state == CutCycleState::Clearing)
        });
        let outcome = if failed {
            CutCycleState::Failed
        } else {
            CutCycleState::Done
        };

        let report = CycleReport {
            kind,
            steps,
            outcome,
            elapsed: started.elapsed(),
            clear_recovered,
        };
        info!(
            kind = ?report.kind,
            outcome = %report.outcome,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "cut cycle finished"
        );
        report
    }

    /// Runs a cut cycle and writes its completion file.
    pub(crate) async fn cut_and_report(&mut self, kind: CycleKind) -> Result<(), HandlerError> {
        let report = self.run_cut_cycle(kind).await;
        if report.clear_recovered {
            self.channel
                .warn("knife clear timed out once and succeeded on retry")?;
        }
        if !report.succeeded() {
            return Err(HandlerError::CutCycle {
                summary: report.failure_summary(),
            });
        }
        match kind {
            CycleKind::Full => self.channel.acknowledge_cut(report.elapsed)?,
            CycleKind::Approach => self.channel.acknowledge()?,
        }
        Ok(())
    }

    async fn run_step(&mut self, state: CutCycleState) -> Result<(), HandlerError> {
        match state {
            CutCycleState::Nearing => self.position_knife(KnifeArmState::Near).await,
            CutCycleState::StrokeUp => {
                let oscillate = self.state.use_oscillation;
                self.set_line(OutputLine::Oscillator, oscillate).await?;
                self.set_line(OutputLine::Stroke, true).await?;
                sleep(self.timings.stroke_settle).await;
                Ok(())
            }
            CutCycleState::Cutting => self.driver.cut().await.map_err(HandlerError::stage("cut")),
            CutCycleState::StrokeDown => {
                // Both lines are reset even when the first write fails.
                let stroke = self.set_line(OutputLine::Stroke, false).await;
                let oscillator = self.set_line(OutputLine::Oscillator, false).await;
                stroke.and(oscillator)
            }
            CutCycleState::Retracting => self
                .driver
                .retract()
                .await
                .map_err(HandlerError::stage("retract")),
            CutCycleState::Clearing => self.position_knife(KnifeArmState::Cleared).await,
            CutCycleState::ClearRetry => {
                sleep(self.timings.clear_retry_delay).await;
                if let Err(err) = self.position_knife(KnifeArmState::Near).await {
                    warn!(%err, "knife did not come near before the clear retry");
                }
                self.position_knife(KnifeArmState::Cleared).await
            }
            CutCycleState::Idle | CutCycleState::Done | CutCycleState::Failed => Ok(()),
        }
    }

    async fn set_line(&mut self, line: OutputLine, on: bool) -> Result<(), HandlerError> {
        self.driver
            .set_output(line, on)
            .await
            .map_err(HandlerError::stage("digital output"))
    }
}
