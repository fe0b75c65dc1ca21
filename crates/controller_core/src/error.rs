use std::time::Duration;

use channel::ChannelError;
use shared::{domain::Axis, protocol::Payload};
use stage_driver::KnifeArmState;
use thiserror::Error;

/// Why a handler stopped. The message becomes the Error file content.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("{operation} failed: {source}")]
    Stage {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("{report}")]
    OutOfTolerance { report: String, last_known: Payload },
    #[error("knife did not report {expected:?} within {timeout:?}")]
    KnifeTimeout {
        expected: KnifeArmState,
        timeout: Duration,
    },
    #[error("cut cycle failed: {summary}")]
    CutCycle { summary: String },
    #[error("motor speed measurement aborted: {axis} did not reach {target:.3} within {timeout:?}")]
    Calibration {
        axis: Axis,
        target: f64,
        timeout: Duration,
    },
    #[error("motor speed measurement aborted: {axis} measured an unusable speed of {speed}")]
    UnusableSpeed { axis: Axis, speed: f64 },
    #[error("rejected motor speeds x={x}, y={y}; speeds must be positive")]
    InvalidSpeed { x: f64, y: f64 },
}

impl HandlerError {
    pub(crate) fn stage(operation: &'static str) -> impl FnOnce(anyhow::Error) -> HandlerError {
        move |source| HandlerError::Stage { operation, source }
    }

    /// Payload that must reach the Return file before the Error file.
    pub fn last_known(&self) -> Option<&Payload> {
        match self {
            HandlerError::OutOfTolerance { last_known, .. } => Some(last_known),
            _ => None,
        }
    }
}
