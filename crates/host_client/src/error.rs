use std::time::Duration;

use channel::ChannelError;
use shared::error::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{command} got no reply within {waited:?}")]
    Timeout {
        command: &'static str,
        waited: Duration,
    },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Z move from {from:.3} to {to:.3} exceeds the safe step of {limit:.3}")]
    ZMoveTooLarge { from: f64, to: f64, limit: f64 },
    #[error("sweep distance {distance_nm} nm is outside {min_nm}-{max_nm} nm")]
    SweepDistanceOutOfRange {
        distance_nm: f64,
        min_nm: f64,
        max_nm: f64,
    },
    #[error("{command} failed on the controller: {message}")]
    Rejected {
        command: &'static str,
        message: String,
    },
    #[error("{command} reported unusable motor speeds x={speed_x}, y={speed_y}")]
    UnusableSpeed {
        command: &'static str,
        speed_x: f64,
        speed_y: f64,
    },
    #[error("unexpected reply to {command}: {source}")]
    Malformed {
        command: &'static str,
        #[source]
        source: ProtocolError,
    },
}
