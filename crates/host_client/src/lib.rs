//! Host side of the microtome link. [`MicrotomeClient`] performs one
//! command exchange at a time over the channel directory; [`Microtome`]
//! builds the stage operations of the imaging application on top of it.

use std::time::Duration;

use channel::HostChannel;
use shared::protocol::{Command, Response};
use tokio::{
    sync::Mutex,
    time::{sleep, timeout},
};
use tracing::{debug, warn};

mod error;
mod session;

pub use error::ClientError;
pub use session::{AxisCounters, Microtome, MicrotomeSettings, MoveStatistics};

pub type Result<T> = std::result::Result<T, ClientError>;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct MicrotomeClient {
    channel: Mutex<HostChannel>,
    poll_interval: Duration,
}

impl MicrotomeClient {
    pub fn new(channel: HostChannel) -> Self {
        Self {
            channel: Mutex::new(channel),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Publishes `command` and waits up to `wait` for its completion file.
    ///
    /// Exchanges are serialised: a second caller waits until the first one
    /// has its reply. On timeout a command the controller never picked up is
    /// withdrawn so it cannot run later.
    ///
    /// A command the controller already took keeps running after a timeout,
    /// and its outcome files can land after the next publish and be read as
    /// that command's reply. Do not issue another command until the
    /// controller is known to be idle again, for example after a handshake
    /// with a generous wait succeeds.
    pub async fn send_command(&self, command: Command, wait: Duration) -> Result<Response> {
        let channel = self.channel.lock().await;
        let name = command.wire_name();
        channel.publish(&command.to_descriptor())?;
        debug!(command = name, "command published");

        let completion = command.completion();
        let poll_interval = self.poll_interval;
        let exchange = async {
            loop {
                if let Some(response) = channel.poll_reply(completion)? {
                    return Ok::<Response, ClientError>(response);
                }
                sleep(poll_interval).await;
            }
        };

        match timeout(wait, exchange).await {
            Ok(result) => {
                let response = result?;
                if let Some(warning) = &response.warning {
                    warn!(command = name, %warning, "controller reported a warning");
                }
                Ok(response)
            }
            Err(_) => {
                if channel.withdraw()? {
                    warn!(command = name, "withdrew command the controller never picked up");
                }
                Err(ClientError::Timeout {
                    command: name,
                    waited: wait,
                })
            }
        }
    }

    /// Ends the controller session.
    pub async fn stop(&self, wait: Duration) -> Result<Response> {
        self.send_command(Command::Stop, wait).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
