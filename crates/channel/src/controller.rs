use std::time::Duration;

use shared::protocol::{ChannelRole, CommandDescriptor, Payload};

use crate::{ChannelLayout, HandoffMode, Result};

const STALE_ON_NEW_COMMAND: [ChannelRole; 4] = [
    ChannelRole::Ack,
    ChannelRole::AckCut,
    ChannelRole::Warning,
    ChannelRole::Error,
];

/// Consumer side of the channel: owns reading and deleting the trigger and
/// writing every outcome file.
#[derive(Debug, Clone)]
pub struct ControllerChannel {
    layout: ChannelLayout,
    mode: HandoffMode,
}

impl ControllerChannel {
    pub fn new(layout: ChannelLayout, mode: HandoffMode) -> Self {
        Self { layout, mode }
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    /// Creates the directory and an empty staging file for the host. An
    /// existing staging file or a pending trigger is left as it is, so a
    /// command published before the controller started is still taken.
    pub fn prepare(&self) -> Result<()> {
        self.layout.ensure_dir()?;
        if self.layout.exists(ChannelRole::Command)? || self.layout.exists(ChannelRole::Trigger)? {
            return Ok(());
        }
        self.layout.write_plain(ChannelRole::Command, "")
    }

    /// True exactly when a published command is waiting.
    pub fn poll(&self) -> Result<bool> {
        self.layout.exists(ChannelRole::Trigger)
    }

    /// Reads the pending descriptor, deletes the trigger and recreates an
    /// empty staging file, in that order, before anything acts on it.
    pub fn take_command(&self) -> Result<Option<CommandDescriptor>> {
        let source = match self.mode {
            HandoffMode::Rename => ChannelRole::Trigger,
            HandoffMode::Marker => ChannelRole::Command,
        };
        let Some(text) = self.layout.read(source)? else {
            return Ok(None);
        };
        self.layout.remove(ChannelRole::Trigger)?;
        self.layout.write_plain(ChannelRole::Command, "")?;
        Ok(Some(CommandDescriptor::parse(&text)))
    }

    /// Removes acknowledge, warning and error flags left by the previous
    /// command so the host cannot misread them for the new one.
    pub fn clear_stale_outcomes(&self) -> Result<()> {
        self.layout.remove_all(&STALE_ON_NEW_COMMAND)
    }

    pub fn write_return(&self, payload: &Payload) -> Result<()> {
        self.layout.write_atomic(ChannelRole::Return, &payload.render())
    }

    pub fn acknowledge(&self) -> Result<()> {
        self.layout.write_atomic(ChannelRole::Ack, "")
    }

    pub fn acknowledge_cut(&self, elapsed: Duration) -> Result<()> {
        self.layout
            .write_atomic(ChannelRole::AckCut, &format!("{:.1}", elapsed.as_secs_f64()))
    }

    pub fn warn(&self, message: &str) -> Result<()> {
        self.layout.write_atomic(ChannelRole::Warning, message)
    }

    pub fn fail(&self, message: &str) -> Result<()> {
        self.layout.write_atomic(ChannelRole::Error, message)
    }
}
