use shared::protocol::{ChannelRole, CommandDescriptor, Completion, Payload, Reply, Response};

use crate::{ChannelLayout, HandoffMode, Result};

/// Producer side of the channel: owns publishing the descriptor and reading
/// and clearing the outcome files.
///
/// The channel holds a single slot. Publishing while a command is still
/// pending overwrites it, so callers must serialise their exchanges.
#[derive(Debug, Clone)]
pub struct HostChannel {
    layout: ChannelLayout,
    mode: HandoffMode,
}

impl HostChannel {
    pub fn new(layout: ChannelLayout, mode: HandoffMode) -> Self {
        Self { layout, mode }
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    /// Clears the previous command's outcome files, then publishes
    /// `descriptor` in one step visible to the controller.
    pub fn publish(&self, descriptor: &CommandDescriptor) -> Result<()> {
        self.layout.remove_all(&ChannelRole::OUTCOMES)?;
        let text = descriptor.render();
        match self.mode {
            HandoffMode::Rename => self.layout.write_atomic_as(
                ChannelRole::Command,
                ChannelRole::Trigger,
                &text,
            ),
            HandoffMode::Marker => {
                self.layout.write_plain(ChannelRole::Command, &text)?;
                self.layout.write_plain(ChannelRole::Trigger, "")
            }
        }
    }

    /// True while the controller has not yet picked the command up.
    pub fn is_pending(&self) -> Result<bool> {
        self.layout.exists(ChannelRole::Trigger)
    }

    /// Withdraws a command that was never picked up. Returns whether a
    /// pending command was removed.
    pub fn withdraw(&self) -> Result<bool> {
        self.layout.remove(ChannelRole::Trigger)
    }

    /// Looks for the files that finish a command. An Error file wins over
    /// the expected completion file.
    pub fn poll_reply(&self, completion: Completion) -> Result<Option<Response>> {
        if let Some(message) = self.layout.read(ChannelRole::Error)? {
            return Ok(Some(Response {
                reply: Reply::Error {
                    message: message.trim().to_string(),
                    returned: self.read_return()?,
                },
                warning: self.read_warning()?,
            }));
        }

        let reply = match completion {
            Completion::Ack => {
                if !self.layout.exists(ChannelRole::Ack)? {
                    return Ok(None);
                }
                Reply::Ack {
                    returned: self.read_return()?,
                }
            }
            Completion::AckCut => {
                let Some(raw) = self.layout.read(ChannelRole::AckCut)? else {
                    return Ok(None);
                };
                Reply::AckCut {
                    elapsed_secs: raw.trim().parse::<f64>().ok(),
                }
            }
            Completion::Return => {
                let Some(payload) = self.read_return()? else {
                    return Ok(None);
                };
                Reply::Return(payload)
            }
        };

        Ok(Some(Response {
            reply,
            warning: self.read_warning()?,
        }))
    }

    fn read_return(&self) -> Result<Option<Payload>> {
        Ok(self
            .layout
            .read(ChannelRole::Return)?
            .map(|raw| Payload::parse(&raw)))
    }

    fn read_warning(&self) -> Result<Option<String>> {
        Ok(self
            .layout
            .read(ChannelRole::Warning)?
            .map(|raw| raw.trim().to_string()))
    }
}
