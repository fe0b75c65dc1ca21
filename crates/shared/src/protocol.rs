use serde::{Deserialize, Serialize};

use crate::{domain::Axis, error::ProtocolError};

/// Return payload written by the controller in answer to `Handshake`.
pub const HANDSHAKE_REPLY: &str = "OK";
/// Final Return payload written before the controller loop exits.
pub const STOP_REPLY: &str = "STOPPED";

/// One file of the shared-directory channel. Existence is the signal; the
/// roles that carry content hold plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    /// Staging file the host writes the descriptor into.
    Command,
    /// Canonical file whose appearance publishes a command.
    Trigger,
    Return,
    Ack,
    AckCut,
    Warning,
    Error,
}

impl ChannelRole {
    /// Files the controller produces and the host clears between commands.
    pub const OUTCOMES: [ChannelRole; 5] = [
        ChannelRole::Return,
        ChannelRole::Ack,
        ChannelRole::AckCut,
        ChannelRole::Warning,
        ChannelRole::Error,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ChannelRole::Command => "in",
            ChannelRole::Trigger => "cmd",
            ChannelRole::Return => "out",
            ChannelRole::Ack => "ack",
            ChannelRole::AckCut => "ac2",
            ChannelRole::Warning => "wng",
            ChannelRole::Error => "err",
        }
    }
}

/// Raw command as it travels through the channel: a name and up to two
/// numeric parameters, one per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub param1: Option<f64>,
    pub param2: Option<f64>,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param1: None,
            param2: None,
        }
    }

    pub fn with_params(name: impl Into<String>, param1: f64, param2: Option<f64>) -> Self {
        Self {
            name: name.into(),
            param1: Some(param1),
            param2,
        }
    }

    /// Lenient parse: the name is trimmed, parameters that are missing or
    /// not finite numbers are dropped.
    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines();
        let name = lines.next().unwrap_or_default().trim().to_string();
        let mut param = || {
            lines
                .next()
                .and_then(|line| line.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite())
        };
        let param1 = param();
        let param2 = param();
        Self {
            name,
            param1,
            param2,
        }
    }

    pub fn param1_or_zero(&self) -> f64 {
        self.param1.unwrap_or(0.0)
    }

    pub fn param2_or_zero(&self) -> f64 {
        self.param2.unwrap_or(0.0)
    }

    pub fn render(&self) -> String {
        let mut out = self.name.clone();
        match (self.param1, self.param2) {
            (Some(p1), Some(p2)) => out.push_str(&format!("\n{p1}\n{p2}")),
            (None, Some(p2)) => out.push_str(&format!("\n0\n{p2}")),
            (Some(p1), None) => out.push_str(&format!("\n{p1}")),
            (None, None) => {}
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSet {
    X,
    Y,
    Z,
    XY,
}

impl AxisSet {
    pub fn axes(self) -> &'static [Axis] {
        match self {
            AxisSet::X => &[Axis::X],
            AxisSet::Y => &[Axis::Y],
            AxisSet::Z => &[Axis::Z],
            AxisSet::XY => &[Axis::X, Axis::Y],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveTarget {
    X(f64),
    Y(f64),
    Z(f64),
    XY { x: f64, y: f64 },
}

impl MoveTarget {
    pub fn axis_set(&self) -> AxisSet {
        match self {
            MoveTarget::X(_) => AxisSet::X,
            MoveTarget::Y(_) => AxisSet::Y,
            MoveTarget::Z(_) => AxisSet::Z,
            MoveTarget::XY { .. } => AxisSet::XY,
        }
    }

    pub fn targets(&self) -> Vec<(Axis, f64)> {
        match *self {
            MoveTarget::X(x) => vec![(Axis::X, x)],
            MoveTarget::Y(y) => vec![(Axis::Y, y)],
            MoveTarget::Z(z) => vec![(Axis::Z, z)],
            MoveTarget::XY { x, y } => vec![(Axis::X, x), (Axis::Y, y)],
        }
    }
}

/// Whether a move is read back and checked against tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveMode {
    Unconfirmed,
    Confirmed,
}

/// The file that completes a command when nothing goes wrong. An Error
/// file completes every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Ack,
    AckCut,
    Return,
}

impl Completion {
    pub fn role(self) -> ChannelRole {
        match self {
            Completion::Ack => ChannelRole::Ack,
            Completion::AckCut => ChannelRole::AckCut,
            Completion::Return => ChannelRole::Return,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    Handshake,
    Cut,
    Retract,
    Clear,
    Near,
    FullCut,
    FullApproachCut,
    GetPosition {
        axes: AxisSet,
    },
    SetPosition {
        target: MoveTarget,
        mode: MoveMode,
    },
    SetMotorSpeedXY {
        speed_x: f64,
        speed_y: f64,
    },
    MeasureMotorSpeedXY,
    Stop,
}

impl Command {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Command::Handshake => "Handshake",
            Command::Cut => "MicrotomeStage_Cut",
            Command::Retract => "MicrotomeStage_Retract",
            Command::Clear => "MicrotomeStage_Clear",
            Command::Near => "MicrotomeStage_Near",
            Command::FullCut => "MicrotomeStage_FullCut",
            Command::FullApproachCut => "MicrotomeStage_FullApproachCut",
            Command::GetPosition { axes } => match axes {
                AxisSet::X => "MicrotomeStage_GetPositionX",
                AxisSet::Y => "MicrotomeStage_GetPositionY",
                AxisSet::Z => "MicrotomeStage_GetPositionZ",
                AxisSet::XY => "MicrotomeStage_GetPositionXY",
            },
            Command::SetPosition { target, mode } => match (target.axis_set(), mode) {
                (AxisSet::X, MoveMode::Unconfirmed) => "MicrotomeStage_SetPositionX",
                (AxisSet::X, MoveMode::Confirmed) => "MicrotomeStage_SetPositionX_Confirm",
                (AxisSet::Y, MoveMode::Unconfirmed) => "MicrotomeStage_SetPositionY",
                (AxisSet::Y, MoveMode::Confirmed) => "MicrotomeStage_SetPositionY_Confirm",
                (AxisSet::Z, MoveMode::Unconfirmed) => "MicrotomeStage_SetPositionZ",
                (AxisSet::Z, MoveMode::Confirmed) => "MicrotomeStage_SetPositionZ_Confirm",
                (AxisSet::XY, MoveMode::Unconfirmed) => "MicrotomeStage_SetPositionXY",
                (AxisSet::XY, MoveMode::Confirmed) => "MicrotomeStage_SetPositionXY_Confirm",
            },
            Command::SetMotorSpeedXY { .. } => "SetMotorSpeedXY",
            Command::MeasureMotorSpeedXY => "MeasureMotorSpeedXY",
            Command::Stop => "StopScript",
        }
    }

    pub fn to_descriptor(&self) -> CommandDescriptor {
        let name = self.wire_name();
        match *self {
            Command::SetPosition { target, .. } => match target {
                MoveTarget::X(v) | MoveTarget::Y(v) | MoveTarget::Z(v) => {
                    CommandDescriptor::with_params(name, v, None)
                }
                MoveTarget::XY { x, y } => CommandDescriptor::with_params(name, x, Some(y)),
            },
            Command::SetMotorSpeedXY { speed_x, speed_y } => {
                CommandDescriptor::with_params(name, speed_x, Some(speed_y))
            }
            _ => CommandDescriptor::new(name),
        }
    }

    /// Maps a descriptor onto the dispatch table. Only the exact wire names
    /// are recognised; `None` means the command must be ignored.
    pub fn from_descriptor(descriptor: &CommandDescriptor) -> Option<Self> {
        use MoveMode::{Confirmed, Unconfirmed};

        let p1 = descriptor.param1_or_zero();
        let p2 = descriptor.param2_or_zero();
        let set = |target, mode| Some(Command::SetPosition { target, mode });

        match descriptor.name.trim() {
            "Handshake" => Some(Command::Handshake),
            "MicrotomeStage_Cut" => Some(Command::Cut),
            "MicrotomeStage_Retract" => Some(Command::Retract),
            "MicrotomeStage_Clear" => Some(Command::Clear),
            "MicrotomeStage_Near" => Some(Command::Near),
            "MicrotomeStage_FullCut" => Some(Command::FullCut),
            "MicrotomeStage_FullApproachCut" => Some(Command::FullApproachCut),
            "MicrotomeStage_GetPositionX" => Some(Command::GetPosition { axes: AxisSet::X }),
            "MicrotomeStage_GetPositionY" => Some(Command::GetPosition { axes: AxisSet::Y }),
            "MicrotomeStage_GetPositionZ" => Some(Command::GetPosition { axes: AxisSet::Z }),
            "MicrotomeStage_GetPositionXY" => Some(Command::GetPosition { axes: AxisSet::XY }),
            "MicrotomeStage_SetPositionX" => set(MoveTarget::X(p1), Unconfirmed),
            "MicrotomeStage_SetPositionY" => set(MoveTarget::Y(p1), Unconfirmed),
            "MicrotomeStage_SetPositionZ" => set(MoveTarget::Z(p1), Unconfirmed),
            "MicrotomeStage_SetPositionXY" => set(MoveTarget::XY { x: p1, y: p2 }, Unconfirmed),
            "MicrotomeStage_SetPositionX_Confirm" => set(MoveTarget::X(p1), Confirmed),
            "MicrotomeStage_SetPositionY_Confirm" => set(MoveTarget::Y(p1), Confirmed),
            "MicrotomeStage_SetPositionZ_Confirm" => set(MoveTarget::Z(p1), Confirmed),
            "MicrotomeStage_SetPositionXY_Confirm" => {
                set(MoveTarget::XY { x: p1, y: p2 }, Confirmed)
            }
            "SetMotorSpeedXY" => Some(Command::SetMotorSpeedXY {
                speed_x: p1,
                speed_y: p2,
            }),
            "MeasureMotorSpeedXY" => Some(Command::MeasureMotorSpeedXY),
            "StopScript" => Some(Command::Stop),
            _ => None,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::from_descriptor(&CommandDescriptor::parse(text))
    }

    pub fn completion(&self) -> Completion {
        match self {
            Command::Handshake | Command::GetPosition { .. } | Command::Stop => Completion::Return,
            Command::FullCut => Completion::AckCut,
            _ => Completion::Ack,
        }
    }
}

/// Text content of a Return file: one value per line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Payload {
    lines: Vec<String>,
}

impl Payload {
    pub fn text(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
        }
    }

    /// Positions are reported with three decimals (nanometre resolution).
    pub fn positions(values: &[f64]) -> Self {
        Self {
            lines: values.iter().map(|v| format!("{v:.3}")).collect(),
        }
    }

    pub fn speeds(values: &[f64]) -> Self {
        Self {
            lines: values.iter().map(|v| format!("{v:.1}")).collect(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            lines: raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    pub fn values(&self) -> Result<Vec<f64>, ProtocolError> {
        self.lines
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                raw.parse::<f64>().map_err(|_| ProtocolError::NotANumber {
                    line: index + 1,
                    raw: raw.clone(),
                })
            })
            .collect()
    }

    pub fn exact_values<const N: usize>(&self) -> Result<[f64; N], ProtocolError> {
        let values = self.values()?;
        let actual = values.len();
        values
            .try_into()
            .map_err(|_| ProtocolError::ValueCount {
                expected: N,
                actual,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Reply {
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        returned: Option<Payload>,
    },
    AckCut {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_secs: Option<f64>,
    },
    Return(Payload),
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        returned: Option<Payload>,
    },
}

/// What the host observed for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub reply: Reply,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        !matches!(self.reply, Reply::Error { .. })
    }

    pub fn returned(&self) -> Option<&Payload> {
        match &self.reply {
            Reply::Ack { returned } | Reply::Error { returned, .. } => returned.as_ref(),
            Reply::Return(payload) => Some(payload),
            Reply::AckCut { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.reply {
            Reply::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
