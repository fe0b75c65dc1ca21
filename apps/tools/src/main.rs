use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use channel::{ChannelLayout, HandoffMode, HostChannel};
use clap::{Parser, Subcommand, ValueEnum};
use host_client::MicrotomeClient;
use shared::protocol::{AxisSet, Command, MoveMode, MoveTarget};
use tracing_subscriber::EnvFilter;

/// Sends one command to the stage controller and prints the reply as JSON.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "./microtome")]
    channel_dir: PathBuf,
    #[arg(long, default_value = "ssd_msg")]
    stem: String,
    #[arg(long, value_enum, default_value_t = Handoff::Rename)]
    handoff: Handoff,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    #[command(subcommand)]
    op: Op,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Handoff {
    Rename,
    Marker,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Axes {
    X,
    Y,
    Z,
    Xy,
}

#[derive(Subcommand, Debug)]
enum Op {
    Handshake,
    GetPosition {
        #[arg(value_enum)]
        axes: Axes,
    },
    /// Moves X and Y together when both are given.
    Move {
        #[arg(long, allow_negative_numbers = true)]
        x: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        y: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        z: Option<f64>,
        /// Read the position back and fail when it is out of tolerance.
        #[arg(long)]
        confirm: bool,
    },
    Cut,
    Retract,
    Near,
    Clear,
    FullCut,
    ApproachCut,
    SetSpeed {
        speed_x: f64,
        speed_y: f64,
    },
    MeasureSpeed,
    Stop,
}

fn build_command(op: &Op) -> Result<Command> {
    let command = match *op {
        Op::Handshake => Command::Handshake,
        Op::GetPosition { axes } => Command::GetPosition {
            axes: match axes {
                Axes::X => AxisSet::X,
                Axes::Y => AxisSet::Y,
                Axes::Z => AxisSet::Z,
                Axes::Xy => AxisSet::XY,
            },
        },
        Op::Move { x, y, z, confirm } => {
            let target = match (x, y, z) {
                (Some(x), Some(y), None) => MoveTarget::XY { x, y },
                (Some(x), None, None) => MoveTarget::X(x),
                (None, Some(y), None) => MoveTarget::Y(y),
                (None, None, Some(z)) => MoveTarget::Z(z),
                _ => bail!("give --x, --y, --x with --y, or --z on its own"),
            };
            let mode = if confirm {
                MoveMode::Confirmed
            } else {
                MoveMode::Unconfirmed
            };
            Command::SetPosition { target, mode }
        }
        Op::Cut => Command::Cut,
        Op::Retract => Command::Retract,
        Op::Near => Command::Near,
        Op::Clear => Command::Clear,
        Op::FullCut => Command::FullCut,
        Op::ApproachCut => Command::FullApproachCut,
        Op::SetSpeed { speed_x, speed_y } => Command::SetMotorSpeedXY { speed_x, speed_y },
        Op::MeasureSpeed => Command::MeasureMotorSpeedXY,
        Op::Stop => Command::Stop,
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command = build_command(&cli.op)?;
    let mode = match cli.handoff {
        Handoff::Rename => HandoffMode::Rename,
        Handoff::Marker => HandoffMode::Marker,
    };
    let client = MicrotomeClient::new(HostChannel::new(
        ChannelLayout::new(&cli.channel_dir, &cli.stem),
        mode,
    ));

    let response = client
        .send_command(command, Duration::from_secs(cli.timeout_secs))
        .await
        .with_context(|| format!("{} did not complete", command.wire_name()))?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let Some(message) = response.error_message() {
        bail!("controller reported an error: {message}");
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
