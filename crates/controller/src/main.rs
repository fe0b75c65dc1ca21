use std::path::PathBuf;

use anyhow::Context;
use channel::ControllerChannel;
use clap::Parser;
use controller_core::Controller;
use stage_driver::SimulatedStage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

/// Stage controller: answers host commands from the shared channel
/// directory until it receives StopScript.
#[derive(Debug, Parser)]
#[command(name = "microtome-controller")]
struct Args {
    /// Settings file; defaults to ./controller.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    channel_dir: Option<PathBuf>,
    #[arg(long)]
    stem: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(dir) = args.channel_dir {
        settings.channel_dir = dir;
    }
    if let Some(stem) = args.stem {
        settings.channel_stem = stem;
    }

    let layout = settings.layout();
    let stage = SimulatedStage::new(settings.simulation_profile());
    let mut controller = Controller::new(
        ControllerChannel::new(layout, settings.handoff),
        Box::new(stage),
        &settings.controller_config(),
    );
    info!(
        dir = %settings.channel_dir.display(),
        stem = %settings.channel_stem,
        handoff = ?settings.handoff,
        "controller starting with simulated stage"
    );

    tokio::select! {
        result = controller.run() => {
            result.context("command channel failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            warn!("interrupted, leaving command loop");
        }
    }
    Ok(())
}
