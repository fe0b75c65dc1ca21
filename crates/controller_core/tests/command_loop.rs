use std::time::Duration;

use channel::{ChannelLayout, ControllerChannel, HandoffMode, HostChannel};
use controller_core::{Controller, ControllerConfig};
use shared::protocol::{Command, MoveMode, MoveTarget, Reply, Response};
use stage_driver::{SimulatedStage, SimulationProfile, StageFaults};
use tokio::time::{sleep, timeout};

async fn send(host: &HostChannel, command: Command) -> Response {
    host.publish(&command.to_descriptor()).expect("publish");
    timeout(Duration::from_secs(60), async {
        loop {
            if let Some(response) = host.poll_reply(command.completion()).expect("poll") {
                return response;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("reply before timeout")
}

async fn session(mode: HandoffMode, faults: StageFaults) {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ChannelLayout::new(dir.path(), "ssd");
    let stage = SimulatedStage::new(SimulationProfile::default()).with_faults(faults);
    let mut controller = Controller::new(
        ControllerChannel::new(layout.clone(), mode),
        Box::new(stage),
        &ControllerConfig::default(),
    );
    let loop_task = tokio::spawn(async move { controller.run().await });
    let host = HostChannel::new(layout, mode);

    let handshake = send(&host, Command::Handshake).await;
    assert_eq!(
        handshake.returned().and_then(|payload| payload.first_line()),
        Some("OK")
    );

    let moved = send(
        &host,
        Command::SetPosition {
            target: MoveTarget::XY { x: 20.0, y: 30.0 },
            mode: MoveMode::Confirmed,
        },
    )
    .await;
    assert_eq!(moved.reply, Reply::Ack { returned: None });

    let cut = send(&host, Command::FullCut).await;
    assert!(matches!(cut.reply, Reply::AckCut { elapsed_secs: Some(_) }));

    let stopped = send(&host, Command::Stop).await;
    assert_eq!(
        stopped.returned().and_then(|payload| payload.first_line()),
        Some("STOPPED")
    );
    loop_task
        .await
        .expect("controller task")
        .expect("controller loop");
}

#[tokio::test(start_paused = true)]
async fn rename_handoff_session_runs_to_stop() {
    session(HandoffMode::Rename, StageFaults::default()).await;
}

#[tokio::test(start_paused = true)]
async fn marker_handoff_session_runs_to_stop() {
    session(HandoffMode::Marker, StageFaults::default()).await;
}

#[tokio::test(start_paused = true)]
async fn failed_move_does_not_block_the_next_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ChannelLayout::new(dir.path(), "ssd");
    let stage = SimulatedStage::new(SimulationProfile::default()).with_faults(StageFaults {
        offset_y: 0.5,
        ..StageFaults::default()
    });
    let mut controller = Controller::new(
        ControllerChannel::new(layout.clone(), HandoffMode::Rename),
        Box::new(stage.clone()),
        &ControllerConfig::default(),
    );
    let loop_task = tokio::spawn(async move { controller.run().await });
    let host = HostChannel::new(layout, HandoffMode::Rename);

    let failed = send(
        &host,
        Command::SetPosition {
            target: MoveTarget::Y(10.0),
            mode: MoveMode::Confirmed,
        },
    )
    .await;
    assert!(!failed.is_success());

    stage.set_faults(StageFaults::default());
    let recovered = send(
        &host,
        Command::SetPosition {
            target: MoveTarget::Y(12.0),
            mode: MoveMode::Confirmed,
        },
    )
    .await;
    assert!(recovered.is_success(), "{recovered:?}");
    assert_eq!(recovered.warning, None);

    send(&host, Command::Stop).await;
    loop_task
        .await
        .expect("controller task")
        .expect("controller loop");
}
