use std::{fs, time::Duration};

use channel::{ChannelLayout, HandoffMode, HostChannel};
use shared::{
    domain::{Axis, CutCycleState},
    protocol::{
        AxisSet, ChannelRole, Command, CommandDescriptor, MoveMode, MoveTarget, Reply, Response,
    },
};
use stage_driver::{OutputLine, SimulatedStage, SimulationProfile, StageCall, StageFaults};
use tempfile::TempDir;

use super::*;
use crate::config::ControllerConfig;

struct Bench {
    _dir: TempDir,
    host: HostChannel,
    stage: SimulatedStage,
    controller: Controller,
}

impl Bench {
    fn new(profile: SimulationProfile, faults: StageFaults) -> Self {
        Self::configured(profile, faults, &ControllerConfig::default())
    }

    fn configured(
        profile: SimulationProfile,
        faults: StageFaults,
        config: &ControllerConfig,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ChannelLayout::new(dir.path(), "microtome");
        let channel = ControllerChannel::new(layout.clone(), HandoffMode::Rename);
        channel.prepare().expect("prepare");

        let stage = SimulatedStage::new(profile).with_faults(faults);
        let controller = Controller::new(channel, Box::new(stage.clone()), config);
        Self {
            _dir: dir,
            host: HostChannel::new(layout, HandoffMode::Rename),
            stage,
            controller,
        }
    }

    fn with_faults(faults: StageFaults) -> Self {
        Self::new(SimulationProfile::default(), faults)
    }

    fn healthy() -> Self {
        Self::with_faults(StageFaults::default())
    }

    async fn exchange(&mut self, command: Command) -> Response {
        self.host
            .publish(&command.to_descriptor())
            .expect("publish");
        self.controller.step().await;
        self.host
            .poll_reply(command.completion())
            .expect("poll reply")
            .expect("command produced no completion file")
    }

    fn exists(&self, role: ChannelRole) -> bool {
        self.host.layout().path(role).exists()
    }
}

fn confirmed(target: MoveTarget) -> Command {
    Command::SetPosition {
        target,
        mode: MoveMode::Confirmed,
    }
}

fn returned_lines(response: &Response) -> Vec<String> {
    response
        .returned()
        .map(|payload| payload.lines().to_vec())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn handshake_answers_ok_every_time_without_ack() {
    let mut bench = Bench::healthy();
    for _ in 0..2 {
        let response = bench.exchange(Command::Handshake).await;
        assert_eq!(returned_lines(&response), vec!["OK"]);
        assert!(!bench.exists(ChannelRole::Ack));
        assert!(!bench.exists(ChannelRole::Error));
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_command_is_consumed_without_outcome() {
    let mut bench = Bench::healthy();
    bench
        .host
        .publish(&CommandDescriptor::new("MicrotomeStage_Polish"))
        .expect("publish");

    assert_eq!(bench.controller.step().await, LoopControl::Continue);
    assert!(!bench.exists(ChannelRole::Trigger));
    for role in ChannelRole::OUTCOMES {
        assert!(!bench.exists(role), "{role:?} should not exist");
    }
    assert!(bench.stage.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_flags_are_removed_before_the_next_command_runs() {
    let mut bench = Bench::healthy();
    bench
        .host
        .publish(&Command::Handshake.to_descriptor())
        .expect("publish");
    // Left behind by a previous command after the host published.
    fs::write(bench.host.layout().path(ChannelRole::Warning), "old").expect("stale warning");
    fs::write(bench.host.layout().path(ChannelRole::Ack), "").expect("stale ack");

    bench.controller.step().await;
    assert!(!bench.exists(ChannelRole::Warning));
    assert!(!bench.exists(ChannelRole::Ack));
    assert!(bench.exists(ChannelRole::Return));
}

#[tokio::test(start_paused = true)]
async fn get_position_reports_three_decimals() {
    let mut bench = Bench::healthy();
    bench.stage.place(Axis::X, 12.3456);
    bench.stage.place(Axis::Y, -4.0);

    let response = bench
        .exchange(Command::GetPosition { axes: AxisSet::XY })
        .await;
    assert_eq!(returned_lines(&response), vec!["12.346", "-4.000"]);
    assert!(!bench.exists(ChannelRole::Ack));
    assert_eq!(bench.controller.state().x.position, 12.3456);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_move_acks_without_reading_back() {
    let mut bench = Bench::healthy();
    let command = Command::SetPosition {
        target: MoveTarget::XY { x: 10.0, y: 20.0 },
        mode: MoveMode::Unconfirmed,
    };
    let response = bench.exchange(command).await;

    assert_eq!(response.reply, Reply::Ack { returned: None });
    assert_eq!(
        bench.stage.journal(),
        vec![StageCall::Move(Axis::X, 10.0), StageCall::Move(Axis::Y, 20.0)]
    );
    assert_eq!(bench.controller.state().y.position, 20.0);
}

#[tokio::test(start_paused = true)]
async fn confirmed_move_within_tolerance_acks() {
    let mut bench = Bench::healthy();
    let response = bench
        .exchange(confirmed(MoveTarget::XY { x: 50.0, y: 25.0 }))
        .await;
    assert_eq!(response.reply, Reply::Ack { returned: None });
    assert_eq!(response.warning, None);
}

#[tokio::test(start_paused = true)]
async fn deviation_equal_to_tolerance_is_accepted() {
    let mut bench = Bench::with_faults(StageFaults {
        offset_x: 0.04,
        ..StageFaults::default()
    });
    let response = bench.exchange(confirmed(MoveTarget::X(50.0))).await;
    assert!(response.is_success());
    assert_eq!(response.warning, None);
}

#[tokio::test(start_paused = true)]
async fn persistent_xy_miss_warns_then_fails_with_last_position() {
    let mut bench = Bench::with_faults(StageFaults {
        offset_x: 0.06,
        ..StageFaults::default()
    });
    let started = tokio::time::Instant::now();
    let response = bench.exchange(confirmed(MoveTarget::X(50.0))).await;

    let Reply::Error { message, returned } = &response.reply else {
        panic!("expected error, got {response:?}");
    };
    assert_eq!(message, "X did not reach target 50.000 (actual 50.060)");
    assert_eq!(
        returned.as_ref().map(|payload| payload.lines().to_vec()),
        Some(vec!["50.060".to_string()])
    );
    assert!(response.warning.is_some());
    assert!(!bench.exists(ChannelRole::Ack));

    // 1.25 s travel, 0.1 s margin and one 1.5 s retry delay.
    assert!(started.elapsed() <= Duration::from_millis(1250 + 1600 + 1));
}

#[tokio::test(start_paused = true)]
async fn slow_motor_recovers_on_second_read() {
    let mut bench = Bench::healthy();
    // Estimates assume twice the real speed, so the first read comes early.
    let speeds = Command::SetMotorSpeedXY {
        speed_x: 80.0,
        speed_y: 80.0,
    };
    assert!(bench.exchange(speeds).await.is_success());

    let response = bench.exchange(confirmed(MoveTarget::X(50.0))).await;
    assert_eq!(response.reply, Reply::Ack { returned: None });
    let warning = response.warning.expect("slow move warning");
    assert!(warning.starts_with("X did not reach target 50.000"), "{warning}");
}

#[tokio::test(start_paused = true)]
async fn z_miss_fails_immediately_without_warning() {
    let mut bench = Bench::with_faults(StageFaults {
        offset_z: 0.01,
        ..StageFaults::default()
    });
    let response = bench.exchange(confirmed(MoveTarget::Z(1.0))).await;

    assert_eq!(
        response.error_message(),
        Some("Z did not reach target 1.000 (actual 1.010)")
    );
    assert_eq!(response.warning, None);
    assert_eq!(returned_lines(&response), vec!["1.010"]);
}

#[tokio::test(start_paused = true)]
async fn z_within_tolerance_acks() {
    let mut bench = Bench::healthy();
    let response = bench.exchange(confirmed(MoveTarget::Z(0.5))).await;
    assert_eq!(response.reply, Reply::Ack { returned: None });
}

#[tokio::test(start_paused = true)]
async fn near_timeout_is_reported_as_error() {
    let mut bench = Bench::with_faults(StageFaults {
        near_stalls: true,
        ..StageFaults::default()
    });
    let response = bench.exchange(Command::Near).await;
    assert_eq!(
        response.error_message(),
        Some("knife did not report Near within 4s")
    );
}

#[tokio::test(start_paused = true)]
async fn full_cut_runs_every_step_and_reports_elapsed_time() {
    let mut bench = Bench::healthy();
    let response = bench.exchange(Command::FullCut).await;

    let Reply::AckCut {
        elapsed_secs: Some(elapsed),
    } = response.reply
    else {
        panic!("expected AckCut, got {response:?}");
    };
    // Near 1.5 s, settle 0.3 s, cut 2 s, retract 1 s and clear 1.5 s.
    assert!((6.2..=6.6).contains(&elapsed), "elapsed {elapsed}");
    assert_eq!(response.warning, None);
    assert_eq!(
        bench.stage.journal(),
        vec![
            StageCall::Near,
            StageCall::Output(OutputLine::Oscillator, true),
            StageCall::Output(OutputLine::Stroke, true),
            StageCall::Cut,
            StageCall::Output(OutputLine::Stroke, false),
            StageCall::Output(OutputLine::Oscillator, false),
            StageCall::Retract,
            StageCall::Clear,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_near_and_cut_still_retract_and_clear() {
    let mut bench = Bench::with_faults(StageFaults {
        near_stalls: true,
        cut_fails: true,
        ..StageFaults::default()
    });
    let response = bench.exchange(Command::FullCut).await;

    let message = response.error_message().expect("cycle error");
    assert!(message.contains("nearing"), "{message}");
    assert!(message.contains("cutting"), "{message}");
    assert!(!bench.exists(ChannelRole::AckCut));

    let journal = bench.stage.journal();
    let after_cut = journal
        .iter()
        .skip_while(|call| **call != StageCall::Cut)
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(
        after_cut,
        vec![
            StageCall::Cut,
            StageCall::Output(OutputLine::Stroke, false),
            StageCall::Output(OutputLine::Oscillator, false),
            StageCall::Retract,
            StageCall::Clear,
        ]
    );
    assert_eq!(bench.stage.outputs(), (false, false));
}

#[tokio::test(start_paused = true)]
async fn single_clear_timeout_recovers_with_warning() {
    let mut bench = Bench::with_faults(StageFaults {
        clear_stalls: 1,
        ..StageFaults::default()
    });
    let report = bench.controller.run_cut_cycle(CycleKind::Full).await;

    assert!(report.succeeded());
    assert!(report.clear_recovered);
    assert_eq!(
        report.visited(),
        vec![
            CutCycleState::Nearing,
            CutCycleState::StrokeUp,
            CutCycleState::Cutting,
            CutCycleState::StrokeDown,
            CutCycleState::Retracting,
            CutCycleState::Clearing,
            CutCycleState::ClearRetry,
        ]
    );
    let tail = bench.stage.journal().split_off(7);
    assert_eq!(tail, vec![StageCall::Clear, StageCall::Near, StageCall::Clear]);
}

#[tokio::test(start_paused = true)]
async fn recovered_clear_still_sends_ack_cut() {
    let mut bench = Bench::with_faults(StageFaults {
        clear_stalls: 1,
        ..StageFaults::default()
    });
    let response = bench.exchange(Command::FullCut).await;
    assert!(matches!(response.reply, Reply::AckCut { .. }));
    assert!(response.warning.is_some());
}

#[tokio::test(start_paused = true)]
async fn second_clear_timeout_fails_the_cycle() {
    let mut bench = Bench::with_faults(StageFaults {
        clear_stalls: 2,
        ..StageFaults::default()
    });
    let response = bench.exchange(Command::FullCut).await;

    let message = response.error_message().expect("cycle error");
    assert!(message.contains("clear retry"), "{message}");
    assert!(!bench.exists(ChannelRole::AckCut));
}

#[tokio::test(start_paused = true)]
async fn approach_cut_skips_knife_positioning() {
    let mut bench = Bench::healthy();
    let response = bench.exchange(Command::FullApproachCut).await;

    assert_eq!(response.reply, Reply::Ack { returned: None });
    let journal = bench.stage.journal();
    assert!(!journal.contains(&StageCall::Near));
    assert!(!journal.contains(&StageCall::Clear));
    assert!(journal.contains(&StageCall::Retract));
}

#[tokio::test(start_paused = true)]
async fn disabled_oscillation_keeps_oscillator_low() {
    let mut bench = Bench::healthy();
    bench.controller.state.use_oscillation = false;
    let report = bench.controller.run_cut_cycle(CycleKind::Approach).await;

    assert!(report.succeeded());
    assert!(bench
        .stage
        .journal()
        .contains(&StageCall::Output(OutputLine::Oscillator, false)));
    assert!(!bench
        .stage
        .journal()
        .contains(&StageCall::Output(OutputLine::Oscillator, true)));
}

#[tokio::test(start_paused = true)]
async fn calibration_returns_and_stores_measured_speeds() {
    let mut bench = Bench::new(
        SimulationProfile {
            speed_x: 50.0,
            speed_y: 50.0,
            ..SimulationProfile::default()
        },
        StageFaults::default(),
    );
    let response = bench.exchange(Command::MeasureMotorSpeedXY).await;

    assert!(matches!(response.reply, Reply::Ack { returned: Some(_) }));
    let [x, y] = response
        .returned()
        .expect("speeds")
        .exact_values::<2>()
        .expect("two speeds");
    assert!((x - 50.0).abs() < 0.5, "x speed {x}");
    assert!((y - 50.0).abs() < 0.5, "y speed {y}");
    assert!((bench.controller.state().x.calibrated_speed - 50.0).abs() < 0.5);
}

#[tokio::test(start_paused = true)]
async fn stuck_axis_aborts_calibration_and_keeps_speeds() {
    let mut bench = Bench::with_faults(StageFaults {
        stuck_axes: vec![Axis::Y],
        ..StageFaults::default()
    });
    let response = bench.exchange(Command::MeasureMotorSpeedXY).await;

    let message = response.error_message().expect("calibration error");
    assert!(message.starts_with("motor speed measurement aborted: Y"), "{message}");
    assert_eq!(bench.controller.state().x.calibrated_speed, 40.0);
    assert_eq!(bench.controller.state().y.calibrated_speed, 40.0);
}

#[tokio::test(start_paused = true)]
async fn zero_measured_speed_aborts_calibration() {
    let mut config = ControllerConfig::default();
    config.calibration.distance = 0.0;
    let mut bench = Bench::configured(
        SimulationProfile::default(),
        StageFaults::default(),
        &config,
    );
    let response = bench.exchange(Command::MeasureMotorSpeedXY).await;

    let message = response.error_message().expect("calibration error");
    assert!(message.starts_with("motor speed measurement aborted: X"), "{message}");
    assert_eq!(response.returned(), None);
    assert!(!bench.exists(ChannelRole::Ack));
    assert_eq!(bench.controller.state().x.calibrated_speed, 40.0);
    assert_eq!(bench.controller.state().y.calibrated_speed, 40.0);
}

#[tokio::test(start_paused = true)]
async fn failed_channel_write_is_escalated_to_error_file() {
    let mut bench = Bench::healthy();
    bench
        .host
        .publish(&Command::MeasureMotorSpeedXY.to_descriptor())
        .expect("publish");
    // A directory where the Return file belongs makes the rename fail.
    let blocked = bench.host.layout().path(ChannelRole::Return);
    fs::create_dir(&blocked).expect("block return file");

    bench.controller.step().await;

    let error_path = bench.host.layout().path(ChannelRole::Error);
    let message = fs::read_to_string(error_path).expect("error file written");
    assert!(message.contains("microtome.out"), "{message}");
    assert!(!bench.exists(ChannelRole::Ack));
    assert!(blocked.is_dir());
}

#[tokio::test(start_paused = true)]
async fn non_positive_speed_is_rejected() {
    let mut bench = Bench::healthy();
    let response = bench
        .exchange(Command::SetMotorSpeedXY {
            speed_x: 0.0,
            speed_y: 40.0,
        })
        .await;
    assert!(!response.is_success());
    assert_eq!(bench.controller.state().x.calibrated_speed, 40.0);
}

#[tokio::test(start_paused = true)]
async fn position_read_failure_becomes_error_file() {
    let mut bench = Bench::with_faults(StageFaults {
        position_read_fails: true,
        ..StageFaults::default()
    });
    let response = bench
        .exchange(Command::GetPosition { axes: AxisSet::Z })
        .await;
    let message = response.error_message().expect("error");
    assert!(message.starts_with("position read failed"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn stop_replies_and_ends_the_loop() {
    let mut bench = Bench::healthy();
    bench
        .host
        .publish(&Command::Stop.to_descriptor())
        .expect("publish");

    tokio::time::timeout(Duration::from_secs(5), bench.controller.run())
        .await
        .expect("loop ended")
        .expect("channel ok");

    let response = bench
        .host
        .poll_reply(Command::Stop.completion())
        .expect("poll")
        .expect("reply");
    assert_eq!(returned_lines(&response), vec!["STOPPED"]);
}

#[test]
fn motor_speed_divides_travel_by_time() {
    assert_eq!(motor_speed(10, 50.0, Duration::from_secs(20)), 50.0);
    assert_eq!(motor_speed(10, 50.0, Duration::ZERO), 0.0);
}
