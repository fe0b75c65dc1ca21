use super::*;

#[test]
fn deviation_equal_to_tolerance_is_accepted() {
    let state = AxisState::new(Axis::X, 40.0, 0.04);
    assert!(state.within_tolerance(0.0, 0.04));
    assert!(state.within_tolerance(0.0, -0.04));
}

#[test]
fn deviation_past_tolerance_is_rejected() {
    let state = AxisState::new(Axis::X, 40.0, 0.04);
    assert!(!state.within_tolerance(0.0, 0.041));
    assert!(!state.within_tolerance(50.0, 50.06));
}

#[test]
fn travel_time_uses_distance_over_calibrated_speed() {
    let state = AxisState::new(Axis::X, 40.0, 0.04);
    assert_eq!(state.travel_time(0.0, 50.0), Duration::from_millis(1250));
    assert_eq!(state.travel_time(50.0, 0.0), Duration::from_millis(1250));
}

#[test]
fn travel_time_is_zero_for_unusable_speed() {
    let stalled = AxisState::new(Axis::Y, 0.0, 0.04);
    assert_eq!(stalled.travel_time(0.0, 10.0), Duration::ZERO);
    let nan = AxisState::new(Axis::Y, f64::NAN, 0.04);
    assert_eq!(nan.travel_time(0.0, 10.0), Duration::ZERO);
}

#[test]
fn z_tolerance_is_an_order_of_magnitude_tighter() {
    let tolerances = Tolerances::default();
    assert_eq!(tolerances.for_axis(Axis::X), tolerances.xy);
    assert_eq!(tolerances.for_axis(Axis::Z), tolerances.z);
    assert!((tolerances.xy / tolerances.z - 10.0).abs() < 1e-9);
}

#[test]
fn only_done_and_failed_are_terminal() {
    assert!(CutCycleState::Done.is_terminal());
    assert!(CutCycleState::Failed.is_terminal());
    assert!(!CutCycleState::ClearRetry.is_terminal());
    assert_eq!(CutCycleState::StrokeUp.to_string(), "stroke up");
}
