//! Controller behaviour against a recording transport.

use omxyz_stage::axis::{AxisFamily, AxisId};
use omxyz_stage::controller::{FaultAck, StageController, NO_FAULT_TEXT};
use omxyz_stage::profile::{StageProfile, TomographyProfile, TwoAxisProfile, UniversalProfile};
use omxyz_stage::settings::{PluginSettings, SoftLimitEntry};
use omxyz_stage::status::{AxisFilter, AxisFlags, StatusMask};
use omxyz_stage::transport::mock::{MockConnector, TransportEvent};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const STEP: f64 = 0.00254;

fn options(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn start(
    profile: &dyn StageProfile,
    values: &[&str],
    settings: &PluginSettings,
) -> (StageController, MockConnector) {
    let connector = MockConnector::new();
    let config = profile.parse(&options(values)).unwrap();
    let controller = StageController::initialize(config, &connector, settings).unwrap();
    (controller, connector)
}

fn fast_settings() -> PluginSettings {
    PluginSettings {
        settle_margin_ms: 0,
        ..PluginSettings::default()
    }
}

#[test]
fn universal_move_is_encoded_and_converges() {
    let (controller, connector) = start(
        &UniversalProfile,
        &["5", "9600", "8N1", "0.00254", "0.00254", "missing", "missing", "missing", "missing"],
        &PluginSettings::default(),
    );
    assert_eq!(
        connector.events(),
        vec![TransportEvent::Opened { port: 4, baud: 9600 }]
    );

    controller
        .move_to(AxisFamily::Linear, [0.0254, -0.0127, 7.0])
        .unwrap();
    assert_eq!(connector.lines(4), vec!["1 10 0 5\n"]);

    let status = controller.stage_status();
    assert!(status.axis(AxisId::X).contains(AxisFlags::MOVING));
    assert!(status.axis(AxisId::Y).contains(AxisFlags::MOVING));
    assert_eq!(status.axis(AxisId::Z), AxisFlags::IN_POSITION);

    let position = controller.position(AxisFamily::Linear);
    assert!((position[0] - 0.0254).abs() < STEP);
    assert!((position[1] + 0.0127).abs() < STEP);
    assert_eq!(position[2], 0.0);

    let settled = controller.stage_status();
    for id in AxisId::ALL {
        assert!(!settled.axis(id).contains(AxisFlags::MOVING), "{id}");
    }

    // converged: further queries change nothing
    assert_eq!(controller.position(AxisFamily::Linear), position);
}

#[test]
fn round_to_nearest_takes_the_closer_step() {
    let (controller, connector) = start(
        &UniversalProfile,
        &["1", "9600", "8N1", "0.00254", "missing", "missing", "missing", "missing", "missing"],
        &PluginSettings::default(),
    );
    // 1.77 steps away: the second step lands closer than stopping short
    controller.move_to(AxisFamily::Linear, [0.0045, 0.0, 0.0]).unwrap();
    assert_eq!(connector.lines(0), vec!["1 2\n"]);
    let position = controller.position(AxisFamily::Linear);
    assert!((position[0] - 2.0 * STEP).abs() < 1e-12);

    // 1.3 steps away: one step is closest
    controller
        .move_to(AxisFamily::Linear, [2.0 * STEP + 0.0033, 0.0, 0.0])
        .unwrap();
    assert_eq!(connector.lines(0).last().map(String::as_str), Some("1 1\n"));
    let position = controller.position(AxisFamily::Linear);
    assert!((position[0] - 3.0 * STEP).abs() < 1e-12);
}

#[test]
fn back_to_back_moves_are_relative_to_the_previous_target() {
    let (controller, connector) = start(
        &UniversalProfile,
        &["1", "9600", "8N1", "0.01", "missing", "missing", "missing", "missing", "missing"],
        &PluginSettings::default(),
    );

    // no position query between the moves
    controller.move_to(AxisFamily::Linear, [1.0, 0.0, 0.0]).unwrap();
    controller.move_to(AxisFamily::Linear, [2.0, 0.0, 0.0]).unwrap();
    controller.move_to(AxisFamily::Linear, [1.5, 0.0, 0.0]).unwrap();
    assert_eq!(connector.lines(0), vec!["1 100\n", "1 100\n", "0 50\n"]);

    let position = controller.position(AxisFamily::Linear);
    assert!((position[0] - 1.5).abs() < 1e-9);
}

#[test]
fn rotary_moves_carry_linear_placeholders() {
    let (controller, connector) = start(
        &UniversalProfile,
        &["2", "9600", "8N1", "0.01", "missing", "missing", "1.8", "missing", "0.9"],
        &PluginSettings::default(),
    );
    controller.move_to(AxisFamily::Rotary, [18.0, 9.0, 45.0]).unwrap();
    assert_eq!(connector.lines(1), vec!["0 0 1 10 1 10\n"]);

    let angle = controller.position(AxisFamily::Rotary);
    assert!((angle[0] - 18.0).abs() < 1e-9);
    assert!((angle[1] - 9.0).abs() < 1e-9);
    // packed: only two rotary axes exist
    assert_eq!(angle[2], 0.0);
}

#[test]
fn set_origin_moves_nothing_on_step_dir_firmware() {
    let (controller, connector) = start(
        &UniversalProfile,
        &["1", "9600", "8N1", "0.01", "0.01", "0.01", "missing", "missing", "missing"],
        &PluginSettings::default(),
    );
    controller.set_origin(AxisFamily::Linear, [1.0, 2.0, 3.0]).unwrap();
    assert!(connector.lines(0).is_empty());
    assert_eq!(controller.position(AxisFamily::Linear), [1.0, 2.0, 3.0]);

    controller.move_to(AxisFamily::Linear, [1.1, 2.0, 2.9]).unwrap();
    assert_eq!(connector.lines(0), vec!["1 10 0 0 0 10\n"]);
}

#[test]
fn halt_snaps_demand_to_simulated_position() {
    let (controller, _) = start(
        &UniversalProfile,
        &["1", "9600", "8N1", "0.01", "missing", "missing", "missing", "missing", "missing"],
        &PluginSettings::default(),
    );
    controller.move_to(AxisFamily::Linear, [5.0, 0.0, 0.0]).unwrap();
    controller.halt();
    assert_eq!(controller.position(AxisFamily::Linear), [0.0; 3]);
    assert!(controller
        .stage_status()
        .axis(AxisId::X)
        .contains(AxisFlags::IN_POSITION));
}

#[test]
fn two_axis_floors_and_ignores_halt() {
    let (controller, connector) =
        start(&TwoAxisProfile, &["3", "9600", "8N1"], &PluginSettings::default());

    controller
        .move_to(AxisFamily::Linear, [1.7 * STEP, 0.0254, 9.0])
        .unwrap();
    assert_eq!(connector.lines(2), vec!["1 1 1 10\n"]);

    controller.halt();
    let position = controller.position(AxisFamily::Linear);
    assert!((position[0] - STEP).abs() < 1e-12);
    assert!((position[1] - 0.0254).abs() < 1e-9);
    assert_eq!(position[2], 0.0);

    // rotary requests are accepted and do nothing
    controller.move_to(AxisFamily::Rotary, [90.0, 0.0, 0.0]).unwrap();
    assert_eq!(controller.position(AxisFamily::Rotary), [0.0; 3]);
}

#[test]
fn power_flag_reaches_the_status_word() {
    let (controller, _) = start(&TwoAxisProfile, &["3", "9600", "8N1"], &PluginSettings::default());
    assert!(!controller.stage_status().contains(StatusMask::ALL_XYZ_MOTORS_ON));
    controller.power_on(true).unwrap();
    let status = controller.stage_status();
    assert!(status.contains(StatusMask::ALL_XYZ_MOTORS_ON));
    assert!(status.contains(StatusMask::ALL_XYZ_IN_POSITION));
    assert!(!status.intersects(StatusMask::ANY_XYZ_MOVING));
}

#[test]
fn tomography_setup_and_blocking_move() {
    let (controller, connector) = start(
        &TomographyProfile,
        &["5", "9600", "8N1", "6", "9600", "8N1", "360", "800"],
        &fast_settings(),
    );
    assert_eq!(connector.lines(4), vec!["new\n", "cvel(800)\n"]);
    assert_eq!(connector.control_levels(5), vec![false]);
    connector.clear();

    let begun = Instant::now();
    controller.move_to(AxisFamily::Rotary, [36.0, 0.0, 0.0]).unwrap();
    // 36 degrees at 360 deg/s
    assert!(begun.elapsed() >= Duration::from_millis(100));

    assert_eq!(
        connector.events(),
        vec![
            TransportEvent::Control { port: 5, enabled: true },
            TransportEvent::Line { port: 4, text: "Cmove(80,0)\n".into() },
            TransportEvent::Control { port: 5, enabled: false },
        ]
    );
    assert!((controller.position(AxisFamily::Rotary)[0] - 36.0).abs() < 1e-9);

    controller.move_to(AxisFamily::Linear, [1.0, 1.0, 1.0]).unwrap();
    assert_eq!(connector.lines(4), vec!["Cmove(80,0)\n"]);
}

#[test]
fn tomography_origin_is_sent_as_datum() {
    let (controller, connector) = start(
        &TomographyProfile,
        &["5", "9600", "8N1", "0", "9600", "8N1", "30", "800"],
        &fast_settings(),
    );
    controller.set_origin(AxisFamily::Rotary, [90.0, 0.0, 0.0]).unwrap();
    assert_eq!(connector.lines(4).last().map(String::as_str), Some("datum(0,200)\n"));
    assert_eq!(controller.position(AxisFamily::Rotary)[0], 90.0);
}

#[test]
fn halt_cuts_a_blocking_move_short_and_queries_stay_live() {
    let (controller, connector) = start(
        &TomographyProfile,
        &["5", "9600", "8N1", "6", "9600", "8N1", "360", "800"],
        &fast_settings(),
    );
    let controller = Arc::new(controller);

    let mover = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            let begun = Instant::now();
            // 20 turns at one turn per second
            controller.move_to(AxisFamily::Rotary, [7200.0, 0.0, 0.0]).unwrap();
            begun.elapsed()
        })
    };

    // wait for the motor to be switched on, querying status meanwhile
    let deadline = Instant::now() + Duration::from_secs(5);
    while !connector.control_levels(5).contains(&true) {
        assert!(Instant::now() < deadline, "move never started");
        let _ = controller.axis_status(AxisFilter::All);
        thread::sleep(Duration::from_millis(5));
    }

    // keep halting until the mover observes it
    let elapsed = loop {
        controller.halt();
        if mover.is_finished() {
            break mover.join().unwrap();
        }
        thread::sleep(Duration::from_millis(10));
    };
    assert!(elapsed < Duration::from_secs(10));
    assert_eq!(connector.control_levels(5).last(), Some(&false));

    let snapshot = controller.snapshot();
    let rot1 = snapshot.axis(AxisId::Rot1);
    assert_eq!(rot1.current(), rot1.demand());
}

#[test]
fn open_failures_are_reported() {
    let connector = MockConnector::new().refuse_port(5);
    let config = TomographyProfile
        .parse(&options(&["5", "9600", "8N1", "6", "9600", "8N1", "30", "800"]))
        .unwrap();
    let err =
        StageController::initialize(config, &connector, &PluginSettings::default()).unwrap_err();
    assert!(err.to_string().contains("Failed to open serial port"));
}

#[test]
fn soft_limits_fault_and_clear() {
    let settings = PluginSettings {
        soft_limits: vec![SoftLimitEntry {
            axis: AxisId::X,
            min: -1.0,
            max: 1.0,
        }],
        ..PluginSettings::default()
    };
    let (controller, _) = start(
        &UniversalProfile,
        &["1", "9600", "8N1", "0.5", "missing", "missing", "missing", "missing", "missing"],
        &settings,
    );
    assert_eq!(controller.last_fault_text(), NO_FAULT_TEXT);

    controller.move_to(AxisFamily::Linear, [3.0, 0.0, 0.0]).unwrap();
    controller.position(AxisFamily::Linear);
    let status = controller.axis_status(AxisFilter::Single(AxisId::X));
    assert!(status.axis(AxisId::X).contains(AxisFlags::POSLIM));
    assert_eq!(controller.last_fault_text(), "Soft limit exceeded on x");

    assert_eq!(controller.fault_ack(), FaultAck::Ok);
    assert_eq!(controller.position(AxisFamily::Linear), [1.0, 0.0, 0.0]);
    assert!(!controller
        .stage_status()
        .intersects(StatusMask::ANY_XYZ_LIMIT));
    assert_eq!(controller.last_fault_text(), NO_FAULT_TEXT);
}

#[test]
fn write_failures_surface_from_the_controller() {
    let (controller, connector) =
        start(&TwoAxisProfile, &["1", "9600", "8N1"], &PluginSettings::default());
    connector.fail_writes(true);
    assert!(controller.move_to(AxisFamily::Linear, [1.0, 0.0, 0.0]).is_err());
    // the demand was still recorded
    assert_eq!(controller.snapshot().demands(AxisFamily::Linear)[0], 1.0);
}
