//! End-to-end scenarios driven against `StubPort`/`StubTelescopeLink`,
//! wiring the real tracker, dispatcher and command server together the way
//! `main.rs` does. Timings are scaled down from the literal scenario values
//! so the suite runs in milliseconds rather than the real `checkInterval`/
//! `moveTimeout` durations; the relationships they exercise are unchanged.

use koepelx::config::Config;
use koepelx::motion::{spawn_dispatcher, MotionController};
use koepelx::port::{ParallelPort, StubPort};
use koepelx::position::{spawn_tracker, PositionStore};
use koepelx::protocol::Response;
use koepelx::server::Server;
use koepelx::state::DomeState;
use koepelx::telescope_link::StubTelescopeLink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const BIT_A: u8 = 0x10;
const BIT_B: u8 = 0x20;

fn fast_config() -> Config {
    let mut config = Config::default();
    config.encoder.pulses_per_degree = 1.0;
    config.encoder.dome_opening_angle = 10.0;
    config.timing.pulse_time = 0.001;
    config.timing.active_time = 5.0;
    config.timing.sleep_time_act = 0.0002;
    config.timing.sleep_time_pas = 0.002;
    config.timing.check_interval = 0.001;
    config.timing.track_interval = 0.01;
    config.timing.move_timeout = 1.0;
    config.timing.calibrate_timeout = 1.0;
    config.timing.check_next_action = 0.001;
    config
}

fn position_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("koepelx-e2e");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{name}-{:?}.pos", std::thread::current().id()))
}

fn positive_pulses(n: usize) -> Vec<u8> {
    let mut v = vec![0x00];
    for _ in 0..n {
        v.push(BIT_A | BIT_B);
        v.push(0x00);
    }
    v
}

fn negative_pulses(n: usize) -> Vec<u8> {
    let mut v = vec![0x00];
    for _ in 0..n {
        v.push(BIT_A);
        v.push(0x00);
    }
    v
}

struct Stack {
    state: Arc<DomeState>,
    server: Arc<Server>,
    port: Arc<StubPort>,
}

fn build_stack(name: &str, mut config: Config, initial_pos: i64, statuses: Vec<u8>, telescope_az: f64) -> Stack {
    let path = position_file(name);
    std::fs::write(&path, initial_pos.to_string()).unwrap();
    config.server.current_pos_file = path.to_string_lossy().to_string();
    let (store, initial) = PositionStore::open(&path, &config).unwrap();

    let port = Arc::new(StubPort::new(statuses));
    let port_dyn: Arc<dyn ParallelPort> = port.clone();
    let telescope = Arc::new(StubTelescopeLink::new(telescope_az));
    let state = DomeState::new(config, initial);
    let motion = Arc::new(MotionController::new(port_dyn.clone(), state.clone(), telescope));

    spawn_tracker(port_dyn, state.clone(), store);
    spawn_dispatcher(motion.clone());

    let server = Server::new(state.clone(), motion, path);
    Stack { state, server, port }
}

#[test]
fn e1_goto_absolute_reaches_target() {
    let stack = build_stack("e1", fast_config(), 0, positive_pulses(90), 0.0);

    let response = stack.server.handle_request("GOTO 90");
    assert_eq!(response, Response::new(1, "Moving dome to 90."));

    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(stack.state.current_pos(), 90);
    assert!(!stack.state.is_busy());
}

#[test]
fn e2_goto_relative_moves_left() {
    let stack = build_stack("e2", fast_config(), 90, negative_pulses(5), 0.0);

    let response = stack.server.handle_request("GOTO -5");
    assert_eq!(response, Response::new(1, "Moving dome to 85."));

    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(stack.state.current_pos(), 85);
    assert!(!stack.state.is_busy());
}

#[test]
fn e3_position_reports_wrapped_degrees() {
    // Uses the literal scenario's own pulsesPerDegree=100, since this
    // query needs no motion and no scaled timing.
    let stack = build_stack("e3", Config::default(), 18000, vec![0xFF], 0.0);

    let response = stack.server.handle_request("POSITION");
    assert_eq!(response, Response::new(180, "The current position is 180"));
}

#[test]
fn e4_stop_interrupts_a_goto_and_a_concurrent_goto_is_rejected() {
    // No pulses at all: the dome never arrives on its own, so it is still
    // busy when the second client's GOTO and then STOP arrive.
    let stack = build_stack("e4", fast_config(), 0, vec![0x00], 0.0);

    let first = stack.server.handle_request("GOTO 50");
    assert_eq!(first, Response::new(1, "Moving dome to 50."));

    std::thread::sleep(Duration::from_millis(50));
    assert!(stack.state.is_busy());

    let second = stack.server.handle_request("GOTO 0");
    assert_eq!(second, Response::new(0, "Dome is busy"));

    let third = stack.server.handle_request("STOP");
    assert_eq!(third, Response::new(1, "Movement cleared."));

    std::thread::sleep(Duration::from_millis(20));
    assert!(!stack.state.is_busy());
}

#[test]
fn e5_calibrate_forces_zero_on_zero_index() {
    let stack = build_stack("e5", fast_config(), 9000, vec![0xFF], 0.0);

    let response = stack.server.handle_request("CALIBRATE");
    assert_eq!(response, Response::new(1, "Calibrating dome."));

    // Give the dispatcher time to engage the motor and raise `calibrating`
    // before the zero-index line asserts.
    std::thread::sleep(Duration::from_millis(50));
    stack.port.push_status(0x00); // zero_bit (0x40) clear: asserted

    std::thread::sleep(Duration::from_millis(100));

    assert!(!stack.state.is_calibrating());
    assert_eq!(stack.state.current_pos(), 0);
    assert!(!stack.state.is_busy());
}

#[test]
fn e6_track_holds_still_once_aligned_within_the_hysteresis_band() {
    // slitCenterTarget = (180 + 200) mod 360 = 20; placing currentPos at
    // 200 makes dif = wrap(20 - 200, 360) = 180, dead center of the band,
    // so tracking must not issue a single relay pulse.
    let mut config = fast_config();
    config.encoder.dome_opening_angle = 10.0;
    let stack = build_stack("e6-aligned", config, 200, vec![0xFF], 200.0);

    let response = stack.server.handle_request("TRACK");
    assert_eq!(response, Response::new(1, "Tracking telescope."));

    std::thread::sleep(Duration::from_millis(50));

    assert!(stack.port.data_writes().is_empty());
    assert!(stack.state.is_busy());

    let stop = stack.server.handle_request("STOP");
    assert_eq!(stop, Response::new(1, "Movement cleared."));
}

#[test]
fn e6_track_engages_and_settles_when_misaligned() {
    // dif starts at wrap(20 - 150, 360) = 230, past startRight (185), so
    // tracking engages; 55 pulses carry currentPos from 150 to 205, where
    // dif = 175 drops strictly below stopRight (180 - 0.45*10 = 175.5 ->
    // 176) and the dome re-enters the deadband.
    let mut config = fast_config();
    config.encoder.dome_opening_angle = 10.0;
    let stack = build_stack("e6-misaligned", config, 150, positive_pulses(55), 200.0);

    let response = stack.server.handle_request("TRACK");
    assert_eq!(response, Response::new(1, "Tracking telescope."));

    std::thread::sleep(Duration::from_millis(300));

    assert_eq!(stack.state.current_pos(), 205);
    assert!(!stack.port.data_writes().is_empty());

    let stop = stack.server.handle_request("STOP");
    assert_eq!(stop, Response::new(1, "Movement cleared."));
}
