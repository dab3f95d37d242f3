//! The motion controller. Owns the busy flag and the exclusive
//! pending-action slot; a single dispatcher thread pops one action at a
//! time and runs it to completion.

use crate::port::ParallelPort;
use crate::state::{DomeState, PendingAction};
use crate::telescope_link::TelescopeLink;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Wraps `value` into `[0, modulus)`.
pub(crate) fn wrap(value: i64, modulus: i64) -> i64 {
    ((value % modulus) + modulus) % modulus
}

pub(crate) fn pulses(degrees: f64, pulses_per_degree: f64) -> i64 {
    (degrees * pulses_per_degree).round() as i64
}

/// The signed-wrapped mismatch, in pulses, used both to pick a short-path
/// direction and, re-evaluated on every tick, to detect arrival.
fn diff_pulses(current_pos: i64, target_pulses: i64, full_circle: i64) -> i64 {
    wrap(current_pos - target_pulses, full_circle)
}

fn short_path_direction(current_pos: i64, target_pulses: i64, pulses_per_degree: f64) -> Direction {
    let full_circle = pulses(360.0, pulses_per_degree);
    let half_circle = pulses(180.0, pulses_per_degree);
    if diff_pulses(current_pos, target_pulses, full_circle) < half_circle {
        Direction::Left
    } else {
        Direction::Right
    }
}

/// Whether a motion moving in `direction` toward `target_pulses` has not
/// yet arrived (i.e. the loop should keep polling).
fn still_moving(current_pos: i64, target_pulses: i64, pulses_per_degree: f64, direction: Direction) -> bool {
    let full_circle = pulses(360.0, pulses_per_degree);
    let half_circle = pulses(180.0, pulses_per_degree);
    let diff = diff_pulses(current_pos, target_pulses, full_circle);
    match direction {
        Direction::Left => diff != 0 && diff < half_circle,
        Direction::Right => diff > half_circle,
    }
}

enum CalibrateExit {
    ZeroReached,
    GlobalTimeout,
    Stalled,
    StoppedExternally,
}

enum GotoExit {
    Arrived,
    Stalled,
    StoppedExternally,
}

/// Tracks whether a motion has made progress within the stall window.
struct StallWatch {
    last_pos: i64,
    last_progress: Instant,
    timeout: Duration,
}

impl StallWatch {
    fn new(current_pos: i64, timeout: Duration) -> Self {
        Self {
            last_pos: current_pos,
            last_progress: Instant::now(),
            timeout,
        }
    }

    /// Returns `true` if `timeout` has elapsed with no change in position.
    fn poll(&mut self, current_pos: i64) -> bool {
        if current_pos != self.last_pos {
            self.last_pos = current_pos;
            self.last_progress = Instant::now();
            false
        } else {
            self.last_progress.elapsed() >= self.timeout
        }
    }
}

pub struct MotionController {
    port: Arc<dyn ParallelPort>,
    state: Arc<DomeState>,
    telescope: Arc<dyn TelescopeLink>,
}

impl MotionController {
    pub fn new(
        port: Arc<dyn ParallelPort>,
        state: Arc<DomeState>,
        telescope: Arc<dyn TelescopeLink>,
    ) -> Self {
        Self {
            port,
            state,
            telescope,
        }
    }

    /// Admission entry points for GOTO / CALIBRATE / TRACK: reject with
    /// `false` if the dome is busy or an action is already pending.
    pub fn request_goto(&self, target_degrees: f64) -> bool {
        self.state
            .try_admit(PendingAction::Goto { target_degrees })
    }

    pub fn request_calibrate(&self) -> bool {
        self.state.try_admit(PendingAction::Calibrate)
    }

    pub fn request_track(&self) -> bool {
        self.state.try_admit(PendingAction::Track)
    }

    pub fn state(&self) -> &DomeState {
        &self.state
    }

    /// LEFT / RIGHT bypass the pending-action admission pipeline entirely
    /// (admission is scoped to goto/calibrate/track only) and relay
    /// straight through the same busy gate `set_left`/`set_right` use for
    /// a dispatched goto.
    pub fn command_left(&self) -> bool {
        self.set_left(false)
    }

    pub fn command_right(&self) -> bool {
        self.set_right(false)
    }

    /// STOP is unconditional: it is the only command allowed to interrupt
    /// a running motion, by flipping busy false so every motion loop exits
    /// on its next tick.
    pub fn stop(&self) {
        self.clear_move(false);
    }

    fn relay_pulse(&self, bit: u8) {
        let config = self.state.config();
        let _ = self.port.write_data(bit);
        std::thread::sleep(config.timing.pulse_time());
        let _ = self.port.write_data(0);
    }

    /// Refuses to start if busy already, unless `is_tracking` — tracking's
    /// own sub-motions must preempt the busy flag they themselves raised.
    fn set_left(&self, is_tracking: bool) -> bool {
        if !self.state.try_set_busy(is_tracking) {
            return false;
        }
        log::info!("moving dome to left");
        self.relay_pulse(self.state.config().port.left_bit);
        true
    }

    fn set_right(&self, is_tracking: bool) -> bool {
        if !self.state.try_set_busy(is_tracking) {
            return false;
        }
        log::info!("moving dome to right");
        self.relay_pulse(self.state.config().port.right_bit);
        true
    }

    fn engage(&self, direction: Direction, is_tracking: bool) -> bool {
        match direction {
            Direction::Left => self.set_left(is_tracking),
            Direction::Right => self.set_right(is_tracking),
        }
    }

    /// `keep_busy_state` preserves busy across an intra-segment stop, so
    /// tracking's per-leg stops don't end the overall tracking session.
    fn clear_move(&self, keep_busy_state: bool) {
        log::info!("stop movement of dome");
        let clear_bit = self.state.config().port.clear_bit;
        self.relay_pulse(clear_bit);
        if !keep_busy_state {
            self.state.set_busy(false);
        }
    }

    /// Runs one dispatched action to completion. Called by the dispatcher
    /// loop once per popped `PendingAction`.
    pub fn run_action(&self, action: PendingAction) {
        match action {
            PendingAction::Goto { target_degrees } => self.run_goto(target_degrees),
            PendingAction::Calibrate => self.run_calibrate(),
            PendingAction::Track => self.run_track(),
        }
    }

    fn run_goto(&self, target_degrees: f64) {
        let config = self.state.config();
        let ppd = config.encoder.pulses_per_degree;
        let target = pulses(target_degrees, ppd);
        let current = self.state.current_pos();
        log::info!(
            "moving from degree {} to {}",
            current as f64 / ppd,
            target_degrees
        );
        let direction = short_path_direction(current, target, ppd);
        if !self.engage(direction, false) {
            log::error!("goto could not engage motor: dome reported busy");
            return;
        }

        let mut stall = StallWatch::new(self.state.current_pos(), config.timing.move_timeout());
        let exit = loop {
            if !self.state.is_busy() {
                break GotoExit::StoppedExternally;
            }
            let current = self.state.current_pos();
            if !still_moving(current, target, ppd, direction) {
                break GotoExit::Arrived;
            }
            if stall.poll(current) {
                break GotoExit::Stalled;
            }
            std::thread::sleep(config.timing.check_interval());
        };

        match exit {
            GotoExit::Arrived => {
                self.clear_move(false);
                log::info!("dome arrived at {}", target_degrees);
            }
            GotoExit::Stalled => {
                log::error!("timeout occurred in moving dome");
                self.clear_move(false);
            }
            GotoExit::StoppedExternally => {
                log::info!("movement cleared before goto completed");
            }
        }
    }

    fn run_calibrate(&self) {
        let config = self.state.config();
        let ppd = config.encoder.pulses_per_degree;
        let zero_target = pulses(config.encoder.zero_angle, ppd);
        log::info!("calibrating zero-point of dome");
        let direction = short_path_direction(self.state.current_pos(), zero_target, ppd);
        if !self.engage(direction, false) {
            log::error!("calibrate could not engage motor: dome reported busy");
            return;
        }
        self.state.set_calibrating(true);

        let deadline = Instant::now() + config.timing.calibrate_timeout();
        let mut stall = StallWatch::new(self.state.current_pos(), config.timing.move_timeout());
        let exit = loop {
            if !self.state.is_busy() {
                break CalibrateExit::StoppedExternally;
            }
            if !self.state.is_calibrating() {
                break CalibrateExit::ZeroReached;
            }
            if Instant::now() >= deadline {
                break CalibrateExit::GlobalTimeout;
            }
            if stall.poll(self.state.current_pos()) {
                break CalibrateExit::Stalled;
            }
            std::thread::sleep(config.timing.check_interval());
        };

        match exit {
            CalibrateExit::ZeroReached => {
                self.clear_move(false);
                self.state.set_current_pos(zero_target);
                log::info!("finished calibration");
            }
            CalibrateExit::GlobalTimeout => {
                log::error!("timeout in calibrating dome");
                self.clear_move(false);
            }
            CalibrateExit::Stalled => {
                log::error!("timeout occurred in moving dome");
                self.state.set_busy(false);
            }
            CalibrateExit::StoppedExternally => {
                log::info!("movement cleared before zero point was reached");
            }
        }
        self.state.set_calibrating(false);
    }

    fn run_track(&self) {
        log::info!("tracking telescope");
        self.state.set_busy(true);
        if let Err(err) = self.telescope.connect() {
            log::error!("cannot connect to telescope: {err}");
            self.state.set_busy(false);
            return;
        }

        let mut moving: Option<Direction> = None;
        let mut stall: Option<StallWatch> = None;

        while self.state.is_busy() {
            let config = self.state.config();
            let ppd = config.encoder.pulses_per_degree;
            let opening = config.encoder.dome_opening_angle;

            let azimuth = match self.telescope.current_azimuth_degrees() {
                Ok(value) => value,
                Err(err) => {
                    log::error!("connection to telescope lost: {err}");
                    self.state.set_busy(false);
                    break;
                }
            };

            let full_circle = pulses(360.0, ppd);
            let slit_center_target = pulses(180.0 + azimuth, ppd);
            let dif = wrap(slit_center_target - self.state.current_pos(), full_circle);

            let start_left = pulses(180.0 - 0.5 * opening, ppd);
            let start_right = pulses(180.0 + 0.5 * opening, ppd);
            let stop_left = pulses(180.0 - 0.55 * opening, ppd);
            let stop_right = pulses(180.0 - 0.45 * opening, ppd);

            if dif < start_left && moving.is_none() {
                self.clear_move(true);
                if self.set_left(true) {
                    moving = Some(Direction::Left);
                    stall = Some(StallWatch::new(
                        self.state.current_pos(),
                        config.timing.move_timeout(),
                    ));
                }
            } else if dif > start_right && moving.is_none() {
                self.clear_move(true);
                if self.set_right(true) {
                    moving = Some(Direction::Right);
                    stall = Some(StallWatch::new(
                        self.state.current_pos(),
                        config.timing.move_timeout(),
                    ));
                }
            }

            if let Some(direction) = moving {
                if let Some(watch) = stall.as_mut() {
                    if watch.poll(self.state.current_pos()) {
                        log::error!("timeout occurred in moving dome");
                        self.state.set_busy(false);
                        break;
                    }
                }
                let arrived = match direction {
                    Direction::Left => dif > stop_left,
                    Direction::Right => dif < stop_right,
                };
                if arrived {
                    log::info!("dome followed telescope");
                    self.clear_move(true);
                    moving = None;
                    stall = None;
                }
            }

            std::thread::sleep(if moving.is_some() {
                config.timing.check_interval()
            } else {
                config.timing.track_interval()
            });
        }
    }
}

/// The dispatcher: idle-loops at `checkNextAction`, and when the pending
/// slot holds an action, runs it to completion before looking again.
pub fn run_dispatcher(controller: &MotionController) -> ! {
    loop {
        if let Some(action) = controller.state().take_pending() {
            controller.run_action(action);
        }
        let interval = controller.state().config().timing.check_next_action();
        std::thread::sleep(interval);
    }
}

pub fn spawn_dispatcher(controller: Arc<MotionController>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("koepelx-dispatcher".to_string())
        .spawn(move || run_dispatcher(&controller))
        .expect("failed to spawn dispatcher thread")
}

#[cfg(test)]
mod test {
    use super::*;

    const PPD: f64 = 100.0;

    #[test]
    fn short_path_from_350_to_10_is_right() {
        let current = pulses(350.0, PPD);
        let target = pulses(10.0, PPD);
        assert_eq!(short_path_direction(current, target, PPD), Direction::Right);
    }

    #[test]
    fn short_path_from_10_to_350_is_left() {
        let current = pulses(10.0, PPD);
        let target = pulses(350.0, PPD);
        assert_eq!(short_path_direction(current, target, PPD), Direction::Left);
    }

    #[test]
    fn still_moving_flips_at_arrival() {
        let target = pulses(90.0, PPD);
        assert!(still_moving(pulses(0.0, PPD), target, PPD, Direction::Right));
        assert!(!still_moving(
            pulses(90.0, PPD),
            target,
            PPD,
            Direction::Right
        ));
    }

    #[test]
    fn still_moving_flips_at_arrival_going_left() {
        let target = pulses(85.0, PPD);
        assert!(still_moving(pulses(90.0, PPD), target, PPD, Direction::Left));
        assert!(!still_moving(
            pulses(85.0, PPD),
            target,
            PPD,
            Direction::Left
        ));
    }

    #[test]
    fn stall_watch_fires_after_timeout_with_no_progress() {
        let mut watch = StallWatch::new(100, Duration::from_millis(10));
        assert!(!watch.poll(100));
        std::thread::sleep(Duration::from_millis(15));
        assert!(watch.poll(100));
    }

    #[test]
    fn stall_watch_resets_on_progress() {
        let mut watch = StallWatch::new(100, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(15));
        assert!(!watch.poll(101));
        assert!(!watch.poll(101));
    }

    #[test]
    fn wrap_handles_negative_values() {
        assert_eq!(wrap(-5, 360), 355);
        assert_eq!(wrap(365, 360), 5);
        assert_eq!(wrap(0, 360), 0);
    }
}
