//! The position tracker. Decodes quadrature pulses into an absolute pulse
//! count, honors the zero-index line, and persists the count to the
//! position file. Runs on its own thread; any I/O failure is fatal to the
//! whole daemon.

use crate::config::Config;
use crate::error::DomeError;
use crate::port::ParallelPort;
use crate::state::DomeState;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Given the previous and current status byte, returns the signed pulse to
/// apply, or `None` if no rising edge on channel A occurred. Only the A
/// rising edge is decoded — a single-edge quadrature decoder, sufficient
/// for the mechanical resolution this dome needs.
pub fn decode_pulse(prev_status: u8, status: u8, bit_a: u8, bit_b: u8, inv_direction: bool) -> Option<i64> {
    let a_rose = (status & bit_a != 0) && (prev_status & bit_a == 0);
    if !a_rose {
        return None;
    }
    let base = if status & bit_b != 0 { 1 } else { -1 };
    Some(if inv_direction { -base } else { base })
}

pub fn zero_index_asserted(status: u8, zero_bit: u8) -> bool {
    status & zero_bit == 0
}

/// Persistent mirror of `currentPos`, opened for the daemon's lifetime.
pub struct PositionStore {
    file: std::fs::File,
    last_written: i64,
}

impl PositionStore {
    /// Opens (creating if absent) the position file and returns the store
    /// plus the initial position to seed `DomeState` with. An empty or
    /// malformed file initializes to `zero_angle * pulses_per_degree` and
    /// logs an error.
    pub fn open(path: &Path, config: &Config) -> Result<(Self, i64), DomeError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let zero_pos =
            (config.encoder.zero_angle * config.encoder.pulses_per_degree).round() as i64;
        let initial = if contents.trim().is_empty() {
            log::error!(
                "empty positioning file {}; current position defined as zero angle ({})",
                path.display(),
                config.encoder.zero_angle
            );
            zero_pos
        } else {
            match contents.trim().parse::<i64>() {
                Ok(value) => value,
                Err(_) => {
                    log::error!(
                        "invalid positioning file {}; current position defined as zero angle ({})",
                        path.display(),
                        config.encoder.zero_angle
                    );
                    zero_pos
                }
            }
        };
        let mut store = PositionStore {
            file,
            last_written: initial,
        };
        store.write(initial)?;
        Ok((store, initial))
    }

    pub fn write(&mut self, value: i64) -> Result<(), DomeError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        write!(self.file, "{value}")?;
        self.file.flush()?;
        self.last_written = value;
        Ok(())
    }

    pub fn last_written(&self) -> i64 {
        self.last_written
    }
}

/// Runs the tracker loop until the port returns an I/O error, at which
/// point the most recent position is flushed and the error is returned so
/// the caller can treat it as fatal.
pub fn run_tracker(
    port: &dyn ParallelPort,
    state: &Arc<DomeState>,
    mut store: PositionStore,
) -> Result<(), DomeError> {
    let config = state.config();
    port.write_control(12)?;
    let mut prev_status = port.read_status()?;

    let result = (|| -> Result<(), DomeError> {
        let mut last_activity = Instant::now() - config.timing.active_time() * 2;
        loop {
            let config = state.config();
            let status = port.read_status()?;

            if let Some(sign) = decode_pulse(
                prev_status,
                status,
                config.port.bit_a,
                config.port.bit_b,
                config.encoder.inv_direction,
            ) {
                state.add_pulse(sign);
                last_activity = Instant::now();
            }

            if zero_index_asserted(status, config.port.zero_bit) && state.is_calibrating() {
                state.set_calibrating(false);
            }

            prev_status = status;

            if last_activity.elapsed() < config.timing.active_time() {
                std::thread::sleep(config.timing.sleep_time_act());
            } else {
                let current = state.current_pos();
                if store.last_written() != current {
                    store.write(current)?;
                }
                std::thread::sleep(config.timing.sleep_time_pas());
            }
        }
    })();

    if let Err(err) = &result {
        let _ = store.write(state.current_pos());
        log::error!("error in reading port, tracker thread closed: {err}");
    }
    result
}

pub fn spawn_tracker(
    port: Arc<dyn ParallelPort>,
    state: Arc<DomeState>,
    store: PositionStore,
) -> std::thread::JoinHandle<Result<(), DomeError>> {
    std::thread::Builder::new()
        .name("koepelx-tracker".to_string())
        .spawn(move || run_tracker(port.as_ref(), &state, store))
        .expect("failed to spawn tracker thread")
}
