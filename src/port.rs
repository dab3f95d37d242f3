//! The parallel port abstraction.
//!
//! `read_status`/`write_data` must not block for more than a few
//! microseconds — the tracker calls `read_status` in a tight loop while
//! active. `write_control` is called once at startup to put the data
//! register into output mode.

use crate::config::PortSettings;
use crate::error::DomeError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

pub trait ParallelPort: Send + Sync {
    fn read_status(&self) -> Result<u8, DomeError>;
    fn write_data(&self, value: u8) -> Result<(), DomeError>;
    fn write_control(&self, value: u8) -> Result<(), DomeError>;
}

/// Real hardware access via the Linux `/dev/port` device file, seeking to
/// the configured register offsets before each access.
pub struct LinuxParallelPort {
    file: Mutex<File>,
    settings: PortSettings,
}

impl LinuxParallelPort {
    pub fn open(device_path: &str, settings: PortSettings) -> Result<Self, DomeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)?;
        Ok(Self {
            file: Mutex::new(file),
            settings,
        })
    }

    fn read_byte(&self, offset: u64) -> Result<u8, DomeError> {
        let mut file = self.file.lock().expect("port mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 1];
        file.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn write_byte(&self, offset: u64, value: u8) -> Result<(), DomeError> {
        let mut file = self.file.lock().expect("port mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&[value])?;
        Ok(())
    }
}

impl ParallelPort for LinuxParallelPort {
    fn read_status(&self) -> Result<u8, DomeError> {
        self.read_byte(self.settings.status_reg)
    }

    fn write_data(&self, value: u8) -> Result<(), DomeError> {
        self.write_byte(self.settings.data_reg, value)
    }

    fn write_control(&self, value: u8) -> Result<(), DomeError> {
        self.write_byte(self.settings.ctrl_reg, value)
    }
}

/// Test double: plays back a recorded status-byte stream and records every
/// byte written to the data register so tests can assert on the motor
/// commands a motion issued.
pub struct StubPort {
    status_stream: Mutex<StubState>,
}

struct StubState {
    statuses: Vec<u8>,
    cursor: usize,
    last_status: u8,
    data_writes: Vec<u8>,
    control_writes: Vec<u8>,
}

impl StubPort {
    pub fn new(statuses: Vec<u8>) -> Self {
        let last_status = statuses.first().copied().unwrap_or(0xFF);
        Self {
            status_stream: Mutex::new(StubState {
                statuses,
                cursor: 0,
                last_status,
                data_writes: Vec::new(),
                control_writes: Vec::new(),
            }),
        }
    }

    pub fn data_writes(&self) -> Vec<u8> {
        self.status_stream.lock().unwrap().data_writes.clone()
    }

    pub fn control_writes(&self) -> Vec<u8> {
        self.status_stream.lock().unwrap().control_writes.clone()
    }

    /// Appends a status byte that will be returned on a future read. Lets a
    /// test drive the tracker from another thread while a motion is
    /// observing pulses.
    pub fn push_status(&self, status: u8) {
        self.status_stream.lock().unwrap().statuses.push(status);
    }
}

impl ParallelPort for StubPort {
    fn read_status(&self) -> Result<u8, DomeError> {
        let mut state = self.status_stream.lock().unwrap();
        if state.cursor < state.statuses.len() {
            let value = state.statuses[state.cursor];
            state.cursor += 1;
            state.last_status = value;
            Ok(value)
        } else {
            Ok(state.last_status)
        }
    }

    fn write_data(&self, value: u8) -> Result<(), DomeError> {
        self.status_stream.lock().unwrap().data_writes.push(value);
        Ok(())
    }

    fn write_control(&self, value: u8) -> Result<(), DomeError> {
        self.status_stream
            .lock()
            .unwrap()
            .control_writes
            .push(value);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stub_plays_back_recorded_statuses_then_holds_last() {
        let stub = StubPort::new(vec![0x00, 0x10, 0x30]);
        assert_eq!(stub.read_status().unwrap(), 0x00);
        assert_eq!(stub.read_status().unwrap(), 0x10);
        assert_eq!(stub.read_status().unwrap(), 0x30);
        assert_eq!(stub.read_status().unwrap(), 0x30);
    }

    #[test]
    fn stub_records_data_writes() {
        let stub = StubPort::new(vec![0x00]);
        stub.write_data(0x01).unwrap();
        stub.write_data(0x00).unwrap();
        assert_eq!(stub.data_writes(), vec![0x01, 0x00]);
    }
}
