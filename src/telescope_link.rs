//! The telescope capability consumed by tracking: a plain blocking
//! `TcpStream` with read/write timeouts, reconnected on every poll rather
//! than held open across failures.

use crate::config::TelescopeSettings;
use crate::error::DomeError;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

pub trait TelescopeLink: Send + Sync {
    fn connect(&self) -> Result<(), DomeError>;
    fn current_azimuth_degrees(&self) -> Result<f64, DomeError>;
}

/// Speaks a minimal line protocol: write `AZIMUTH\n`, read one line back
/// and parse it as a float degree value. The wire format of the real
/// service isn't externally fixed; this choice is recorded in DESIGN.md.
pub struct TcpTelescopeLink {
    settings: TelescopeSettings,
}

impl TcpTelescopeLink {
    pub fn new(settings: TelescopeSettings) -> Self {
        Self { settings }
    }

    fn open(&self) -> Result<TcpStream, DomeError> {
        let timeout = Duration::from_millis(self.settings.timeout_millis);
        let addr = self
            .settings
            .address
            .parse()
            .map_err(|e| DomeError::TelescopeUnavailable(format!("bad address: {e}")))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| DomeError::TelescopeUnavailable(e.to_string()))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| DomeError::TelescopeUnavailable(e.to_string()))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| DomeError::TelescopeUnavailable(e.to_string()))?;
        Ok(stream)
    }
}

impl TelescopeLink for TcpTelescopeLink {
    fn connect(&self) -> Result<(), DomeError> {
        self.open().map(|_| ())
    }

    fn current_azimuth_degrees(&self) -> Result<f64, DomeError> {
        let mut stream = self.open()?;
        stream
            .write_all(b"AZIMUTH\n")
            .map_err(|e| DomeError::TelescopeUnavailable(e.to_string()))?;
        let mut line = String::new();
        BufReader::new(&stream)
            .read_line(&mut line)
            .map_err(|e| DomeError::TelescopeUnavailable(e.to_string()))?;
        line.trim()
            .parse::<f64>()
            .map_err(|e| DomeError::TelescopeUnavailable(format!("bad azimuth reply: {e}")))
    }
}

/// Test double: returns a scripted azimuth (or a connection failure) so
/// tracking can be exercised without a real service.
pub struct StubTelescopeLink {
    state: Mutex<StubState>,
}

struct StubState {
    azimuth: f64,
    connected: bool,
}

impl StubTelescopeLink {
    pub fn new(azimuth: f64) -> Self {
        Self {
            state: Mutex::new(StubState {
                azimuth,
                connected: true,
            }),
        }
    }

    pub fn set_azimuth(&self, azimuth: f64) {
        self.state.lock().unwrap().azimuth = azimuth;
    }

    pub fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }
}

impl TelescopeLink for StubTelescopeLink {
    fn connect(&self) -> Result<(), DomeError> {
        if self.state.lock().unwrap().connected {
            Ok(())
        } else {
            Err(DomeError::TelescopeUnavailable("stub disconnected".into()))
        }
    }

    fn current_azimuth_degrees(&self) -> Result<f64, DomeError> {
        let state = self.state.lock().unwrap();
        if state.connected {
            Ok(state.azimuth)
        } else {
            Err(DomeError::TelescopeUnavailable("stub disconnected".into()))
        }
    }
}
