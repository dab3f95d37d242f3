use crate::error::DomeError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Quadrature encoder and mechanical geometry, grouped by concern rather
/// than left as one flat bag of fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderSettings {
    pub pulses_per_degree: f64,
    pub zero_angle: f64,
    pub inv_direction: bool,
    pub dome_opening_angle: f64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            pulses_per_degree: 100.0,
            zero_angle: 0.0,
            inv_direction: false,
            dome_opening_angle: 10.0,
        }
    }
}

/// Register addresses and bit masks for the parallel port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortSettings {
    pub data_reg: u64,
    pub ctrl_reg: u64,
    pub status_reg: u64,
    pub bit_a: u8,
    pub bit_b: u8,
    pub zero_bit: u8,
    pub left_bit: u8,
    pub right_bit: u8,
    pub clear_bit: u8,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            data_reg: 0x378,
            ctrl_reg: 0x37A,
            status_reg: 0x379,
            bit_a: 0x10,
            bit_b: 0x20,
            zero_bit: 0x40,
            left_bit: 0x01,
            right_bit: 0x02,
            clear_bit: 0x04,
        }
    }
}

/// Polling cadences and timeouts, all expressed in seconds in the config
/// file and converted to `Duration` at the point of use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    pub pulse_time: f64,
    pub active_time: f64,
    pub sleep_time_act: f64,
    pub sleep_time_pas: f64,
    pub check_interval: f64,
    pub track_interval: f64,
    pub move_timeout: f64,
    pub calibrate_timeout: f64,
    pub check_next_action: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            pulse_time: 0.5,
            active_time: 2.0,
            sleep_time_act: 0.001,
            sleep_time_pas: 0.5,
            check_interval: 0.2,
            track_interval: 1.0,
            move_timeout: 30.0,
            calibrate_timeout: 120.0,
            check_next_action: 0.1,
        }
    }
}

impl TimingSettings {
    pub fn pulse_time(&self) -> Duration {
        Duration::from_secs_f64(self.pulse_time)
    }
    pub fn active_time(&self) -> Duration {
        Duration::from_secs_f64(self.active_time)
    }
    pub fn sleep_time_act(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_time_act)
    }
    pub fn sleep_time_pas(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_time_pas)
    }
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }
    pub fn track_interval(&self) -> Duration {
        Duration::from_secs_f64(self.track_interval)
    }
    pub fn move_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.move_timeout)
    }
    pub fn calibrate_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.calibrate_timeout)
    }
    pub fn check_next_action(&self) -> Duration {
        Duration::from_secs_f64(self.check_next_action)
    }
}

/// TCP server and persistence file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub current_pos_file: String,
    pub logfile: String,
    pub server_port: u16,
    pub buffer_size: usize,
    /// Advisory: `std::net::TcpListener` does not expose the OS listen
    /// backlog, so this is surfaced in the startup log rather than passed
    /// to a syscall.
    pub max_connections: u32,
    pub max_queue_size: usize,
    pub client_threads: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            current_pos_file: "koepelx.pos".to_string(),
            logfile: "koepelx.log".to_string(),
            server_port: 16500,
            buffer_size: 1024,
            max_connections: 16,
            max_queue_size: 32,
            client_threads: 4,
        }
    }
}

/// Address of the external telescope information service consumed by
/// tracking. The wire format of that service is an implementation choice
/// (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelescopeSettings {
    pub address: String,
    pub timeout_millis: u64,
}

impl Default for TelescopeSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:16600".to_string(),
            timeout_millis: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub encoder: EncoderSettings,
    pub port: PortSettings,
    pub timing: TimingSettings,
    pub server: ServerSettings,
    pub telescope: TelescopeSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoder: EncoderSettings::default(),
            port: PortSettings::default(),
            timing: TimingSettings::default(),
            server: ServerSettings::default(),
            telescope: TelescopeSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, DomeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DomeError::ConfigInvalid(e.to_string()))?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DomeError> {
        if self.encoder.pulses_per_degree <= 0.0 {
            return Err(DomeError::ConfigInvalid(
                "pulses_per_degree must be positive".to_string(),
            ));
        }
        if self.encoder.dome_opening_angle <= 0.0 || self.encoder.dome_opening_angle >= 360.0 {
            return Err(DomeError::ConfigInvalid(
                "dome_opening_angle must be in (0, 360)".to_string(),
            ));
        }
        if self.server.client_threads == 0 {
            return Err(DomeError::ConfigInvalid(
                "client_threads must be at least 1".to_string(),
            ));
        }
        if self.server.max_queue_size == 0 {
            return Err(DomeError::ConfigInvalid(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
