use std::io;

/// Every failure mode the daemon can encounter, matching the taxonomy the
/// dome operators already reason about in the field.
#[derive(Debug, thiserror::Error)]
pub enum DomeError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("position file corrupt, reinitialized to zero angle")]
    PositionFileCorrupt,

    #[error("parallel port I/O failure: {0}")]
    PortIoFailure(#[from] io::Error),

    #[error("telescope connection lost: {0}")]
    TelescopeUnavailable(String),

    #[error("motion stalled: no pulses observed for {0:?}")]
    MotionStall(std::time::Duration),

    #[error("calibration timed out after {0:?}")]
    CalibrationTimeout(std::time::Duration),

    #[error("dome is busy")]
    AdmissionRejected,

    #[error("command doesn't exist")]
    BadCommand,

    #[error("invalid degree number: {0}")]
    BadArgument(String),
}

impl From<toml::de::Error> for DomeError {
    fn from(err: toml::de::Error) -> Self {
        DomeError::ConfigInvalid(err.to_string())
    }
}

pub type DomeResult<T> = Result<T, DomeError>;
