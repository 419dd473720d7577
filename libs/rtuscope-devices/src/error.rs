//! Device manager error types

use thiserror::Error;

/// Result type for rtuscope-devices operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Device manager errors
#[derive(Debug, Error, Clone)]
pub enum DeviceError {
    /// Malformed or incomplete schema document; nothing was registered
    #[error("Config error: {0}")]
    Config(String),

    /// No device instance mapped to this unit
    #[error("Unknown device unit {0}")]
    UnknownDevice(u8),

    /// Register name not present in the device's schema
    #[error("Unknown register '{0}'")]
    UnknownRegister(String),

    /// Underlying bus engine failure
    #[error("Bus error: {0}")]
    Bus(String),
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Config(format!("JSON parse error: {err}"))
    }
}

impl From<rtuscope_bus::BusError> for DeviceError {
    fn from(err: rtuscope_bus::BusError) -> Self {
        DeviceError::Bus(err.to_string())
    }
}

impl DeviceError {
    pub fn config(msg: impl Into<String>) -> Self {
        DeviceError::Config(msg.into())
    }
}
