//! Error types for rtulink.

use thiserror::Error;

/// Main error type for all link operations.
#[derive(Debug, Error)]
pub enum RtuError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured.
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// JSON error while loading a configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No active link. Returned immediately to any new command.
    #[error("Transport unavailable")]
    TransportUnavailable,

    /// The link closed while the command was queued or in flight.
    #[error("Link closed")]
    LinkClosed,

    /// A completed frame failed checksum verification.
    #[error("CRC mismatch: expected {expected:#06X}, got {actual:#06X}")]
    Crc { expected: u16, actual: u16 },

    /// Device answered with a Modbus exception response.
    #[error("Device exception {code:#04X} for function {function:#04X}")]
    Exception { function: u8, code: u8 },

    /// No response arrived within the configured response timeout.
    #[error("Response timeout")]
    Timeout,

    /// Device address is not a 2-hex-digit value.
    #[error("Invalid device address: {0:?}")]
    InvalidAddress(String),

    /// Register address is not a 4-hex-digit value.
    #[error("Invalid register address: {0:?}")]
    InvalidRegister(String),

    /// Physical value cannot be encoded into a 16-bit register.
    #[error("Value out of register range: {0}")]
    OutOfRange(f64),
}

/// Result type alias using RtuError.
pub type Result<T> = std::result::Result<T, RtuError>;
