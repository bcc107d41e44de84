//! Serial port configuration and opening.
//!
//! Defaults match the frequency inverters this crate talks to:
//! 19200 baud, 8 data bits, 2 stop bits, no parity.
//!
//! # Example
//!
//! ```ignore
//! use rtulink::transport::{open_serial, SerialConfig};
//!
//! let config = SerialConfig::from_json(r#"{ "port": "/dev/ttyUSB1" }"#)?;
//! let stream = open_serial(&config)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default serial device.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Default number of data bits.
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Default number of stop bits.
pub const DEFAULT_STOP_BITS: u8 = 2;

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial port settings.
///
/// Missing JSON fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path (`/dev/ttyUSB0`, `COM3`, ...).
    pub port: String,
    pub baud_rate: u32,
    /// 5 to 8.
    pub data_bits: u8,
    /// 1 or 2.
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: DEFAULT_STOP_BITS,
            parity: Parity::None,
        }
    }
}

impl SerialConfig {
    /// Settings for `port` with every other field at its default.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Parse settings from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Open the serial port described by `config`.
///
/// Fails on invalid data/stop bit counts instead of silently
/// substituting a different framing.
#[cfg(feature = "serial")]
pub fn open_serial(config: &SerialConfig) -> Result<tokio_serial::SerialStream> {
    use tokio_serial::{DataBits, ErrorKind, StopBits};

    let invalid = |msg: String| tokio_serial::Error::new(ErrorKind::InvalidInput, msg);

    let data_bits = match config.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        n => return Err(invalid(format!("unsupported data bits: {}", n)).into()),
    };
    let stop_bits = match config.stop_bits {
        1 => StopBits::One,
        2 => StopBits::Two,
        n => return Err(invalid(format!("unsupported stop bits: {}", n)).into()),
    };
    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    };

    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity);

    let stream = tokio_serial::SerialStream::open(&builder)?;
    tracing::info!(
        "Opened {} at {} baud ({}{}{})",
        config.port,
        config.baud_rate,
        config.data_bits,
        match config.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        },
        config.stop_bits
    );

    Ok(stream)
}
