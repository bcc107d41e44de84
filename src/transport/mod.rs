//! Transport module - serial port handling.
//!
//! The link itself runs over any `AsyncRead + AsyncWrite` stream. This
//! module only adds the physical RS-485/RS-232 port:
//! - `SerialConfig`: port settings, loadable from JSON
//! - `open_serial`: open a `tokio_serial::SerialStream` (feature `serial`)

mod serial;

#[cfg(feature = "serial")]
pub use serial::open_serial;
pub use serial::{
    Parity, SerialConfig, DEFAULT_BAUD_RATE, DEFAULT_DATA_BITS, DEFAULT_PORT, DEFAULT_STOP_BITS,
};
