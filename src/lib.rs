//! # rtulink
//!
//! Async Modbus-RTU link for talking to a single device over a serial line.
//!
//! The crate turns an unreliable, chunked byte stream into
//! request/response calls:
//!
//! - **Framing**: CRC-16 checksums, request encoding and response
//!   reassembly from arbitrary read boundaries
//! - **Correlation**: one request on the wire at a time, responses
//!   matched to requests in FIFO order
//! - **Keepalive**: a periodic probe that shares the queue with callers
//! - **Device mapping**: register-level pump control on top of the link
//!
//! ## Example
//!
//! ```ignore
//! use rtulink::{transport, LinkBuilder, Pump};
//!
//! #[tokio::main]
//! async fn main() -> rtulink::Result<()> {
//!     let stream = transport::open_serial(&transport::SerialConfig::new("/dev/ttyUSB0"))?;
//!     let link = LinkBuilder::new().connect(stream);
//!
//!     let mut pump = Pump::new(link.clone());
//!     pump.set_speed(20.0).await?;
//!     pump.start().await?;
//!
//!     println!("{} Hz", pump.frequency().await?);
//!
//!     pump.stop().await?;
//!     link.disconnect().await
//! }
//! ```

pub mod error;
pub mod keepalive;
pub mod link;
pub mod protocol;
pub mod pump;
pub mod queue;
pub mod transport;

pub use error::{Result, RtuError};
pub use keepalive::KeepaliveObserver;
pub use link::{LinkBuilder, LinkConfig, LinkEvent, LinkHandle};
pub use protocol::{DeviceAddress, Message, RegisterAddress, Request};
pub use pump::{Pump, RegisterAccess};
