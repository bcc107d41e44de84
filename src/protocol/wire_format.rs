//! Wire format encoding.
//!
//! Request frames sent by the link are always 8 bytes:
//! ```text
//! ┌─────────┬──────────┬──────────┬──────────┬──────────┐
//! │ Address │ Function │ Register │ Value    │ CRC      │
//! │ 1 byte  │ 1 byte   │ uint16 BE│ uint16 BE│ 2 bytes  │
//! └─────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! For reads the value field is the register count, fixed to `0x0001`.
//! All multi-byte integers are Big Endian.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use super::crc::compute_crc;
use crate::error::RtuError;

/// Size of every request frame built by this crate.
pub const REQUEST_FRAME_SIZE: usize = 8;

/// Register count carried by read requests (one register).
pub const READ_REGISTER_COUNT: u16 = 0x0001;

/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Function code constants.
pub mod function {
    /// Read holding registers.
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    /// Write single register.
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

    /// Check if a function code marks an exception response.
    #[inline]
    pub fn is_exception(function: u8) -> bool {
        function & super::EXCEPTION_FLAG != 0
    }
}

/// Address of the device on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub u8);

impl DeviceAddress {
    /// Default device address (`01`).
    pub const DEFAULT: DeviceAddress = DeviceAddress(0x01);
}

impl Default for DeviceAddress {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u8> for DeviceAddress {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl FromStr for DeviceAddress {
    type Err = RtuError;

    /// Parse a 2-hex-digit address such as `"01"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = [0u8; 1];
        hex::decode_to_slice(s, &mut buf).map_err(|_| RtuError::InvalidAddress(s.to_string()))?;
        Ok(Self(buf[0]))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// A 16-bit register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterAddress(pub u16);

impl From<u16> for RegisterAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl FromStr for RegisterAddress {
    type Err = RtuError;

    /// Parse a 4-hex-digit register such as `"FD06"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = [0u8; 2];
        hex::decode_to_slice(s, &mut buf)
            .map_err(|_| RtuError::InvalidRegister(s.to_string()))?;
        Ok(Self(u16::from_be_bytes(buf)))
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// An operation to put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Read one holding register.
    Read { register: RegisterAddress },
    /// Write a single register.
    Write { register: RegisterAddress, value: u16 },
}

impl Request {
    /// Read request for `register`.
    pub fn read(register: impl Into<RegisterAddress>) -> Self {
        Request::Read {
            register: register.into(),
        }
    }

    /// Write request for `register`.
    pub fn write(register: impl Into<RegisterAddress>, value: u16) -> Self {
        Request::Write {
            register: register.into(),
            value,
        }
    }

    /// Function code used by this request.
    pub fn function(&self) -> u8 {
        match self {
            Request::Read { .. } => function::READ_HOLDING_REGISTERS,
            Request::Write { .. } => function::WRITE_SINGLE_REGISTER,
        }
    }

    /// Register targeted by this request.
    pub fn register(&self) -> RegisterAddress {
        match self {
            Request::Read { register } | Request::Write { register, .. } => *register,
        }
    }

    /// Encode the complete frame (with CRC) for `address`.
    pub fn encode(&self, address: DeviceAddress) -> Bytes {
        match *self {
            Request::Read { register } => encode_read_request(address, register),
            Request::Write { register, value } => encode_write_request(address, register, value),
        }
    }
}

/// Build a read request: `[addr][0x03][register][0x0001][crc]`.
///
/// # Example
///
/// ```
/// use rtulink::protocol::{encode_read_request, DeviceAddress, RegisterAddress};
///
/// let frame = encode_read_request(DeviceAddress(0x01), RegisterAddress(0xFD06));
/// assert_eq!(&frame[..], &[0x01, 0x03, 0xFD, 0x06, 0x00, 0x01, 0x55, 0xA7]);
/// ```
pub fn encode_read_request(address: DeviceAddress, register: RegisterAddress) -> Bytes {
    encode_frame(
        address,
        function::READ_HOLDING_REGISTERS,
        register,
        READ_REGISTER_COUNT,
    )
}

/// Build a write request: `[addr][0x06][register][value][crc]`.
pub fn encode_write_request(
    address: DeviceAddress,
    register: RegisterAddress,
    value: u16,
) -> Bytes {
    encode_frame(address, function::WRITE_SINGLE_REGISTER, register, value)
}

fn encode_frame(
    address: DeviceAddress,
    function: u8,
    register: RegisterAddress,
    value: u16,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(REQUEST_FRAME_SIZE);
    buf.put_u8(address.0);
    buf.put_u8(function);
    buf.put_u16(register.0);
    buf.put_u16(value);

    let crc = compute_crc(&buf);
    buf.put_u16(crc);
    buf.freeze()
}
