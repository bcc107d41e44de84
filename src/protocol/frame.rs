//! Inbound frame decoding.
//!
//! Response frames come in three shapes, told apart by the function code
//! in byte 1:
//!
//! ```text
//! read       [addr][0x03][n][n data bytes][crc:2]      3 + n + 2 bytes
//! write      [addr][0x06][register:2][value:2][crc:2]  8 bytes
//! exception  [addr][fc | 0x80][code][crc:2]            5 bytes
//! ```
//!
//! # Example
//!
//! ```
//! use rtulink::protocol::{decode_frame, Decoded};
//!
//! let bytes = [0x01, 0x03, 0x02, 0x00, 0x18, 0xB8, 0x4E];
//! match decode_frame(&bytes) {
//!     Decoded::Message { message, len } => {
//!         assert_eq!(message.value, 24);
//!         assert_eq!(len, 7);
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use bytes::Bytes;

use super::crc::{crc_pair, CRC_SIZE};
use super::wire_format::{
    function, DeviceAddress, RegisterAddress, EXCEPTION_FLAG, REQUEST_FRAME_SIZE,
};

/// Bytes needed before the frame length can be decided.
pub const MIN_DECIDABLE_LEN: usize = 3;

/// Total length of an exception response.
pub const EXCEPTION_FRAME_SIZE: usize = 5;

/// A validated response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Address of the answering device.
    pub address: DeviceAddress,
    /// Function code (`0x03` or `0x06`).
    pub function: u8,
    /// Register echoed by a write response. `None` for reads.
    pub register: Option<RegisterAddress>,
    /// Decoded value, big-endian. Payloads wider than 4 bytes keep only
    /// their last 4 bytes here; `data` has all of them.
    pub value: u32,
    /// Data bytes the value was decoded from.
    pub data: Bytes,
    /// Checksum as received.
    pub crc: u16,
}

impl Message {
    /// Check if this is a read response.
    #[inline]
    pub fn is_read(&self) -> bool {
        self.function == function::READ_HOLDING_REGISTERS
    }

    /// Check if this is a write echo.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.function == function::WRITE_SINGLE_REGISTER
    }
}

/// Expected total length of the frame at the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Not enough bytes to decide yet.
    Undecided,
    /// The frame occupies exactly this many bytes.
    Known(usize),
    /// Function code with no known frame shape.
    Unknown { function: u8 },
}

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Incomplete frame; wait for more input.
    NeedMoreBytes,
    /// A valid read or write response of `len` bytes.
    Message { message: Message, len: usize },
    /// A valid exception response of `len` bytes.
    Exception {
        address: DeviceAddress,
        function: u8,
        code: u8,
        len: usize,
    },
    /// A complete frame of `len` bytes whose checksum is wrong.
    CrcMismatch { expected: u16, actual: u16, len: usize },
    /// Unrecognized function code; the frame length cannot be known.
    Malformed { function: u8 },
}

/// Determine the length of the frame at the front of `buf`.
pub fn frame_length(buf: &[u8]) -> FrameLength {
    if buf.len() < MIN_DECIDABLE_LEN {
        return FrameLength::Undecided;
    }

    match buf[1] {
        function::READ_HOLDING_REGISTERS => {
            FrameLength::Known(MIN_DECIDABLE_LEN + buf[2] as usize + CRC_SIZE)
        }
        function::WRITE_SINGLE_REGISTER => FrameLength::Known(REQUEST_FRAME_SIZE),
        f if function::is_exception(f) => FrameLength::Known(EXCEPTION_FRAME_SIZE),
        f => FrameLength::Unknown { function: f },
    }
}

/// Try to decode the frame at the front of `buf`.
///
/// Never consumes anything; the caller advances its buffer by the `len`
/// reported for complete frames.
pub fn decode_frame(buf: &[u8]) -> Decoded {
    let len = match frame_length(buf) {
        FrameLength::Undecided => return Decoded::NeedMoreBytes,
        FrameLength::Unknown { function } => return Decoded::Malformed { function },
        FrameLength::Known(len) => len,
    };

    if buf.len() < len {
        return Decoded::NeedMoreBytes;
    }

    let frame = &buf[..len];
    let body = &frame[..len - CRC_SIZE];
    let Some((expected, actual)) = crc_pair(frame) else {
        return Decoded::NeedMoreBytes;
    };

    if expected != actual {
        return Decoded::CrcMismatch {
            expected,
            actual,
            len,
        };
    }

    let address = DeviceAddress(frame[0]);
    let function = frame[1];

    if function::is_exception(function) {
        return Decoded::Exception {
            address,
            function: function & !EXCEPTION_FLAG,
            code: frame[2],
            len,
        };
    }

    let message = if function == function::WRITE_SINGLE_REGISTER {
        Message {
            address,
            function,
            register: Some(RegisterAddress(u16::from_be_bytes([frame[2], frame[3]]))),
            value: u32::from(u16::from_be_bytes([frame[4], frame[5]])),
            data: Bytes::copy_from_slice(&frame[4..6]),
            crc: actual,
        }
    } else {
        let data = &body[MIN_DECIDABLE_LEN..];
        Message {
            address,
            function,
            register: None,
            value: accumulate_be(data),
            data: Bytes::copy_from_slice(data),
            crc: actual,
        }
    };

    Decoded::Message { message, len }
}

/// Big-endian accumulation; keeps the low 32 bits for longer payloads.
fn accumulate_be(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}
