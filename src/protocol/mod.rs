//! Protocol module - CRC, wire format, framing, and frame types.
//!
//! This module implements the Modbus-RTU byte framing:
//! - CRC-16 (Modbus) checksum
//! - Request frame encoding
//! - Response frame decoding with checksum validation
//! - Frame buffer for reassembling frames from arbitrary chunks

mod crc;
mod frame;
mod frame_buffer;
mod wire_format;

pub use crc::{compute_crc, trailing_crc, verify_crc, CRC_INIT, CRC_POLYNOMIAL, CRC_SIZE};
pub use frame::{
    decode_frame, frame_length, Decoded, FrameLength, Message, EXCEPTION_FRAME_SIZE,
    MIN_DECIDABLE_LEN,
};
pub use frame_buffer::{FrameBuffer, FrameEvent};
pub use wire_format::{
    encode_read_request, encode_write_request, function, DeviceAddress, RegisterAddress, Request,
    EXCEPTION_FLAG, READ_REGISTER_COUNT, REQUEST_FRAME_SIZE,
};
