//! CRC-16 (Modbus) checksum.
//!
//! The checksum returned here is already byte-swapped: appending
//! `compute_crc(data).to_be_bytes()` to a frame puts the low byte of the
//! raw CRC register first on the wire, which is what Modbus-RTU devices
//! expect.
//!
//! # Example
//!
//! ```
//! use rtulink::protocol::compute_crc;
//!
//! // 01 03 00 00 00 01 -> 84 0A
//! assert_eq!(compute_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x840A);
//! ```

use crate::error::{Result, RtuError};

/// Polynomial used by Modbus (0x8005 reflected).
pub const CRC_POLYNOMIAL: u16 = 0xA001;

/// Initial value of the CRC register.
pub const CRC_INIT: u16 = 0xFFFF;

/// Size of the trailing checksum in bytes.
pub const CRC_SIZE: usize = 2;

/// Compute the Modbus CRC-16 over `data`, byte-swapped for transmission.
pub fn compute_crc(data: &[u8]) -> u16 {
    let mut crc = CRC_INIT;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC_POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }

    crc.swap_bytes()
}

/// Read the checksum carried in the last two bytes of a frame.
///
/// Returns `None` if the frame is shorter than the checksum itself.
#[inline]
pub fn trailing_crc(frame: &[u8]) -> Option<u16> {
    let split = frame.len().checked_sub(CRC_SIZE)?;
    Some(u16::from_be_bytes([frame[split], frame[split + 1]]))
}

/// Check a complete frame against its trailing checksum.
///
/// On mismatch `expected` is the checksum computed over the body and
/// `actual` the one found on the wire.
pub fn verify_crc(frame: &[u8]) -> Result<()> {
    let Some((expected, actual)) = crc_pair(frame) else {
        return Err(RtuError::Crc {
            expected: compute_crc(frame),
            actual: 0,
        });
    };

    if expected == actual {
        Ok(())
    } else {
        Err(RtuError::Crc { expected, actual })
    }
}

/// `(computed over the body, carried on the wire)` for a complete frame.
///
/// Returns `None` if the frame is shorter than the checksum itself.
pub(crate) fn crc_pair(frame: &[u8]) -> Option<(u16, u16)> {
    let actual = trailing_crc(frame)?;
    let expected = compute_crc(&frame[..frame.len() - CRC_SIZE]);
    Some((expected, actual))
}
