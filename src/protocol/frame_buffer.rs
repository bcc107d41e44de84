//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Serial links deliver
//! responses in arbitrary chunks: a frame may be split over several reads,
//! and one read may hold a frame plus the start of the next. The buffer
//! keeps bytes until a complete frame length is known, then consumes
//! exactly that many.
//!
//! # Example
//!
//! ```
//! use rtulink::protocol::{FrameBuffer, FrameEvent};
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // First half of a read response
//! assert!(buffer.push(&[0x01, 0x03, 0x02]).is_empty());
//!
//! // Rest of it
//! let events = buffer.push(&[0x00, 0x18, 0xB8, 0x4E]);
//! assert!(matches!(&events[0], FrameEvent::Message(m) if m.value == 24));
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::frame::{decode_frame, Decoded, Message};
use super::wire_format::DeviceAddress;

/// Initial buffer capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Something the reassembler found in the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A valid read or write response.
    Message(Message),
    /// A valid exception response.
    Exception {
        address: DeviceAddress,
        function: u8,
        code: u8,
    },
    /// A complete frame was dropped because its checksum is wrong.
    CrcMismatch {
        expected: u16,
        actual: u16,
        frame: Bytes,
    },
    /// Unknown function code; leading bytes were dropped up to the next
    /// plausible frame start.
    Malformed { function: u8, discarded: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes not yet part of a complete frame.
    buffer: BytesMut,
    /// Frames dropped on checksum mismatch.
    crc_errors: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new frame buffer with custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            crc_errors: 0,
        }
    }

    /// Push data into the buffer and extract everything that completed.
    ///
    /// Events come out in stream order. Partial data stays buffered for
    /// the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();

        while let Some(event) = self.try_extract_one() {
            events.push(event);
        }

        events
    }

    /// Try to extract a single frame from the front of the buffer.
    fn try_extract_one(&mut self) -> Option<FrameEvent> {
        match decode_frame(&self.buffer) {
            Decoded::NeedMoreBytes => None,

            Decoded::Message { message, len } => {
                let _ = self.buffer.split_to(len);
                Some(FrameEvent::Message(message))
            }

            Decoded::Exception {
                address,
                function,
                code,
                len,
            } => {
                let _ = self.buffer.split_to(len);
                Some(FrameEvent::Exception {
                    address,
                    function,
                    code,
                })
            }

            Decoded::CrcMismatch {
                expected,
                actual,
                len,
            } => {
                // Consume the declared length so the next frame can sync.
                let frame = self.buffer.split_to(len).freeze();
                self.crc_errors += 1;
                tracing::warn!(
                    "CRC error: expected {:04X}, got {:04X}, dropping {}",
                    expected,
                    actual,
                    hex::encode_upper(&frame)
                );
                Some(FrameEvent::CrcMismatch {
                    expected,
                    actual,
                    frame,
                })
            }

            Decoded::Malformed { function } => {
                // Resync: drop leading bytes until a known frame start.
                let mut discarded = 0;
                while let Decoded::Malformed { .. } = decode_frame(&self.buffer) {
                    self.buffer.advance(1);
                    discarded += 1;
                }
                tracing::warn!(
                    "Unknown function code {:02X}, discarded {} bytes",
                    function,
                    discarded
                );
                Some(FrameEvent::Malformed {
                    function,
                    discarded,
                })
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of frames dropped on checksum mismatch so far.
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{compute_crc, encode_write_request, RegisterAddress};

    /// Read response carrying one 16-bit value.
    fn read_response(value: u16) -> Vec<u8> {
        let mut frame = vec![0x01, 0x03, 0x02];
        frame.extend_from_slice(&value.to_be_bytes());
        let crc = compute_crc(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }

    fn values(events: &[FrameEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Message(m) => Some(m.value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();

        let events = buffer.push(&read_response(24));

        assert_eq!(values(&events), vec![24]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_every_split_point() {
        let frame = read_response(0x1234);

        for split in 0..=frame.len() {
            let mut buffer = FrameBuffer::new();
            let mut events = buffer.push(&frame[..split]);
            events.extend(buffer.push(&frame[split..]));

            assert_eq!(values(&events), vec![0x1234], "split at {}", split);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let frame = encode_write_request(DeviceAddress(0x01), RegisterAddress(0xFA00), 0xC400);

        let mut all_events = Vec::new();
        for byte in frame.iter() {
            all_events.extend(buffer.push(&[*byte]));
        }

        assert_eq!(values(&all_events), vec![0xC400]);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = read_response(1);
        combined.extend_from_slice(&read_response(2));
        combined.extend_from_slice(
            &encode_write_request(DeviceAddress(0x01), RegisterAddress(0xFA01), 3),
        );

        let events = buffer.push(&combined);

        assert_eq!(values(&events), vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let second = read_response(2);

        let mut data = read_response(1);
        data.extend_from_slice(&second[..4]);

        let events = buffer.push(&data);
        assert_eq!(values(&events), vec![1]);
        assert_eq!(buffer.len(), 4);

        let events = buffer.push(&second[4..]);
        assert_eq!(values(&events), vec![2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_crc_bit_flip_is_dropped() {
        let good = read_response(7);
        let crc_at = good.len() - 2;

        for byte in crc_at..good.len() {
            for bit in 0..8 {
                let mut bad = good.clone();
                bad[byte] ^= 1 << bit;

                let mut stream = bad.clone();
                stream.extend_from_slice(&read_response(8));

                let mut buffer = FrameBuffer::new();
                let events = buffer.push(&stream);

                assert_eq!(events.len(), 2);
                assert!(matches!(events[0], FrameEvent::CrcMismatch { .. }));
                assert_eq!(values(&events), vec![8]);
                assert!(buffer.is_empty());
                assert_eq!(buffer.crc_errors(), 1);
            }
        }
    }

    #[test]
    fn test_exception_frame() {
        let mut body = vec![0x01, 0x86, 0x03];
        let crc = compute_crc(&body);
        body.extend_from_slice(&crc.to_be_bytes());

        let mut buffer = FrameBuffer::new();
        let events = buffer.push(&body);

        assert_eq!(
            events,
            vec![FrameEvent::Exception {
                address: DeviceAddress(0x01),
                function: 0x06,
                code: 0x03,
            }]
        );
    }

    #[test]
    fn test_malformed_run_is_skipped() {
        let mut buffer = FrameBuffer::new();

        let events = buffer.push(&[0x01, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(
            events,
            vec![FrameEvent::Malformed {
                function: 0x10,
                discarded: 3
            }]
        );
        // Too short to judge yet.
        assert_eq!(buffer.len(), 2);

        // A valid frame afterwards still decodes.
        let events = buffer.push(&read_response(9));
        assert!(matches!(events[0], FrameEvent::Malformed { .. }));
        assert_eq!(values(&events), vec![9]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_noise_before_frame() {
        let mut buffer = FrameBuffer::new();

        let mut data = vec![0x00];
        data.extend_from_slice(&read_response(24));

        let events = buffer.push(&data);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            FrameEvent::Malformed {
                function: 0x01,
                discarded: 1
            }
        );
        assert_eq!(values(&events), vec![24]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_noise_between_frames() {
        let mut buffer = FrameBuffer::new();

        let mut data = read_response(1);
        data.extend_from_slice(&[0xFF, 0x00]);
        data.extend_from_slice(&read_response(2));

        let events = buffer.push(&data);
        assert_eq!(values(&events), vec![1, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_does_not_discard_undecided_bytes() {
        let mut buffer = FrameBuffer::new();

        assert!(buffer.push(&[0x01]).is_empty());
        assert!(buffer.push(&[0x03]).is_empty());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&read_response(1)[..4]);
        assert!(!buffer.is_empty());

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
