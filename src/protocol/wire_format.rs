//! Wire format encoding and decoding.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌──────────────┬──────────┬────────────────┐
//! │ Total length │ Opcode   │ Correlation ID │
//! │ 2 bytes      │ 2 bytes  │ 4 bytes        │
//! │ uint16 LE    │ uint16 LE│ uint32 LE      │
//! └──────────────┴──────────┴────────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. `total_length` counts the
//! whole frame, header included: `total_length = 8 + payload length`. The
//! same convention is applied on encode and decode.

use crate::error::{MuxwireError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum frame size, header included (1 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// Absolute maximum frame size: `total_length` is a u16.
pub const ABSOLUTE_MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Declared frame size, header included.
    pub total_length: u16,
    /// Application message type; opaque to this crate.
    pub opcode: u16,
    /// Matches a response to the request that caused it.
    pub correlation_id: u32,
}

impl Header {
    /// Create a header for a frame carrying `payload_len` bytes of payload.
    ///
    /// Fails if header plus payload would not fit in the 16-bit length field.
    pub fn for_payload(opcode: u16, correlation_id: u32, payload_len: usize) -> Result<Self> {
        let total = HEADER_SIZE + payload_len;
        if total > ABSOLUTE_MAX_FRAME_SIZE {
            return Err(MuxwireError::FrameTooLarge {
                length: total,
                max: ABSOLUTE_MAX_FRAME_SIZE,
            });
        }
        Ok(Self {
            total_length: total as u16,
            opcode,
            correlation_id,
        })
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::Header;
    ///
    /// let header = Header::for_payload(7, 42, 5).unwrap();
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 8);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.total_length.to_le_bytes());
        buf[2..4].copy_from_slice(&self.opcode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.correlation_id.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            total_length: u16::from_le_bytes([buf[0], buf[1]]),
            opcode: u16::from_le_bytes([buf[2], buf[3]]),
            correlation_id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the declared length against the size limit in force.
    ///
    /// A frame must at least cover its own header, and must not exceed
    /// `max_frame_size`.
    pub fn validate(&self, max_frame_size: usize) -> Result<()> {
        let total = self.total_length as usize;
        if total < HEADER_SIZE {
            return Err(MuxwireError::Protocol(format!(
                "declared frame length {} is shorter than the {}-byte header",
                total, HEADER_SIZE
            )));
        }
        if total > max_frame_size {
            return Err(MuxwireError::FrameTooLarge {
                length: total,
                max: max_frame_size,
            });
        }
        Ok(())
    }

    /// Payload length implied by the declared total length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.total_length as usize).saturating_sub(HEADER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::for_payload(7, 0xDEADBEEF, 100).unwrap();
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = Header {
            total_length: 0x0102,
            opcode: 0x0304,
            correlation_id: 0x05060708,
        };
        let bytes = header.encode();

        // Total length: 0x0102 in LE
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], 0x01);

        // Opcode: 0x0304 in LE
        assert_eq!(bytes[2], 0x04);
        assert_eq!(bytes[3], 0x03);

        // Correlation id: 0x05060708 in LE
        assert_eq!(bytes[4], 0x08);
        assert_eq!(bytes[5], 0x07);
        assert_eq!(bytes[6], 0x06);
        assert_eq!(bytes[7], 0x05);
    }

    #[test]
    fn test_total_length_counts_header() {
        let header = Header::for_payload(1, 1, 12).unwrap();
        assert_eq!(header.total_length as usize, HEADER_SIZE + 12);
        assert_eq!(header.payload_len(), 12);
    }

    #[test]
    fn test_for_payload_empty() {
        let header = Header::for_payload(1, 1, 0).unwrap();
        assert_eq!(header.total_length as usize, HEADER_SIZE);
        assert_eq!(header.payload_len(), 0);
    }

    #[test]
    fn test_for_payload_overflows_u16() {
        let result = Header::for_payload(1, 1, ABSOLUTE_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(MuxwireError::FrameTooLarge { .. })));

        // Largest payload that still fits.
        let header = Header::for_payload(1, 1, ABSOLUTE_MAX_FRAME_SIZE - HEADER_SIZE).unwrap();
        assert_eq!(header.total_length, u16::MAX);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 7]; // One byte short
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_within_limit() {
        let header = Header::for_payload(1, 1, 100).unwrap();
        assert!(header.validate(DEFAULT_MAX_FRAME_SIZE).is_ok());
    }

    #[test]
    fn test_validate_exceeds_limit() {
        let header = Header::for_payload(1, 1, 2000).unwrap();
        let result = header.validate(DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(
            result,
            Err(MuxwireError::FrameTooLarge { length: 2008, max: 1024 })
        ));
    }

    #[test]
    fn test_validate_length_shorter_than_header() {
        let header = Header {
            total_length: 3,
            opcode: 1,
            correlation_id: 1,
        };
        let result = header.validate(DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(MuxwireError::Protocol(_))));
    }

    #[test]
    fn test_encode_into() {
        let header = Header::for_payload(9, 77, 3).unwrap();
        let mut buf = [0u8; HEADER_SIZE];
        header.encode_into(&mut buf);

        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(header, decoded);
    }
}
