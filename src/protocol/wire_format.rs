//! Wire format encoding and decoding.
//!
//! Implements the 13-byte header format:
//! ```text
//! ┌───────┬──────────┬──────────┐
//! │ Flags │ Req ID   │ Length   │
//! │ 1 byte│ 8 bytes  │ 4 bytes  │
//! │       │ uint64 BE│ uint32 BE│
//! └───────┴──────────┴──────────┘
//! ```
//!
//! A message (request or response) is one or more frames sharing a request
//! id. The last frame of a message carries [`flags::END`].

use crate::error::{RpcError, Result};

/// Header size in bytes (fixed, exactly 13).
pub const HEADER_SIZE: usize = 13;

/// Default maximum payload size of one frame (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Flag constants for the protocol.
pub mod flags {
    /// Frame belongs to a response (1) or a request (0).
    pub const IS_RESPONSE: u8 = 0b0000_0001;
    /// Response carries a remote error.
    pub const IS_ERROR: u8 = 0b0000_0010;
    /// Client asks the peer to stop working on the request.
    pub const IS_CANCEL: u8 = 0b0000_0100;
    /// Payload is an attachment rather than the message body.
    pub const IS_ATTACHMENT: u8 = 0b0000_1000;
    /// Last frame of the message.
    pub const END: u8 = 0b0001_0000;
    /// Request envelope (service, method, credentials).
    pub const IS_HEADER: u8 = 0b0010_0000;

    /// Reserved bits mask (bits 6-7).
    pub const RESERVED_MASK: u8 = 0b1100_0000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    /// Error response: single frame.
    pub const ERROR_RESPONSE: u8 = IS_RESPONSE | IS_ERROR | END;
    /// Response attachment.
    pub const RESPONSE_ATTACHMENT: u8 = IS_RESPONSE | IS_ATTACHMENT;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Request identifier.
    pub request_id: u64,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(flags: u8, request_id: u64, payload_length: u32) -> Self {
        Self {
            flags,
            request_id,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use ytwire::protocol::{flags, Header};
    ///
    /// let header = Header::new(flags::IS_RESPONSE | flags::END, 42, 100);
    /// assert_eq!(header.encode().len(), 13);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.flags;
        buf[1..9].copy_from_slice(&self.request_id.to_be_bytes());
        buf[9..13].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[1..9]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[9..13]);
        Some(Self {
            flags: buf[0],
            request_id: u64::from_be_bytes(id),
            payload_length: u32::from_be_bytes(len),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(RpcError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(RpcError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_ERROR)
    }

    #[inline]
    pub fn is_cancel(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_CANCEL)
    }

    #[inline]
    pub fn is_attachment(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_ATTACHMENT)
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        flags::has_flag(self.flags, flags::END)
    }

    #[inline]
    pub fn is_request_header(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(0x11, 0x0102030405060708, 0x090A0B0C);
        let bytes = header.encode();

        assert_eq!(bytes[0], 0x11);
        assert_eq!(&bytes[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[9..13], &[0x09, 0x0A, 0x0B, 0x0C]);

        assert_eq!(Header::decode(&bytes), Some(header));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(0, 1, 1_000_000);
        let err = header.validate(100).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_reserved_bits_must_be_zero() {
        let header = Header::new(0b1000_0000, 1, 0);
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("Reserved flag bits"));
    }

    #[test]
    fn test_flag_accessors() {
        let header = Header::new(flags::ERROR_RESPONSE, 9, 0);
        assert!(header.is_response());
        assert!(header.is_error());
        assert!(header.is_end());
        assert!(!header.is_attachment());
        assert!(!header.is_cancel());

        let header = Header::new(flags::IS_HEADER, 9, 0);
        assert!(header.is_request_header());
        assert!(!header.is_response());
    }
}
