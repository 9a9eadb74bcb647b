//! Frame struct with typed accessors.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.header.is_error()
    }

    #[inline]
    pub fn is_cancel(&self) -> bool {
        self.header.is_cancel()
    }

    #[inline]
    pub fn is_attachment(&self) -> bool {
        self.header.is_attachment()
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.header.is_end()
    }

    #[inline]
    pub fn is_request_header(&self) -> bool {
        self.header.is_request_header()
    }
}

/// Build a complete frame as a single byte vector.
///
/// The header's `payload_length` is taken from `payload`.
///
/// # Example
///
/// ```
/// use ytwire::protocol::{build_frame, flags, HEADER_SIZE};
///
/// let bytes = build_frame(flags::IS_RESPONSE | flags::END, 42, b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(flags: u8, request_id: u64, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(flags, request_id, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::flags;

    #[test]
    fn test_build_frame_layout() {
        let bytes = build_frame(flags::RESPONSE_ATTACHMENT, 7, b"rows");
        let header = Header::decode(&bytes).unwrap();

        assert_eq!(header.request_id, 7);
        assert_eq!(header.payload_length, 4);
        assert_eq!(&bytes[HEADER_SIZE..], b"rows");
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::new(
            Header::new(flags::RESPONSE_ATTACHMENT | flags::END, 3, 0),
            Bytes::new(),
        );
        assert_eq!(frame.request_id(), 3);
        assert!(frame.is_response());
        assert!(frame.is_attachment());
        assert!(frame.is_end());
        assert!(!frame.is_error());
        assert!(!frame.is_cancel());
        assert!(!frame.is_request_header());
    }
}
