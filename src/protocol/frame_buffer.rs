//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 13 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header.
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a header is invalid or its payload exceeds the limit.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let header = match Header::decode(&self.buffer) {
                        Some(header) => header,
                        None => return Ok(None),
                    };
                    header.validate(self.max_payload_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);

                    if header.payload_length == 0 {
                        return Ok(Some(Frame::new(header, Bytes::new())));
                    }
                    self.state = State::WaitingForPayload { header };
                }

                State::WaitingForPayload { header } => {
                    let remaining = header.payload_length as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    let header = *header;
                    self.state = State::WaitingForHeader;

                    return Ok(Some(Frame::new(header, payload)));
                }
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

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
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
    use crate::protocol::{build_frame, flags};

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = build_frame(flags::IS_RESPONSE, 1, b"body");
        combined.extend(build_frame(flags::RESPONSE_ATTACHMENT, 1, b"att-1"));
        combined.extend(build_frame(flags::RESPONSE_ATTACHMENT | flags::END, 1, b"att-2"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert!(!frames[0].is_attachment());
        assert_eq!(&frames[1].payload[..], b"att-1");
        assert!(frames[2].is_end());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(flags::IS_RESPONSE | flags::END, 42, b"test");

        assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id(), 42);
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"a payload long enough to be cut in the middle";
        let bytes = build_frame(flags::IS_RESPONSE, 1, payload);

        let cut = HEADER_SIZE + 10;
        assert!(buffer.push(&bytes[..cut]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[cut..]).unwrap();
        assert_eq!(&frames[0].payload[..], payload);
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(flags::IS_CANCEL, 5, b"")).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_cancel());
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_max_payload_validation() {
        let mut buffer = FrameBuffer::with_max_payload(100);
        let header = Header::new(flags::IS_RESPONSE, 1, 1000);

        let err = buffer.push(&header.encode()).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(0, 1, b"test");
        buffer.push(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();
        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(flags::IS_RESPONSE | flags::END, 9, b"hi");

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0].payload[..], b"hi");
    }
}
