//! Attachment buffers and row-length descriptors.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RpcError, Result};

/// One network-delivered chunk of a rowset response.
///
/// `row_lengths` lists, in order, the byte length of every row this chunk
/// contains wholly or partially. A row left incomplete by the previous
/// attachment is declared again as the first entry here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    /// Raw bytes as delivered by the transport.
    pub data: Bytes,
    /// Declared row lengths for this chunk.
    pub row_lengths: Vec<u32>,
}

impl Attachment {
    /// Create an attachment from its data and declared row lengths.
    pub fn new(data: Bytes, row_lengths: Vec<u32>) -> Self {
        Self { data, row_lengths }
    }

    /// An attachment that declares no rows (keep-alive or control frame).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of data bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the attachment carries no data bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bounded, non-copying reader over the data.
    pub fn cursor(&self) -> AttachmentCursor {
        AttachmentCursor::new(self.data.clone())
    }
}

/// Forward-only read position over one attachment.
///
/// Reads hand out `Bytes` views into the attachment; nothing is copied.
#[derive(Debug, Clone)]
pub struct AttachmentCursor {
    data: Bytes,
    position: usize,
}

impl AttachmentCursor {
    /// Start reading `data` from offset zero.
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    /// Current offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// True when every byte has been read.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Read exactly `len` bytes, or `None` if fewer remain.
    pub fn read(&mut self, len: usize) -> Option<Bytes> {
        if len > self.remaining() {
            return None;
        }
        let out = self.data.slice(self.position..self.position + len);
        self.position += len;
        Some(out)
    }

    /// Read at most `len` bytes.
    pub fn read_up_to(&mut self, len: usize) -> Bytes {
        let take = len.min(self.remaining());
        let out = self.data.slice(self.position..self.position + take);
        self.position += take;
        out
    }

    /// Read everything that is left.
    pub fn read_rest(&mut self) -> Bytes {
        self.read_up_to(self.remaining())
    }
}

/// Per-attachment row lengths carried inside a typed response body.
///
/// Services that return rowsets put this descriptor in their result message;
/// [`RowsetDescriptor::pair`] joins it with the response attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsetDescriptor {
    /// One entry per attachment, in attachment order.
    pub row_lengths: Vec<Vec<u32>>,
}

impl RowsetDescriptor {
    /// Create a descriptor from per-attachment row lengths.
    pub fn new(row_lengths: Vec<Vec<u32>>) -> Self {
        Self { row_lengths }
    }

    /// Total number of row declarations (a merged row counts once per attachment).
    pub fn declared_rows(&self) -> usize {
        self.row_lengths.iter().map(Vec::len).sum()
    }

    /// Zip the descriptor with raw attachments.
    ///
    /// # Errors
    ///
    /// Returns a framing error if the counts differ.
    pub fn pair(self, attachments: Vec<Bytes>) -> Result<Vec<Attachment>> {
        if self.row_lengths.len() != attachments.len() {
            return Err(RpcError::framing(format!(
                "descriptor covers {} attachments, response has {}",
                self.row_lengths.len(),
                attachments.len()
            )));
        }
        Ok(attachments
            .into_iter()
            .zip(self.row_lengths)
            .map(|(data, row_lengths)| Attachment::new(data, row_lengths))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_are_views() {
        let data = Bytes::from_static(b"0123456789");
        let mut cursor = AttachmentCursor::new(data.clone());

        let head = cursor.read(4).unwrap();
        assert_eq!(&head[..], b"0123");
        assert_eq!(head.as_ptr(), data.as_ptr());
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.remaining(), 6);
    }

    #[test]
    fn test_cursor_read_past_end() {
        let mut cursor = AttachmentCursor::new(Bytes::from_static(b"abc"));
        assert!(cursor.read(4).is_none());
        assert_eq!(cursor.position(), 0);

        assert_eq!(&cursor.read_up_to(10)[..], b"abc");
        assert!(cursor.is_exhausted());
        assert!(cursor.read_rest().is_empty());
    }

    #[test]
    fn test_zero_length_read() {
        let mut cursor = AttachmentCursor::new(Bytes::new());
        assert_eq!(cursor.read(0), Some(Bytes::new()));
    }

    #[test]
    fn test_descriptor_pair() {
        let descriptor = RowsetDescriptor::new(vec![vec![1, 2], vec![]]);
        assert_eq!(descriptor.declared_rows(), 2);

        let paired = descriptor
            .pair(vec![Bytes::from_static(b"abc"), Bytes::new()])
            .unwrap();
        assert_eq!(paired.len(), 2);
        assert_eq!(paired[0].row_lengths, vec![1, 2]);
        assert!(paired[1].is_empty());
    }

    #[test]
    fn test_descriptor_pair_count_mismatch() {
        let descriptor = RowsetDescriptor::new(vec![vec![1]]);
        let err = descriptor.pair(vec![]).unwrap_err();
        assert!(err.is_framing());
    }
}
