//! Rowset demultiplexer: row reassembly across attachment boundaries.
//!
//! Implements a small state machine over the pending fragment:
//! - no pending row: rows are cut straight out of the attachment (zero copy)
//! - pending row: the next attachment must first finish that row, whose bytes
//!   are accumulated in a `BytesMut` until the declared length is reached
//!
//! One demuxer serves exactly one response stream. It is not `Sync` by
//! intent and holds no locks.

use bytes::{Bytes, BytesMut};

use super::attachment::Attachment;
use super::reader::RowReader;
use crate::error::{RpcError, Result};

/// Default maximum size of a single row (256 MB).
pub const DEFAULT_MAX_ROW_SIZE: u32 = 256 * 1024 * 1024;

/// Bytes of a row begun in an earlier attachment.
#[derive(Debug)]
struct Pending {
    /// Declared length of the row.
    expected: usize,
    /// Bytes received so far (always shorter than `expected`).
    fragment: BytesMut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Finished,
    Failed,
}

/// Reassembles rows from an ordered stream of attachments.
///
/// The reassembly algorithm is shared; what a finished row becomes is up to
/// the [`RowReader`] `R`.
pub struct RowsetDemuxer<R: RowReader> {
    reader: R,
    pending: Option<Pending>,
    phase: Phase,
    max_row_size: u32,
    attachments_fed: usize,
    rows_emitted: usize,
    merged_rows: usize,
}

impl<R: RowReader> RowsetDemuxer<R> {
    /// Create a demuxer with the default maximum row size.
    pub fn new(reader: R) -> Self {
        Self::with_max_row_size(reader, DEFAULT_MAX_ROW_SIZE)
    }

    /// Create a demuxer that rejects rows declared larger than `max_row_size`.
    pub fn with_max_row_size(reader: R, max_row_size: u32) -> Self {
        Self {
            reader,
            pending: None,
            phase: Phase::Open,
            max_row_size,
            attachments_fed: 0,
            rows_emitted: 0,
            merged_rows: 0,
        }
    }

    /// Feed the next attachment and return every row it completes.
    ///
    /// # Errors
    ///
    /// Returns a framing error if the declared lengths do not match the data.
    /// The demuxer is unusable afterwards.
    pub fn feed(&mut self, attachment: Attachment) -> Result<Vec<R::Row>> {
        let mut rows = Vec::with_capacity(attachment.row_lengths.len());
        self.feed_into(attachment, &mut rows)?;
        Ok(rows)
    }

    /// Like [`feed`](Self::feed), appending rows to `out`.
    ///
    /// Rows completed before a framing error stay in `out`.
    pub fn feed_into(&mut self, attachment: Attachment, out: &mut Vec<R::Row>) -> Result<()> {
        match self.phase {
            Phase::Open => {}
            Phase::Finished => {
                return Err(RpcError::framing("attachment fed after end of stream"));
            }
            Phase::Failed => {
                return Err(RpcError::framing("rowset stream already failed"));
            }
        }

        self.attachments_fed += 1;
        let result = self.consume(attachment, out);
        if result.is_err() {
            self.phase = Phase::Failed;
            self.pending = None;
        }
        result
    }

    fn consume(&mut self, attachment: Attachment, out: &mut Vec<R::Row>) -> Result<()> {
        let mut cursor = attachment.cursor();
        let mut spilled = false;

        for (index, &declared) in attachment.row_lengths.iter().enumerate() {
            if spilled {
                return Err(RpcError::framing(format!(
                    "attachment {} declares row {} after an incomplete row",
                    self.attachments_fed, index
                )));
            }
            if declared > self.max_row_size {
                return Err(RpcError::framing(format!(
                    "row length {} exceeds maximum {}",
                    declared, self.max_row_size
                )));
            }
            let len = declared as usize;

            match self.pending.take() {
                Some(mut pending) => {
                    if len != pending.expected {
                        return Err(RpcError::framing(format!(
                            "pending row declared as {} bytes, continued as {}",
                            pending.expected, len
                        )));
                    }
                    let needed = pending.expected - pending.fragment.len();
                    if cursor.remaining() < needed {
                        pending.fragment.extend_from_slice(&cursor.read_rest());
                        self.pending = Some(pending);
                        spilled = true;
                        continue;
                    }
                    pending.fragment.extend_from_slice(&cursor.read_up_to(needed));
                    self.merged_rows += 1;
                    tracing::trace!(len, "merged row completed");
                    self.emit(pending.fragment.freeze(), out)?;
                }
                None => match cursor.read(len) {
                    Some(row) => self.emit(row, out)?,
                    None => {
                        let mut fragment = BytesMut::with_capacity(len);
                        fragment.extend_from_slice(&cursor.read_rest());
                        self.pending = Some(Pending {
                            expected: len,
                            fragment,
                        });
                        spilled = true;
                    }
                },
            }
        }

        if !cursor.is_exhausted() {
            return Err(RpcError::framing(format!(
                "{} trailing bytes in attachment {} not covered by declared rows",
                cursor.remaining(),
                self.attachments_fed
            )));
        }

        Ok(())
    }

    fn emit(&mut self, bytes: Bytes, out: &mut Vec<R::Row>) -> Result<()> {
        let row = self.reader.materialize(bytes)?;
        self.rows_emitted += 1;
        out.push(row);
        Ok(())
    }

    /// Mark the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns a framing error if a row is still incomplete. A truncated row
    /// is never emitted.
    pub fn finish(&mut self) -> Result<()> {
        match self.phase {
            Phase::Finished => return Ok(()),
            Phase::Failed => return Err(RpcError::framing("rowset stream already failed")),
            Phase::Open => {}
        }

        if let Some(pending) = self.pending.take() {
            self.phase = Phase::Failed;
            return Err(RpcError::framing(format!(
                "stream ended inside a row: {} of {} bytes received",
                pending.fragment.len(),
                pending.expected
            )));
        }

        self.phase = Phase::Finished;
        Ok(())
    }

    /// True while a row begun in an earlier attachment is incomplete.
    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes buffered for the pending row.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.fragment.len())
    }

    /// Rows handed out so far.
    #[inline]
    pub fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }

    /// Rows that had to be reassembled from more than one attachment.
    #[inline]
    pub fn merged_rows(&self) -> usize {
        self.merged_rows
    }

    /// True once [`finish`](Self::finish) succeeded.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }
}
