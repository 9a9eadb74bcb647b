//! Row readers: what a reassembled row becomes.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Turns the bytes of one complete row into a row value.
///
/// This is the only per-representation step of rowset decoding;
/// [`RowsetDemuxer`](super::RowsetDemuxer) does the boundary work.
pub trait RowReader {
    /// Row representation produced by this reader.
    type Row;

    /// Materialize one complete row.
    ///
    /// # Errors
    ///
    /// A failure here is fatal for the whole rowset stream.
    fn materialize(&mut self, bytes: Bytes) -> Result<Self::Row>;
}

/// Byte-span rows.
///
/// Rows contained in one attachment are views into it; merged rows own the
/// buffer they were assembled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRowReader;

impl RowReader for RawRowReader {
    type Row = Bytes;

    #[inline]
    fn materialize(&mut self, bytes: Bytes) -> Result<Bytes> {
        Ok(bytes)
    }
}

/// Structured rows, each row a MsgPack-encoded `T`.
pub struct MsgPackRowReader<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> MsgPackRowReader<T> {
    /// Create a reader decoding rows as `T`.
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for MsgPackRowReader<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> RowReader for MsgPackRowReader<T> {
    type Row = T;

    fn materialize(&mut self, bytes: Bytes) -> Result<T> {
        MsgPackCodec::decode(&bytes)
    }
}
