//! Rowset module - turning response attachments into table rows.
//!
//! A rowset response arrives as a sequence of binary attachments that carry
//! no row alignment: a row may start in one attachment and finish several
//! attachments later. This module provides:
//!
//! - [`Attachment`] / [`AttachmentCursor`] - one chunk plus its declared row lengths
//! - [`RowsetDemuxer`] - reassembles rows across attachment boundaries
//! - [`RowReader`] - what a finished row becomes ([`RawRowReader`], [`MsgPackRowReader`])
//! - [`Rows`] - lazy, forward-only iterator over one response's rows
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use ytwire::rowset::{Attachment, RawRowReader, RowsetDemuxer};
//!
//! let mut demux = RowsetDemuxer::new(RawRowReader);
//!
//! // Row 2 (5 bytes) only has 3 bytes in the first attachment.
//! let rows = demux
//!     .feed(Attachment::new(Bytes::from_static(b"abcdef"), vec![3, 5]))
//!     .unwrap();
//! assert_eq!(rows, vec![Bytes::from_static(b"abc")]);
//!
//! let rows = demux
//!     .feed(Attachment::new(Bytes::from_static(b"ghwxyz"), vec![5, 4]))
//!     .unwrap();
//! assert_eq!(rows[0], Bytes::from_static(b"defgh"));
//! assert_eq!(rows[1], Bytes::from_static(b"wxyz"));
//!
//! demux.finish().unwrap();
//! ```

mod attachment;
mod demux;
mod reader;
mod rows;

pub use attachment::{Attachment, AttachmentCursor, RowsetDescriptor};
pub use demux::{RowsetDemuxer, DEFAULT_MAX_ROW_SIZE};
pub use reader::{MsgPackRowReader, RawRowReader, RowReader};
pub use rows::Rows;
