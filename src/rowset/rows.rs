//! Lazy row sequence over one response's attachments.

use std::collections::VecDeque;

use super::attachment::Attachment;
use super::demux::RowsetDemuxer;
use super::reader::RowReader;
use crate::error::{Result, RpcError};

/// Forward-only iterator over the rows of one rowset response.
///
/// Attachments are pulled from the source only when every row from the
/// previous one has been handed out. The sequence cannot be restarted; once
/// it yields an error or `None` it is fused.
pub struct Rows<I, R: RowReader> {
    source: I,
    demux: RowsetDemuxer<R>,
    ready: VecDeque<R::Row>,
    scratch: Vec<R::Row>,
    deferred: Option<RpcError>,
    done: bool,
}

impl<I, R> Rows<I, R>
where
    I: Iterator<Item = Attachment>,
    R: RowReader,
{
    /// Iterate rows of `attachments` decoded by `reader`.
    pub fn new<S>(attachments: S, reader: R) -> Self
    where
        S: IntoIterator<IntoIter = I>,
    {
        Self::with_demuxer(attachments, RowsetDemuxer::new(reader))
    }

    /// Iterate using a pre-configured demuxer.
    pub fn with_demuxer<S>(attachments: S, demux: RowsetDemuxer<R>) -> Self
    where
        S: IntoIterator<IntoIter = I>,
    {
        Self {
            source: attachments.into_iter(),
            demux,
            ready: VecDeque::new(),
            scratch: Vec::new(),
            deferred: None,
            done: false,
        }
    }

    /// Rows emitted by the underlying demuxer so far.
    pub fn rows_emitted(&self) -> usize {
        self.demux.rows_emitted()
    }

    /// Collect every remaining row, stopping at the first error.
    pub fn collect_rows(self) -> Result<Vec<R::Row>> {
        self.collect()
    }
}

impl<I, R> Iterator for Rows<I, R>
where
    I: Iterator<Item = Attachment>,
    R: RowReader,
{
    type Item = Result<R::Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.ready.pop_front() {
                return Some(Ok(row));
            }
            if let Some(err) = self.deferred.take() {
                return Some(Err(err));
            }
            if self.done {
                return None;
            }

            match self.source.next() {
                Some(attachment) => {
                    let fed = self.demux.feed_into(attachment, &mut self.scratch);
                    self.ready.extend(self.scratch.drain(..));
                    if let Err(err) = fed {
                        // rows completed before the error still come first
                        self.deferred = Some(err);
                        self.done = true;
                    }
                }
                None => {
                    self.done = true;
                    if let Err(err) = self.demux.finish() {
                        return Some(Err(err));
                    }
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowset::RawRowReader;
    use bytes::Bytes;
    use std::cell::Cell;

    #[test]
    fn test_rows_across_attachments() {
        let attachments = vec![
            Attachment::new(Bytes::from_static(b"abcdef"), vec![3, 5]),
            Attachment::new(Bytes::from_static(b"ghwxyz"), vec![5, 4]),
        ];
        let rows = Rows::new(attachments, RawRowReader).collect_rows().unwrap();

        assert_eq!(
            rows,
            vec![
                Bytes::from_static(b"abc"),
                Bytes::from_static(b"defgh"),
                Bytes::from_static(b"wxyz"),
            ]
        );
    }

    #[test]
    fn test_attachments_pulled_lazily() {
        let pulled = Cell::new(0);
        let source = (0..3).map(|_| {
            pulled.set(pulled.get() + 1);
            Attachment::new(Bytes::from_static(b"ab"), vec![1, 1])
        });

        let mut rows = Rows::new(source, RawRowReader);
        assert_eq!(pulled.get(), 0);

        rows.next().unwrap().unwrap();
        assert_eq!(pulled.get(), 1);
        rows.next().unwrap().unwrap();
        assert_eq!(pulled.get(), 1);
        rows.next().unwrap().unwrap();
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn test_truncated_stream_reports_error_once() {
        let attachments = vec![Attachment::new(Bytes::from_static(b"abcdef"), vec![3, 5])];
        let mut rows = Rows::new(attachments, RawRowReader);

        assert_eq!(rows.next().unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(rows.next().unwrap().unwrap_err().is_framing());
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_partial_rows_yielded_before_framing_error() {
        let attachments = vec![
            Attachment::new(Bytes::from_static(b"abcXX"), vec![3]),
            Attachment::new(Bytes::from_static(b"never"), vec![5]),
        ];
        let items: Vec<_> = Rows::new(attachments, RawRowReader).collect();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"abc"));
        assert!(items[1].as_ref().unwrap_err().is_framing());
    }

    #[test]
    fn test_empty_source() {
        let mut rows = Rows::new(Vec::<Attachment>::new(), RawRowReader);
        assert!(rows.next().is_none());
        assert_eq!(rows.rows_emitted(), 0);
    }
}
