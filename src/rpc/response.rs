//! Responses and the handler contract.
//!
//! A [`ResponseHandler`] receives exactly one of `on_response`, `on_error` or
//! `on_cancel`. Every method consumes the boxed handler, so firing twice
//! cannot be expressed.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::codec::MsgPackCodec;
use crate::error::{RpcError, Result};
use crate::rowset::{Attachment, RowReader, Rows, RowsetDemuxer, RowsetDescriptor};

/// A complete response: message body plus raw attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Encoded response message.
    pub body: Bytes,
    /// Attachments in arrival order, not row aligned.
    pub attachments: Vec<Bytes>,
}

impl Response {
    /// Create a response.
    pub fn new(body: Bytes, attachments: Vec<Bytes>) -> Self {
        Self { body, attachments }
    }

    /// Decode the MsgPack body as `T`.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.body)
    }

    /// Lazily decode the attachments as rows.
    ///
    /// `descriptor` supplies the row lengths of every attachment, usually
    /// taken from the decoded body.
    ///
    /// # Errors
    ///
    /// Returns a framing error if the descriptor does not cover exactly the
    /// attachments of this response. Row-level errors surface while iterating.
    pub fn rowset<R: RowReader>(
        &self,
        descriptor: RowsetDescriptor,
        reader: R,
    ) -> Result<Rows<std::vec::IntoIter<Attachment>, R>> {
        let attachments = descriptor.pair(self.attachments.clone())?;
        Ok(Rows::new(attachments, reader))
    }

    /// Like [`rowset`](Self::rowset) with a custom row size limit.
    pub fn rowset_with_limit<R: RowReader>(
        &self,
        descriptor: RowsetDescriptor,
        reader: R,
        max_row_size: u32,
    ) -> Result<Rows<std::vec::IntoIter<Attachment>, R>> {
        let attachments = descriptor.pair(self.attachments.clone())?;
        Ok(Rows::with_demuxer(
            attachments,
            RowsetDemuxer::with_max_row_size(reader, max_row_size),
        ))
    }
}

/// Callback contract for one request.
///
/// Called on the client's executor, never on the transport's I/O thread.
pub trait ResponseHandler: Send + 'static {
    /// The request succeeded.
    fn on_response(self: Box<Self>, response: Response);

    /// The request failed (transport, remote, timeout or framing error).
    fn on_error(self: Box<Self>, error: RpcError);

    /// The caller cancelled the request before it completed.
    fn on_cancel(self: Box<Self>);
}

struct CompletionHandler {
    tx: oneshot::Sender<Result<Response>>,
}

impl ResponseHandler for CompletionHandler {
    fn on_response(self: Box<Self>, response: Response) {
        let _ = self.tx.send(Ok(response));
    }

    fn on_error(self: Box<Self>, error: RpcError) {
        let _ = self.tx.send(Err(error));
    }

    fn on_cancel(self: Box<Self>) {
        let _ = self.tx.send(Err(RpcError::Cancelled));
    }
}

/// Create a handler whose outcome is observed through a future.
///
/// Cancellation resolves the future to `Err(RpcError::Cancelled)`.
pub fn completion() -> (Box<dyn ResponseHandler>, ResponseFuture) {
    let (tx, rx) = oneshot::channel();
    (Box::new(CompletionHandler { tx }), ResponseFuture { rx })
}

/// Future side of [`completion`].
///
/// Dropping it does not cancel the request; use the
/// [`RequestControl`](super::RequestControl) for that.
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<Response>>,
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RpcError::ConnectionClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowset::RawRowReader;

    #[tokio::test]
    async fn test_completion_response() {
        let (handler, future) = completion();
        handler.on_response(Response::new(Bytes::from_static(b"ok"), vec![]));

        let response = future.await.unwrap();
        assert_eq!(&response.body[..], b"ok");
    }

    #[tokio::test]
    async fn test_completion_cancel_is_distinct_from_error() {
        let (handler, future) = completion();
        handler.on_cancel();
        assert!(future.await.unwrap_err().is_cancelled());

        let (handler, future) = completion();
        handler.on_error(RpcError::ConnectionClosed);
        let err = future.await.unwrap_err();
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handler_resolves() {
        let (handler, future) = completion();
        drop(handler);
        assert!(matches!(future.await, Err(RpcError::ConnectionClosed)));
    }

    #[test]
    fn test_rowset_from_response() {
        let response = Response::new(
            Bytes::new(),
            vec![Bytes::from_static(b"abcdef"), Bytes::from_static(b"ghwxyz")],
        );
        let descriptor = RowsetDescriptor::new(vec![vec![3, 5], vec![5, 4]]);

        let rows = response
            .rowset(descriptor, RawRowReader)
            .unwrap()
            .collect_rows()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][..], b"defgh");
    }

    #[test]
    fn test_rowset_with_limit() {
        let response = Response::new(Bytes::new(), vec![Bytes::from_static(b"abcdef")]);
        let descriptor = RowsetDescriptor::new(vec![vec![6]]);

        let mut rows = response
            .rowset_with_limit(descriptor, RawRowReader, 4)
            .unwrap();
        assert!(rows.next().unwrap().unwrap_err().is_framing());
    }
}
