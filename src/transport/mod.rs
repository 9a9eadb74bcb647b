//! Transport boundary.
//!
//! A [`Transport`] moves serialized requests to the destination and hands
//! the outcome back through a [`ResponseSink`]. It may deliver from any
//! thread; the client takes care of running handlers on its executor.
//!
//! [`FramedTransport`] is the stock implementation over any byte stream.

mod framed;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

pub use framed::{FramedConfig, FramedTransport};

use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::rpc::{RequestControl, RequestHeader, RequestId, Response};

/// Moves requests to a destination.
pub trait Transport: Send + Sync + 'static {
    /// Accept `request` for delivery.
    ///
    /// On `Ok` the transport owns `sink` and must eventually deliver to it
    /// or drop it (dropping reports the connection as closed). On `Err`
    /// nothing was sent and the sink is discarded silently.
    fn submit(&self, request: SerializedRequest, sink: ResponseSink) -> Result<CancelHandle>;

    /// Name used as the default destination.
    fn name(&self) -> &str;
}

/// A request after envelope encoding.
#[derive(Debug, Clone)]
pub struct SerializedRequest {
    pub id: RequestId,
    /// MsgPack-encoded [`RequestHeader`].
    pub header: Bytes,
    pub body: Bytes,
    pub attachments: Vec<Bytes>,
    pub timeout: Option<Duration>,
}

impl SerializedRequest {
    pub fn decode_header(&self) -> Result<RequestHeader> {
        MsgPackCodec::decode(&self.header)
    }
}

/// One-shot delivery slot for a request's outcome.
pub struct ResponseSink {
    control: Option<RequestControl>,
}

impl ResponseSink {
    pub(crate) fn new(control: RequestControl) -> Self {
        Self {
            control: Some(control),
        }
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.control.as_ref().map(RequestControl::id)
    }

    /// True once the request has settled some other way (cancel, timeout).
    pub fn is_cancelled(&self) -> bool {
        self.control.as_ref().map_or(true, RequestControl::is_done)
    }

    /// Hand over the outcome. Ignored if the request already settled.
    pub fn deliver(mut self, result: Result<Response>) {
        if let Some(control) = self.control.take() {
            control.complete(result);
        }
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if let Some(control) = self.control.take() {
            control.release_sink();
        }
    }
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSink")
            .field("request_id", &self.request_id())
            .finish()
    }
}

/// Tells the transport to abandon a request. Runs at most once.
pub struct CancelHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle that does nothing, for transports that cannot cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub(crate) fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}
