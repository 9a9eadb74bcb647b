//! Error types for ytwire.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Attachment stream does not line up with the declared row lengths.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Wire protocol violation (bad header, unexpected frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport rejected or failed the request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection closed with the request still outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request did not complete within its deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Request was cancelled by the caller.
    #[error("Request cancelled")]
    Cancelled,

    /// `send` called after `close`.
    #[error("Client is closed")]
    ClientClosed,

    /// Error reported by the remote service.
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl RpcError {
    /// Shorthand for a framing error.
    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        RpcError::Framing(msg.into())
    }

    /// True for errors raised by the rowset demultiplexer.
    pub fn is_framing(&self) -> bool {
        matches!(self, RpcError::Framing(_))
    }

    /// True if the request was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
