//! # ytwire
//!
//! Client-side RPC transport for a tabular storage service.
//!
//! Requests are built and serialized on the caller's thread, handed to a
//! [`Transport`](transport::Transport), and settled exactly once through a
//! [`ResponseHandler`] that runs on the client's executor. Row data comes back
//! as binary attachments; [`RowsetDemuxer`] turns them into rows even when a
//! row is split across attachments.
//!
//! ## Layers
//!
//! - **rpc**: [`RpcClient`], [`Client`], [`RequestControl`], decorators and service stubs
//! - **rowset**: attachment demultiplexing into rows
//! - **transport**: the transport boundary and a framed stream implementation
//! - **protocol** / **writer**: wire framing and the outbound writer task
//! - **coalesce**: one shared operation for many concurrent waiters
//!
//! ## Example
//!
//! ```ignore
//! use ytwire::transport::{FramedConfig, FramedTransport};
//! use ytwire::{Client, Request, RpcClientExt};
//!
//! #[tokio::main]
//! async fn main() -> ytwire::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("proxy:9013").await?;
//!     let transport = FramedTransport::spawn(stream, FramedConfig::default().name("proxy"));
//!     let client = Client::builder()
//!         .build(transport)?
//!         .with_user_token("robot", "secret");
//!
//!     let response = client.call(Request::new("ApiService", "GetNode"))?.await?;
//!     println!("{} bytes", response.body.len());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod coalesce;
pub mod error;
pub mod protocol;
pub mod rowset;
pub mod rpc;
pub mod transport;
pub mod writer;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use coalesce::Coalesced;
pub use error::{Result, RpcError};
pub use rowset::{Attachment, MsgPackRowReader, RawRowReader, RowReader, Rows, RowsetDemuxer, RowsetDescriptor};
pub use rpc::{
    Client, ClientBuilder, ClientConfig, Credentials, Request, RequestControl, RequestState,
    Response, ResponseHandler, RpcClient, RpcClientExt, Service, ServiceCall, ServiceOptions,
    TokenAuthentication,
};

/// Lock ignoring poisoning; no guarded state is left half-updated by a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
