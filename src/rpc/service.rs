//! Typed service stubs over an [`RpcClient`].
//!
//! A stub is a struct holding the client plus one method per remote
//! operation. Stubs are usually generated with [`rpc_service!`](crate::rpc_service)
//! but can be written by hand:
//!
//! ```ignore
//! struct Cypress(Arc<dyn RpcClient>);
//!
//! impl Service for Cypress {
//!     const NAME: &'static str = "ApiService";
//!
//!     fn from_client(client: Arc<dyn RpcClient>) -> Self {
//!         Cypress(client)
//!     }
//! }
//!
//! impl Cypress {
//!     fn get_node(&self, args: &GetNode) -> Result<ServiceCall<Node>> {
//!         invoke(&*self.0, Request::new(Self::NAME, "GetNode"), args)
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;

use super::client::RpcClient;
use super::control::RequestControl;
use super::request::Request;
use super::response::{completion, Response, ResponseFuture, ResponseHandler};
use crate::error::Result;

/// A typed view of one remote service.
pub trait Service: Sized {
    /// Service name sent in every request envelope.
    const NAME: &'static str;

    fn from_client(client: Arc<dyn RpcClient>) -> Self;
}

/// Per-stub defaults, applied to requests that do not set their own.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub timeout: Option<Duration>,
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Client decorator that fills in [`ServiceOptions`] before forwarding.
pub struct WithServiceOptions<C: ?Sized> {
    options: ServiceOptions,
    inner: Arc<C>,
}

impl<C: RpcClient + ?Sized> WithServiceOptions<C> {
    pub fn new(inner: Arc<C>, options: ServiceOptions) -> Self {
        Self { options, inner }
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }
}

impl<C: RpcClient + ?Sized> RpcClient for WithServiceOptions<C> {
    fn send(&self, mut request: Request, handler: Box<dyn ResponseHandler>) -> Result<RequestControl> {
        if request.get_timeout().is_none() {
            if let Some(timeout) = self.options.timeout {
                request = request.timeout(timeout);
            }
        }
        self.inner.send(request, handler)
    }

    fn close(&self) {
        self.inner.close();
    }

    fn destination_name(&self) -> &str {
        self.inner.destination_name()
    }

    fn executor(&self) -> &Handle {
        self.inner.executor()
    }
}

/// In-flight typed call. Resolves to the decoded response body.
pub struct ServiceCall<T> {
    control: RequestControl,
    response: ResponseFuture,
    decode: fn(Response) -> Result<T>,
}

impl<T> ServiceCall<T> {
    pub(crate) fn new(
        control: RequestControl,
        response: ResponseFuture,
        decode: fn(Response) -> Result<T>,
    ) -> Self {
        Self {
            control,
            response,
            decode,
        }
    }

    pub fn control(&self) -> &RequestControl {
        &self.control
    }

    /// Shorthand for `control().cancel()`.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Skip body decoding and resolve to the raw response, e.g. to read a
    /// rowset from its attachments.
    pub fn into_response(self) -> ServiceCall<Response> {
        ServiceCall {
            control: self.control,
            response: self.response,
            decode: Ok,
        }
    }
}

impl<T> Future for ServiceCall<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let decode = self.decode;
        Pin::new(&mut self.response)
            .poll(cx)
            .map(|outcome| outcome.and_then(decode))
    }
}

fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    response.decode_body()
}

/// Encode `args` as the body of `request`, send it, and decode the reply as `T`.
///
/// # Errors
///
/// Encoding failures are returned before the transport sees anything.
pub fn invoke<C, A, T>(client: &C, request: Request, args: &A) -> Result<ServiceCall<T>>
where
    C: RpcClient + ?Sized,
    A: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let request = request.encode_body(args)?;
    let (handler, response) = completion();
    let control = client.send(request, handler)?;
    Ok(ServiceCall::new(control, response, decode_body::<T>))
}

/// Generate a [`Service`] stub.
///
/// ```ignore
/// rpc_service! {
///     pub struct ApiService: "ApiService" {
///         fn get_node(GetNodeArgs) -> NodeValue => "GetNode";
///         fn select_rows(SelectArgs) -> RowsetDescriptor => "SelectRows";
///     }
/// }
///
/// let api: ApiService = client.service();
/// let node = api.get_node(&GetNodeArgs { path: "//tmp".into() })?.await?;
/// ```
#[macro_export]
macro_rules! rpc_service {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $service:literal {
            $(
                $(#[$op_meta:meta])*
                fn $op:ident ( $args:ty ) -> $ret:ty => $method:literal ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        $vis struct $name {
            client: ::std::sync::Arc<dyn $crate::rpc::RpcClient>,
        }

        impl $crate::rpc::Service for $name {
            const NAME: &'static str = $service;

            fn from_client(client: ::std::sync::Arc<dyn $crate::rpc::RpcClient>) -> Self {
                Self { client }
            }
        }

        impl $name {
            /// Client this stub sends through.
            pub fn client(&self) -> &::std::sync::Arc<dyn $crate::rpc::RpcClient> {
                &self.client
            }

            $(
                $(#[$op_meta])*
                pub fn $op(&self, args: &$args) -> $crate::Result<$crate::rpc::ServiceCall<$ret>> {
                    $crate::rpc::invoke(
                        &*self.client,
                        $crate::rpc::Request::new($service, $method),
                        args,
                    )
                }
            )*
        }
    };
}
