//! Client trait, its extension helpers, and the concrete [`Client`].
//!
//! # Example
//!
//! ```ignore
//! use ytwire::{Client, Request, RpcClientExt};
//!
//! let transport = FramedTransport::spawn(stream, FramedConfig::default());
//! let client = Client::builder()
//!     .destination("hume-proxy-01")
//!     .default_timeout(Duration::from_secs(30))
//!     .build(transport)?
//!     .with_user_token("robot-etl", token);
//!
//! let response = client.call(Request::new("ApiService", "GetNode"))?.await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::Handle;

use super::auth::{Credentials, TokenAuthentication};
use super::control::RequestControl;
use super::request::{Request, RequestId};
use super::response::{completion, Response, ResponseHandler};
use super::service::{Service, ServiceCall, ServiceOptions, WithServiceOptions};
use crate::error::{RpcError, Result};
use crate::transport::{ResponseSink, Transport};

/// Sends requests to one destination.
///
/// Object safe; decorators such as [`TokenAuthentication`] wrap any
/// implementation and are themselves clients.
pub trait RpcClient: Send + Sync {
    /// Serialize and submit `request`.
    ///
    /// Returns once the transport has accepted the request. `handler` is
    /// invoked later, exactly once, on [`executor`](Self::executor), unless
    /// this returns `Err`, in which case it is never invoked.
    fn send(&self, request: Request, handler: Box<dyn ResponseHandler>) -> Result<RequestControl>;

    /// Refuse further requests. Requests already in flight still complete.
    fn close(&self);

    /// Human-readable destination, for logs and errors.
    fn destination_name(&self) -> &str;

    /// Runtime on which handlers run.
    fn executor(&self) -> &Handle;
}

impl<C: RpcClient + ?Sized> RpcClient for Arc<C> {
    fn send(&self, request: Request, handler: Box<dyn ResponseHandler>) -> Result<RequestControl> {
        (**self).send(request, handler)
    }

    fn close(&self) {
        (**self).close()
    }

    fn destination_name(&self) -> &str {
        (**self).destination_name()
    }

    fn executor(&self) -> &Handle {
        (**self).executor()
    }
}

impl<C: RpcClient + ?Sized> RpcClient for &C {
    fn send(&self, request: Request, handler: Box<dyn ResponseHandler>) -> Result<RequestControl> {
        (**self).send(request, handler)
    }

    fn close(&self) {
        (**self).close()
    }

    fn destination_name(&self) -> &str {
        (**self).destination_name()
    }

    fn executor(&self) -> &Handle {
        (**self).executor()
    }
}

/// Convenience methods available on every [`RpcClient`].
pub trait RpcClientExt: RpcClient {
    /// Send `request` and observe the outcome as a future.
    fn call(&self, request: Request) -> Result<ServiceCall<Response>> {
        let (handler, response) = completion();
        let control = self.send(request, handler)?;
        Ok(ServiceCall::new(control, response, Ok))
    }

    /// Wrap this client so every request carries `credentials`.
    fn with_token_authentication(self, credentials: Credentials) -> TokenAuthentication<Self>
    where
        Self: Sized,
    {
        TokenAuthentication::new(Arc::new(self), credentials)
    }

    fn with_user_token(
        self,
        user: impl Into<String>,
        token: impl Into<String>,
    ) -> TokenAuthentication<Self>
    where
        Self: Sized,
    {
        self.with_token_authentication(Credentials::new(user, token))
    }

    /// Build a typed stub for service `S` on top of this client.
    fn service<S: Service>(self) -> S
    where
        Self: Sized + 'static,
    {
        S::from_client(Arc::new(self))
    }

    /// Like [`service`](Self::service), with defaults applied to every
    /// request the stub sends.
    fn service_with_options<S: Service>(self, options: ServiceOptions) -> S
    where
        Self: Sized + 'static,
    {
        S::from_client(Arc::new(WithServiceOptions::new(Arc::new(self), options)))
    }
}

impl<C: RpcClient + ?Sized> RpcClientExt for C {}

/// Client settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Overrides the transport name as the destination.
    pub destination: Option<String>,
    /// Applied to requests that do not set their own timeout.
    pub default_timeout: Option<Duration>,
}

/// Builder for [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    executor: Option<Handle>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.config.destination = Some(name.into());
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Run handlers on `executor` instead of the runtime `build` is called from.
    pub fn executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Build a client over `transport`.
    ///
    /// # Errors
    ///
    /// Fails if no executor was set and there is no current tokio runtime.
    pub fn build<T: Transport>(self, transport: Arc<T>) -> Result<Client> {
        let executor = match self.executor {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| RpcError::Transport(format!("no executor: {}", e)))?,
        };
        let destination = self
            .config
            .destination
            .clone()
            .unwrap_or_else(|| transport.name().to_string());

        Ok(Client {
            transport,
            config: self.config,
            destination,
            executor,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// [`RpcClient`] over a [`Transport`].
pub struct Client {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    destination: String,
    executor: Handle,
    next_id: AtomicU64,
    closed: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Requests sent but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn arm_timeout(&self, control: &RequestControl, after: Duration) {
        let control = control.clone();
        self.executor.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    control.expire(after);
                }
                _ = control.wait() => {}
            }
        });
    }
}

impl RpcClient for Client {
    fn send(&self, request: Request, handler: Box<dyn ResponseHandler>) -> Result<RequestControl> {
        if self.is_closed() {
            return Err(RpcError::ClientClosed);
        }

        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timeout = request.get_timeout().or(self.config.default_timeout);
        tracing::debug!(
            request = %id,
            service = request.service(),
            method = request.method(),
            destination = %self.destination,
            "sending request"
        );

        let serialized = request.serialize(id, timeout)?;
        let control = RequestControl::new(
            id,
            handler,
            self.executor.clone(),
            Some(self.in_flight.clone()),
        );

        let cancel = match self
            .transport
            .submit(serialized, ResponseSink::new(control.clone()))
        {
            Ok(cancel) => cancel,
            Err(e) => {
                tracing::debug!(request = %id, "submit failed: {}", e);
                control.discard();
                return Err(e);
            }
        };
        control.mark_submitted();
        control.attach_cancel(cancel);

        if let Some(after) = timeout {
            self.arm_timeout(&control, after);
        }
        Ok(control)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(destination = %self.destination, "client closed");
        }
    }

    fn destination_name(&self) -> &str {
        &self.destination
    }

    fn executor(&self) -> &Handle {
        &self.executor
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("destination", &self.destination)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lock;
    use crate::rpc::RequestState;
    use crate::transport::{CancelHandle, SerializedRequest};
    use std::sync::Mutex;

    /// Client that records requests and lets the test settle them.
    pub(crate) struct Capture {
        executor: Handle,
        closed: AtomicBool,
        calls: Mutex<Vec<(Request, RequestControl)>>,
    }

    impl Default for Capture {
        fn default() -> Self {
            Self {
                executor: Handle::current(),
                closed: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Capture {
        pub fn requests(&self) -> Vec<Request> {
            lock(&self.calls).iter().map(|(r, _)| r.clone()).collect()
        }

        pub fn reply(&self, index: usize, result: Result<Response>) {
            let control = lock(&self.calls)[index].1.clone();
            control.complete(result);
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl RpcClient for Capture {
        fn send(&self, request: Request, handler: Box<dyn ResponseHandler>) -> Result<RequestControl> {
            let mut calls = lock(&self.calls);
            let id = RequestId(calls.len() as u64);
            let control = RequestControl::new(id, handler, self.executor.clone(), None);
            calls.push((request, control.clone()));
            Ok(control)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn destination_name(&self) -> &str {
            "capture"
        }

        fn executor(&self) -> &Handle {
            &self.executor
        }
    }

    /// Transport that accepts everything and keeps the sinks.
    #[derive(Default)]
    struct Parked {
        fail: bool,
        cancels: Arc<AtomicUsize>,
        parked: Mutex<Vec<(SerializedRequest, ResponseSink)>>,
    }

    impl Transport for Parked {
        fn submit(&self, request: SerializedRequest, sink: ResponseSink) -> Result<CancelHandle> {
            if self.fail {
                return Err(RpcError::ConnectionClosed);
            }
            lock(&self.parked).push((request, sink));
            let cancels = self.cancels.clone();
            Ok(CancelHandle::new(move || {
                cancels.fetch_add(1, Ordering::SeqCst);
            }))
        }

        fn name(&self) -> &str {
            "parked"
        }
    }

    impl Parked {
        fn deliver(&self, result: Result<Response>) {
            let (_, sink) = lock(&self.parked).remove(0);
            sink.deliver(result);
        }
    }

    #[tokio::test]
    async fn test_send_assigns_ids_and_timeout() {
        let transport = Arc::new(Parked::default());
        let client = Client::builder()
            .default_timeout(Duration::from_secs(5))
            .build(transport.clone())
            .unwrap();
        assert_eq!(client.destination_name(), "parked");

        let a = client.call(Request::new("ApiService", "GetNode")).unwrap();
        let b = client
            .call(Request::new("ApiService", "GetNode").timeout(Duration::from_millis(250)))
            .unwrap();
        assert_ne!(a.control().id(), b.control().id());

        let parked = lock(&transport.parked);
        let first = parked[0].0.decode_header().unwrap();
        let second = parked[1].0.decode_header().unwrap();
        assert_eq!(first.timeout_ms, Some(5000));
        assert_eq!(second.timeout_ms, Some(250));
    }

    #[tokio::test]
    async fn test_response_reaches_handler() {
        let transport = Arc::new(Parked::default());
        let client = Client::builder().build(transport.clone()).unwrap();

        let call = client.call(Request::new("ApiService", "GetNode")).unwrap();
        assert_eq!(client.in_flight(), 1);

        transport.deliver(Ok(Response::new(bytes::Bytes::from_static(b"x"), vec![])));
        let response = call.await.unwrap();
        assert_eq!(&response.body[..], b"x");
    }

    #[tokio::test]
    async fn test_submit_failure_is_synchronous() {
        let transport = Arc::new(Parked {
            fail: true,
            ..Default::default()
        });
        let client = Client::builder().build(transport).unwrap();

        let result = client.call(Request::new("ApiService", "GetNode"));
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_new_requests() {
        let transport = Arc::new(Parked::default());
        let client = Client::builder().build(transport.clone()).unwrap();
        let pending = client.call(Request::new("ApiService", "GetNode")).unwrap();

        client.close();
        assert!(matches!(
            client.call(Request::new("ApiService", "GetNode")),
            Err(RpcError::ClientClosed)
        ));

        transport.deliver(Ok(Response::default()));
        assert!(pending.await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_sink_fails_request() {
        let transport = Arc::new(Parked::default());
        let client = Client::builder().build(transport.clone()).unwrap();
        let call = client.call(Request::new("ApiService", "GetNode")).unwrap();

        lock(&transport.parked).clear();
        assert!(matches!(call.await, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_transport() {
        let transport = Arc::new(Parked::default());
        let client = Client::builder().build(transport.clone()).unwrap();
        let call = client
            .call(Request::new("ApiService", "GetNode").timeout(Duration::from_millis(100)))
            .unwrap();
        let control = call.control().clone();

        assert!(matches!(call.await, Err(RpcError::Timeout(_))));
        assert_eq!(control.wait().await, RequestState::Failed);
        assert_eq!(transport.cancels.load(Ordering::SeqCst), 1);

        // a late response is ignored
        transport.deliver(Ok(Response::default()));
        assert_eq!(control.state(), RequestState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_reaches_transport() {
        let transport = Arc::new(Parked::default());
        let client = Client::builder().build(transport.clone()).unwrap();
        let call = client.call(Request::new("ApiService", "GetNode")).unwrap();

        assert!(call.cancel());
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(transport.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_config_from_defaults() {
        let config = ClientConfig::default();
        assert!(config.destination.is_none());
        assert!(config.default_timeout.is_none());

        let client = Client::builder()
            .config(ClientConfig {
                destination: Some("proxy".into()),
                default_timeout: None,
            })
            .build(Arc::new(Parked::default()))
            .unwrap();
        assert_eq!(client.destination_name(), "proxy");
    }
}
