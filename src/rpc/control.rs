//! Request control: the cancellable handle to one in-flight request.
//!
//! Settlement is a single compare-and-swap out of `PENDING`. Whoever wins
//! (response delivery, error, timeout or `cancel()`) takes the handler and
//! runs it on the client executor; everyone else becomes a no-op. The
//! terminal state is published after the handler has returned.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;

use super::request::RequestId;
use super::response::{Response, ResponseHandler};
use crate::error::{RpcError, Result};
use crate::lock;
use crate::transport::CancelHandle;

const PENDING: u8 = 0;
const SETTLING: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;
const FAILED: u8 = 4;

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

impl RequestState {
    /// True for every state except `Pending`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestState::Pending)
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            COMPLETED => RequestState::Completed,
            CANCELLED => RequestState::Cancelled,
            FAILED => RequestState::Failed,
            _ => RequestState::Pending,
        }
    }
}

enum Outcome {
    Response(Response),
    Error(RpcError),
    Cancelled,
}

struct Inner {
    id: RequestId,
    state: AtomicU8,
    submitted: AtomicBool,
    sink_released: AtomicBool,
    cancel_requested: AtomicBool,
    handler: Mutex<Option<Box<dyn ResponseHandler>>>,
    cancel: Mutex<Option<CancelHandle>>,
    executor: Handle,
    published: watch::Sender<RequestState>,
    in_flight: Option<Arc<AtomicUsize>>,
}

/// Shared handle to one in-flight request.
///
/// Clones refer to the same request.
#[derive(Clone)]
pub struct RequestControl {
    inner: Arc<Inner>,
}

impl RequestControl {
    pub(crate) fn new(
        id: RequestId,
        handler: Box<dyn ResponseHandler>,
        executor: Handle,
        in_flight: Option<Arc<AtomicUsize>>,
    ) -> Self {
        if let Some(counter) = &in_flight {
            counter.fetch_add(1, Ordering::AcqRel);
        }
        let (published, _) = watch::channel(RequestState::Pending);
        Self {
            inner: Arc::new(Inner {
                id,
                state: AtomicU8::new(PENDING),
                submitted: AtomicBool::new(false),
                sink_released: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                handler: Mutex::new(Some(handler)),
                cancel: Mutex::new(None),
                executor,
                published,
                in_flight,
            }),
        }
    }

    /// Identifier assigned by the client.
    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    /// Current state. Stays `Pending` until the handler has run.
    pub fn state(&self) -> RequestState {
        RequestState::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    /// True once a terminal state has been published.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Request cancellation.
    ///
    /// Best effort: if the request already settled this does nothing.
    /// Otherwise the transport is told to abandon it and `on_cancel` fires
    /// instead of `on_response`/`on_error`. Returns true if this call
    /// cancelled the request. Safe to call any number of times.
    pub fn cancel(&self) -> bool {
        if !self.claim() {
            return false;
        }
        self.inner.cancel_requested.store(true, Ordering::Release);
        self.fire_cancel_handle();
        tracing::debug!(request = %self.inner.id, "request cancelled");
        self.dispatch(Outcome::Cancelled);
        true
    }

    /// Wait until the handler has run and return the terminal state.
    pub async fn wait(&self) -> RequestState {
        let mut rx = self.inner.published.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // sender lives in `inner`, which we hold
            Err(_) => self.state(),
        };
        state
    }

    /// Deliver the transport's outcome. Returns false if already settled.
    pub(crate) fn complete(&self, result: Result<Response>) -> bool {
        if !self.claim() {
            tracing::debug!(request = %self.inner.id, "late outcome dropped");
            return false;
        }
        drop(lock(&self.inner.cancel).take());
        match result {
            Ok(response) => self.dispatch(Outcome::Response(response)),
            Err(error) => self.dispatch(Outcome::Error(error)),
        }
        true
    }

    /// Fail with a timeout and tell the transport to abandon the request.
    pub(crate) fn expire(&self, after: Duration) -> bool {
        if !self.claim() {
            return false;
        }
        self.inner.cancel_requested.store(true, Ordering::Release);
        self.fire_cancel_handle();
        tracing::debug!(request = %self.inner.id, ?after, "request timed out");
        self.dispatch(Outcome::Error(RpcError::Timeout(after)));
        true
    }

    /// The transport accepted the request.
    ///
    /// A sink the transport already dropped undelivered now fails the request.
    pub(crate) fn mark_submitted(&self) {
        self.inner.submitted.store(true, Ordering::SeqCst);
        if self.inner.sink_released.load(Ordering::SeqCst) {
            self.complete(Err(RpcError::ConnectionClosed));
        }
    }

    /// The transport dropped its sink without delivering.
    ///
    /// Ignored until the request is submitted, so a synchronous `submit`
    /// failure never reaches the handler.
    pub(crate) fn release_sink(&self) {
        self.inner.sink_released.store(true, Ordering::SeqCst);
        if self.inner.submitted.load(Ordering::SeqCst) {
            self.complete(Err(RpcError::ConnectionClosed));
        }
    }

    /// Store the transport's cancel handle.
    ///
    /// If the request settled while the transport was still accepting it,
    /// the handle is fired (cancelled or timed out) or dropped (completed).
    pub(crate) fn attach_cancel(&self, handle: CancelHandle) {
        *lock(&self.inner.cancel) = Some(handle);
        if self.inner.state.load(Ordering::Acquire) == PENDING {
            return;
        }
        if self.inner.cancel_requested.load(Ordering::Acquire) {
            self.fire_cancel_handle();
        } else {
            drop(lock(&self.inner.cancel).take());
        }
    }

    /// Settle silently after `send` failed synchronously; no handler runs.
    pub(crate) fn discard(&self) {
        if !self.claim() {
            return;
        }
        drop(lock(&self.inner.handler).take());
        self.publish(FAILED);
    }

    fn claim(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, SETTLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn fire_cancel_handle(&self) {
        let handle = lock(&self.inner.cancel).take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    fn dispatch(&self, outcome: Outcome) {
        let handler = lock(&self.inner.handler).take();
        let control = self.clone();

        // never run user code on the caller's (or transport's) thread
        self.inner.executor.spawn(async move {
            let terminal = match outcome {
                Outcome::Response(response) => {
                    if let Some(handler) = handler {
                        handler.on_response(response);
                    }
                    COMPLETED
                }
                Outcome::Error(error) => {
                    if let Some(handler) = handler {
                        handler.on_error(error);
                    }
                    FAILED
                }
                Outcome::Cancelled => {
                    if let Some(handler) = handler {
                        handler.on_cancel();
                    }
                    CANCELLED
                }
            };
            control.publish(terminal);
        });
    }

    fn publish(&self, terminal: u8) {
        self.inner.state.store(terminal, Ordering::Release);
        self.inner
            .published
            .send_replace(RequestState::from_raw(terminal));
        if let Some(counter) = &self.inner.in_flight {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for RequestControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestControl")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
