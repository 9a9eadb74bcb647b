//! Coalesced wait: many callers, one underlying operation.
//!
//! The first caller to find the gate idle starts the operation; everyone
//! arriving while it runs subscribes to the same completion. A success is
//! cached until [`Coalesced::reset`]; a failure reopens the gate so the next
//! caller starts over.
//!
//! ```ignore
//! let proxies: Coalesced<Vec<String>> = Coalesced::new();
//!
//! // any number of tasks, one discovery request
//! let list = proxies.get_or_run(|| discover_proxies(client.clone())).await?;
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{Result, RpcError};
use crate::lock;

/// Outcome shared by every waiter of one run.
pub type SharedResult<T> = std::result::Result<T, Arc<RpcError>>;

type Slot<T> = watch::Receiver<Option<SharedResult<T>>>;

enum Gate<T> {
    Idle,
    Running(Slot<T>),
    Ready(T),
}

/// Registration gate around a single in-flight operation.
pub struct Coalesced<T> {
    gate: Arc<Mutex<Gate<T>>>,
}

impl<T> Clone for Coalesced<T> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
        }
    }
}

impl<T> Default for Coalesced<T> {
    fn default() -> Self {
        Self {
            gate: Arc::new(Mutex::new(Gate::Idle)),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Coalesced<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, join the running operation, or start `op`.
    ///
    /// `op` is only called when this caller starts a new run. The run is
    /// spawned on the current runtime, so it finishes even if every waiter
    /// goes away.
    pub async fn get_or_run<F, Fut>(&self, op: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (mut slot, starter) = {
            let mut gate = lock(&self.gate);
            match &*gate {
                Gate::Ready(value) => return Ok(value.clone()),
                Gate::Running(slot) => (slot.clone(), None),
                Gate::Idle => {
                    let (tx, slot) = watch::channel(None);
                    *gate = Gate::Running(slot.clone());
                    (slot, Some(tx))
                }
            }
        };

        if let Some(tx) = starter {
            tracing::debug!("starting coalesced operation");
            let run = op();
            let gate = self.gate.clone();
            let ours = slot.clone();
            tokio::spawn(async move {
                let outcome = run.await.map_err(Arc::new);
                {
                    let mut gate = lock(&gate);
                    // reset() may have replaced the run meanwhile
                    if matches!(&*gate, Gate::Running(current) if current.same_channel(&ours)) {
                        *gate = match &outcome {
                            Ok(value) => Gate::Ready(value.clone()),
                            Err(_) => Gate::Idle,
                        };
                    }
                }
                let _ = tx.send(Some(outcome));
            });
        }

        let outcome = match slot.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        match outcome {
            Some(outcome) => outcome,
            None => {
                // the run died without reporting
                self.reopen(&slot);
                Err(Arc::new(RpcError::Cancelled))
            }
        }
    }

    /// Forget the cached value. A running operation is detached: its
    /// waiters still get its outcome, but it no longer fills the cache.
    pub fn reset(&self) {
        *lock(&self.gate) = Gate::Idle;
    }

    pub fn is_running(&self) -> bool {
        matches!(&*lock(&self.gate), Gate::Running(_))
    }

    /// The cached value, if the last run succeeded.
    pub fn value(&self) -> Option<T> {
        match &*lock(&self.gate) {
            Gate::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn reopen(&self, slot: &Slot<T>) {
        let mut gate = lock(&self.gate);
        if matches!(&*gate, Gate::Running(current) if current.same_channel(slot)) {
            *gate = Gate::Idle;
        }
    }
}
