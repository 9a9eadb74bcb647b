//! Token authentication decorator.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use super::client::RpcClient;
use super::control::RequestControl;
use super::request::Request;
use super::response::ResponseHandler;
use crate::error::Result;

/// User name plus secret token stamped into every request envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub(crate) user: String,
    pub(crate) token: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Wraps a client and attaches credentials to each request before
/// forwarding it. Everything else is delegated unchanged.
///
/// When decorators are stacked the innermost one stamps last, so its
/// credentials are the ones sent.
pub struct TokenAuthentication<C: ?Sized> {
    credentials: Credentials,
    inner: Arc<C>,
}

impl<C: RpcClient + ?Sized> TokenAuthentication<C> {
    pub fn new(inner: Arc<C>, credentials: Credentials) -> Self {
        Self { credentials, inner }
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl<C: RpcClient + ?Sized> RpcClient for TokenAuthentication<C> {
    fn send(&self, request: Request, handler: Box<dyn ResponseHandler>) -> Result<RequestControl> {
        self.inner
            .send(request.credentials(self.credentials.clone()), handler)
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

impl<C: ?Sized> fmt::Debug for TokenAuthentication<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthentication")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
