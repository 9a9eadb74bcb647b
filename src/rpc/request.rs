//! Outbound requests and their serialized envelope.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::auth::Credentials;
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::transport::SerializedRequest;

/// Client-assigned identifier of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An outbound call: target method, payload, and call options.
///
/// Built by the caller, then handed to [`RpcClient::send`](super::RpcClient::send),
/// which serializes it on the calling thread. It cannot be touched after that.
#[derive(Clone)]
pub struct Request {
    service: String,
    method: String,
    body: Bytes,
    attachments: Vec<Bytes>,
    timeout: Option<Duration>,
    credentials: Option<Credentials>,
    metadata: BTreeMap<String, String>,
}

impl Request {
    /// Create an empty request for `service.method`.
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            body: Bytes::new(),
            attachments: Vec::new(),
            timeout: None,
            credentials: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set a pre-encoded body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Encode `value` as the body.
    ///
    /// # Errors
    ///
    /// Fails right here, before anything is sent, if `value` cannot be encoded.
    pub fn encode_body<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = MsgPackCodec::encode_bytes(value)?;
        Ok(self)
    }

    /// Append an outbound attachment.
    pub fn attachment(mut self, data: impl Into<Bytes>) -> Self {
        self.attachments.push(data.into());
        self
    }

    /// Per-request deadline; overrides the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Authenticate this request as `credentials`, replacing any earlier value.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn get_body(&self) -> &Bytes {
        &self.body
    }

    pub fn get_attachments(&self) -> &[Bytes] {
        &self.attachments
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn get_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Encode the envelope. Body and attachments are passed through untouched.
    pub(crate) fn serialize(self, id: RequestId, timeout: Option<Duration>) -> Result<SerializedRequest> {
        let (user, token) = match self.credentials {
            Some(c) => (Some(c.user), Some(c.token)),
            None => (None, None),
        };
        let header = RequestHeader {
            request_id: id.0,
            service: self.service,
            method: self.method,
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
            user,
            token,
            metadata: self.metadata,
        };

        Ok(SerializedRequest {
            id,
            header: MsgPackCodec::encode_bytes(&header)?,
            body: self.body,
            attachments: self.attachments,
            timeout,
        })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("body_len", &self.body.len())
            .field("attachments", &self.attachments.len())
            .field("timeout", &self.timeout)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Request envelope as written on the wire (MsgPack map).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub request_id: u64,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
