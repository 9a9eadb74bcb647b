//! Request/response layer: the client trait, request control and decorators.

mod auth;
mod client;
mod control;
mod request;
mod response;
mod service;

pub use auth::{Credentials, TokenAuthentication};
pub use client::{Client, ClientBuilder, ClientConfig, RpcClient, RpcClientExt};
pub use control::{RequestControl, RequestState};
pub use request::{Request, RequestHeader, RequestId};
pub use response::{completion, Response, ResponseFuture, ResponseHandler};
pub use service::{invoke, Service, ServiceCall, ServiceOptions, WithServiceOptions};
