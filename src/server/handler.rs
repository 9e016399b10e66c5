//! Request handler capabilities hosted by [`RpcServer`](super::RpcServer).
//!
//! A [`RequestHandler`] processes requests and accepts the server's
//! advertised address once the server is up. Plain [`Handler`]s that only
//! process requests are wrapped in a [`DelegatingHandler`] whose metadata
//! hook does nothing.

use async_trait::async_trait;

use crate::rpc::{Request, Response, RpcServerMetadata};

/// A bare request processor.
///
/// Returning `None` means the request was not claimed and the next handler
/// in the chain should answer it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &Request) -> Option<Response>;
}

/// A request processor that also wants to know where it is reachable.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &Request) -> Option<Response>;

    /// Called exactly once per successful server start, after the port is
    /// bound and the advertised address resolved.
    fn set_server_metadata(&self, metadata: RpcServerMetadata);
}

/// Adapts a plain [`Handler`] to [`RequestHandler`], ignoring metadata.
pub struct DelegatingHandler<H> {
    inner: H,
}

impl<H: Handler> DelegatingHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: Handler> RequestHandler for DelegatingHandler<H> {
    async fn handle(&self, request: &Request) -> Option<Response> {
        self.inner.handle(request).await
    }

    fn set_server_metadata(&self, _metadata: RpcServerMetadata) {}
}

/// A [`Handler`] built from a synchronous closure.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Request) -> Option<Response> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request) -> Option<Response> + Send + Sync,
{
    async fn handle(&self, request: &Request) -> Option<Response> {
        (self.f)(request)
    }
}
