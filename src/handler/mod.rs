//! Request handler traits and adapters.
//!
//! Dispatch is capability-based: every handler receives exactly the two
//! injectable capabilities, the request and the response, as `&mut`
//! arguments. Typed body binding is not part of dispatch; handlers pull it
//! explicitly via [`RestRequest::body_as`](crate::protocol::RestRequest::body_as).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::fault::HandlerFault;
use crate::protocol::{RestRequest, RestResponse};

/// An endpoint operation. Failures never reach the socket layer directly:
/// the session intercepts them and offers them to the fault resolver.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: &mut RestRequest, response: &mut RestResponse) -> Result<(), HandlerFault>;
}

/// Boxed future returned by function handlers.
pub type BoxHandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerFault>> + Send + 'a>>;

/// Adapts a plain function into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut RestRequest, &'a mut RestResponse) -> BoxHandlerFuture<'a> + Send + Sync,
{
    async fn call(&self, request: &mut RestRequest, response: &mut RestResponse) -> Result<(), HandlerFault> {
        (self.f)(request, response).await
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Wraps a function of the shape
/// `fn(&mut RestRequest, &mut RestResponse) -> BoxHandlerFuture<'_>`
/// into a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut RestRequest, &'a mut RestResponse) -> BoxHandlerFuture<'a> + Send + Sync,
{
    FnHandler { f }
}
