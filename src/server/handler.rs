//! Pluggable message handling.

use std::future::Future;
use std::sync::Arc;

use crate::core::BoxError;
use crate::transport::Context;

/// Turns one request into one response.
///
/// Implementations can be plain `async fn`s:
///
/// ```rust
/// use tcpzap::core::BoxError;
/// use tcpzap::server::Handler;
/// use tcpzap::transport::Context;
///
/// struct Echo;
///
/// impl Handler for Echo {
///     async fn handle(&self, _ctx: &Context, msg: Vec<u8>) -> Result<Vec<u8>, BoxError> {
///         Ok(msg)
///     }
/// }
/// ```
///
/// Returning an error closes the connection the request arrived on.
pub trait Handler: Send + Sync + 'static {
    /// Handle one message.
    fn handle(
        &self,
        ctx: &Context,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, BoxError>> + Send;
}

impl<H: Handler> Handler for Arc<H> {
    fn handle(
        &self,
        ctx: &Context,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, BoxError>> + Send {
        (**self).handle(ctx, msg)
    }
}

/// Handler backed by a closure. Built with [`handler_fn`].
#[derive(Debug, Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Build a [`Handler`] from a closure returning a future.
///
/// The closure receives its own clone of the context.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Context, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send + 'static,
{
    HandlerFn { f }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Context, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send + 'static,
{
    fn handle(
        &self,
        ctx: &Context,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, BoxError>> + Send {
        (self.f)(ctx.clone(), msg)
    }
}
