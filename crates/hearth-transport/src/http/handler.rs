//! Handler chains.
//!
//! A route owns an ordered [`HandlerChain`]. Each [`Handler`] in the chain
//! either answers the request ([`Flow::Respond`]) or hands it to the next one
//! ([`Flow::Next`]). A chain whose last handler still passes the request on
//! lets the route table fall through to the next matching route.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::BoxError;

use super::request::RouteRequest;

/// Outcome of a single handler.
#[derive(Debug)]
pub enum Flow {
    /// Pass the (possibly modified) request to the next handler.
    Next(RouteRequest),
    /// Answer the request; the rest of the chain is skipped.
    Respond(Response),
}

impl Flow {
    /// Shorthand for `Flow::Respond(value.into_response())`.
    pub fn respond(value: impl IntoResponse) -> Self {
        Self::Respond(value.into_response())
    }
}

/// An asynchronous request handler.
///
/// Most code builds handlers with [`handler_fn`] or [`middleware_fn`] rather
/// than implementing this trait directly.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn call(&self, req: RouteRequest) -> BoxFuture<'static, Result<Flow, BoxError>>;
}

/// Shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

// =============================================================================
// Closure adapters
// =============================================================================

/// Handler built from a closure that always responds. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async closure returning `Result<impl IntoResponse, E>` as a
/// terminal handler.
///
/// ```rust,ignore
/// router.get("/ping", handler_fn(|_req| async { Ok::<_, Infallible>("pong") }))?;
/// ```
pub fn handler_fn<F, Fut, R, E>(f: F) -> HandlerFn<F>
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse,
    E: Into<BoxError>,
{
    HandlerFn { f }
}

impl<F, Fut, R, E> Handler for HandlerFn<F>
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse,
    E: Into<BoxError>,
{
    fn call(&self, req: RouteRequest) -> BoxFuture<'static, Result<Flow, BoxError>> {
        let fut = (self.f)(req);
        Box::pin(async move {
            match fut.await {
                Ok(value) => Ok(Flow::Respond(value.into_response())),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Handler built from a closure that decides the [`Flow`] itself. See
/// [`middleware_fn`].
#[derive(Clone)]
pub struct MiddlewareFn<F> {
    f: F,
}

/// Wraps an async closure returning `Result<Flow, E>`, for handlers that may
/// pass the request on.
pub fn middleware_fn<F, Fut, E>(f: F) -> MiddlewareFn<F>
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, E>> + Send + 'static,
    E: Into<BoxError>,
{
    MiddlewareFn { f }
}

impl<F, Fut, E> Handler for MiddlewareFn<F>
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn call(&self, req: RouteRequest) -> BoxFuture<'static, Result<Flow, BoxError>> {
        let fut = (self.f)(req);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

// =============================================================================
// HandlerChain
// =============================================================================

/// Ordered list of handlers executed for one route.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<BoxedHandler>,
}

impl HandlerChain {
    /// Creates an empty chain. An empty chain always falls through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler.
    pub fn then(mut self, handler: impl Handler) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Appends an already shared handler.
    pub fn then_boxed(mut self, handler: BoxedHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handlers in order until one responds.
    ///
    /// Returns `Flow::Next` with the final request when every handler passed.
    pub async fn run(&self, mut req: RouteRequest) -> Result<Flow, BoxError> {
        for handler in &self.handlers {
            match handler.call(req).await? {
                Flow::Next(next) => req = next,
                Flow::Respond(response) => return Ok(Flow::Respond(response)),
            }
        }
        Ok(Flow::Next(req))
    }
}

impl<H: Handler> From<H> for HandlerChain {
    fn from(handler: H) -> Self {
        Self::new().then(handler)
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("len", &self.handlers.len())
            .finish()
    }
}
