//! HTTP routing: decoded requests, handler chains and the route table.

mod handler;
mod request;
mod table;

pub use handler::{
    BoxedHandler, Flow, Handler, HandlerChain, HandlerFn, MiddlewareFn, handler_fn, middleware_fn,
};
pub use request::{BodyError, RequestBody, RouteRequest};
pub use table::{MethodFilter, Route, RouteHandle, RouteId, RouteTable};
