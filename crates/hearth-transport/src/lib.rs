//! # Hearth Transport
//!
//! One listening socket shared by every plugin, multiplexing plain HTTP
//! requests onto a route table and WebSocket handshakes onto a layer
//! registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │  Plugins                 │  register through ScopedRouter
//! ├──────────────────────────┤
//! │  Router                  │  RouteTable + LayerRegistry
//! ├──────────────────────────┤
//! │  Server (axum)           │  <- body decoding, upgrade handshake
//! ├──────────────────────────┤
//! │  TCP listener            │
//! └──────────────────────────┘
//! ```
//!
//! Both collections are ordered by registration and first match wins. They
//! are copy-on-write, so a dispatch always scans the snapshot it started
//! with even if a handler registers or removes entries meanwhile.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hearth_transport::{Router, Server, ServerConfig, handler_fn};
//!
//! let router = Router::new(ServerConfig::new("127.0.0.1", 8080));
//! router.get("/ping", handler_fn(|_req| async { Ok::<_, Infallible>("pong") }))?;
//! let chat = router.ws("/chat/:room")?;
//!
//! let server = Server::bind(router).await?;
//! // ...
//! chat.broadcast("hello");
//! server.shutdown().await;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod router;
pub mod server;
pub mod websocket;

pub use config::{DEFAULT_MAX_BODY_SIZE, ServerConfig};
pub use error::{DispatchError, DispatchResult, TransportError, TransportResult};
pub use http::{
    BodyError, BoxedHandler, Flow, Handler, HandlerChain, MethodFilter, RequestBody, RouteHandle,
    RouteId, RouteRequest, RouteTable, handler_fn, middleware_fn,
};
pub use router::{Router, ScopedRouter};
pub use server::{Server, ServerState, app};
pub use websocket::{
    AcceptCallback, LayerHandle, LayerId, LayerRegistry, SendError, SocketId, UpgradeRequest,
    WsSocket,
};

pub use axum::extract::ws::Message;
pub use axum::Json;
pub use axum::http::{Method, StatusCode};
pub use tower::BoxError;
