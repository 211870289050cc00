//! # Hearth
//!
//! A modular chat-bot host. Every plugin shares one listening socket: HTTP
//! requests go through an ordered route table, WebSocket handshakes through
//! an ordered layer registry, and whatever a plugin registered disappears
//! when it is unloaded.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────────┐
//! │   Runtime   │────▶│ Plugin "status" (own scope)  │──▶ routes
//! │  (config,   │────▶│ Plugin "chat"   (own scope)  │──▶ ws layers
//! │   logging)  │     └──────────────────────────────┘
//! └──────┬──────┘                    │
//!        ▼                           ▼
//! ┌────────────────────────────────────────────────────┐
//! │ Router: RouteTable + LayerRegistry → Server (axum) │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hearth::prelude::*;
//!
//! struct Status;
//!
//! #[async_trait]
//! impl Plugin for Status {
//!     fn name(&self) -> &str {
//!         "status"
//!     }
//!
//!     async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
//!         ctx.router().get("/status", handler_fn(|_req| async {
//!             Ok::<_, Infallible>("ok")
//!         }))?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let runtime = HearthRuntime::new();
//!     runtime.register_plugin(Status).await?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `hearth.toml` configuration files
//! - `yaml-config`: `hearth.yaml` configuration files
//! - `json-log`: JSON log output

pub use hearth_core as core;
pub use hearth_framework as framework;
pub use hearth_runtime as runtime;
pub use hearth_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use hearth::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use hearth_runtime::{HearthConfig, HearthRuntime, RuntimeError};

    // Plugin system
    pub use hearth_framework::{Plugin, PluginContext, PluginError, async_trait};

    // Scopes and path patterns
    pub use hearth_core::{PathMatcher, PathPattern, Scope};

    // Routing
    pub use hearth_transport::{
        Flow, HandlerChain, LayerHandle, Message, Method, RouteRequest, ScopedRouter, StatusCode,
        UpgradeRequest, WsSocket, handler_fn, middleware_fn,
    };

    // Handler errors
    pub use hearth_transport::BoxError;

    pub use std::convert::Infallible;

    // Logging
    pub use hearth_runtime::prelude::*;
}
