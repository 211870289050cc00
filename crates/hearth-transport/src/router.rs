//! Registration surface shared by every plugin.
//!
//! A [`Router`] owns the one route table and the one layer registry behind a
//! listener. Registrations made through [`Router`] itself live until they are
//! removed explicitly; registrations made through a [`ScopedRouter`] are also
//! removed when the scope is disposed.
//!
//! ```rust,ignore
//! let scope = Scope::new("status");
//! let http = router.scoped(&scope);
//! http.get("/status", handler_fn(|_req| async { Ok::<_, Infallible>("ok") }))?;
//! http.ws("/chat/:room")?;
//!
//! scope.dispose(); // both registrations are gone
//! ```

use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use axum::response::Response;
use hearth_core::{IntoPatterns, Scope};
use parking_lot::RwLock;

use crate::config::ServerConfig;
use crate::error::{DispatchResult, TransportResult};
use crate::http::{HandlerChain, MethodFilter, RouteHandle, RouteRequest, RouteTable};
use crate::websocket::{AcceptCallback, LayerHandle, LayerRegistry, UpgradeRequest, WsSocket};

/// Generates the per-method shorthands on a type that has a `route` method.
macro_rules! method_shorthands {
    ($($name:ident => $method:expr, $doc:literal;)*) => {
        $(
            #[doc = $doc]
            pub fn $name(
                &self,
                patterns: impl IntoPatterns,
                handler: impl Into<HandlerChain>,
            ) -> TransportResult<RouteHandle> {
                self.route(patterns, $method, handler)
            }
        )*
    };
}

macro_rules! registration_methods {
    () => {
        method_shorthands! {
            get => Method::GET, "Registers a `GET` route (also answers `HEAD`).";
            post => Method::POST, "Registers a `POST` route.";
            put => Method::PUT, "Registers a `PUT` route.";
            patch => Method::PATCH, "Registers a `PATCH` route.";
            delete => Method::DELETE, "Registers a `DELETE` route.";
            all => MethodFilter::Any, "Registers a route answering every method.";
        }

        /// Registers a WebSocket layer without an accept callback.
        pub fn ws(&self, patterns: impl IntoPatterns) -> TransportResult<LayerHandle> {
            self.register_layer(patterns, None)
        }

        /// Registers a WebSocket layer whose callback runs for every accepted
        /// socket.
        pub fn ws_with(
            &self,
            patterns: impl IntoPatterns,
            on_accept: impl Fn(&WsSocket, &UpgradeRequest) + Send + Sync + 'static,
        ) -> TransportResult<LayerHandle> {
            self.register_layer(patterns, Some(Arc::new(on_accept)))
        }
    };
}

struct RouterInner {
    routes: Arc<RouteTable>,
    layers: Arc<LayerRegistry>,
    config: RwLock<ServerConfig>,
}

/// The route table and layer registry of one listener.
///
/// Cloning is cheap; clones share the same table and registry.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routes: RouteTable::new(),
                layers: LayerRegistry::new(),
                config: RwLock::new(config),
            }),
        }
    }

    /// Returns the network configuration.
    pub fn config(&self) -> ServerConfig {
        self.inner.config.read().clone()
    }

    /// Records the port actually bound when the configured port was `0`.
    pub(crate) fn set_bound_port(&self, port: u16) {
        self.inner.config.write().port = port;
    }

    /// Builds an absolute URL pointing back at this server.
    pub fn absolute_url(&self, path: &str) -> String {
        self.inner.config.read().absolute_url(path)
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.inner.routes
    }

    pub fn layers(&self) -> &Arc<LayerRegistry> {
        &self.inner.layers
    }

    /// Returns a registration builder bound to `scope`.
    pub fn scoped(&self, scope: &Scope) -> ScopedRouter {
        ScopedRouter {
            router: self.clone(),
            scope: scope.clone(),
        }
    }

    /// Registers a route for an explicit method set.
    pub fn route(
        &self,
        patterns: impl IntoPatterns,
        methods: impl Into<MethodFilter>,
        handler: impl Into<HandlerChain>,
    ) -> TransportResult<RouteHandle> {
        self.inner
            .routes
            .register(patterns, methods, handler.into(), None)
    }

    fn register_layer(
        &self,
        patterns: impl IntoPatterns,
        callback: Option<AcceptCallback>,
    ) -> TransportResult<LayerHandle> {
        self.inner.layers.register_layer(patterns, callback, None)
    }

    registration_methods!();

    /// Dispatches a decoded request to the route table.
    pub async fn dispatch(&self, req: RouteRequest) -> DispatchResult<Response> {
        self.inner.routes.dispatch(req).await
    }

    /// Offers an upgraded socket to the layer registry.
    pub fn accept_connection(&self, socket: &WsSocket, req: &UpgradeRequest) -> bool {
        self.inner.layers.accept_connection(socket, req)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.inner.routes.len())
            .field("layers", &self.inner.layers.len())
            .finish()
    }
}

/// A [`Router`] view whose registrations are disposed with a [`Scope`].
#[derive(Clone, Debug)]
pub struct ScopedRouter {
    router: Router,
    scope: Scope,
}

impl ScopedRouter {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the unscoped router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn absolute_url(&self, path: &str) -> String {
        self.router.absolute_url(path)
    }

    /// Registers a route for an explicit method set.
    pub fn route(
        &self,
        patterns: impl IntoPatterns,
        methods: impl Into<MethodFilter>,
        handler: impl Into<HandlerChain>,
    ) -> TransportResult<RouteHandle> {
        self.router
            .routes()
            .register(patterns, methods, handler.into(), Some(&self.scope))
    }

    fn register_layer(
        &self,
        patterns: impl IntoPatterns,
        callback: Option<AcceptCallback>,
    ) -> TransportResult<LayerHandle> {
        self.router
            .layers()
            .register_layer(patterns, callback, Some(&self.scope))
    }

    registration_methods!();
}
