//! The shared listener.
//!
//! One [`Server`] owns one TCP listener and serves one [`Router`]. Every
//! inbound connection is either:
//!
//! ```text
//! plain HTTP   → body decoding → route table → handler chain → response
//! WS handshake → upgrade       → layer registry (first match) → socket pump
//!                               └ no match → close immediately
//! ```
//!
//! A process-wide registry of bound addresses (weak references, so a dropped
//! server frees its address) rejects a second live server on the same address.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock, Weak};

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::{TransportError, TransportResult};
use crate::http::RouteRequest;
use crate::router::Router;
use crate::websocket::{UpgradeRequest, WsSocket};

// ─── Lifecycle ────────────────────────────────────────────────────────────────

/// Server lifecycle: `Unbound → Bound → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No listener exists yet.
    Unbound,
    /// The listener is accepting connections.
    Bound,
    /// The listener has been shut down.
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unbound => "unbound",
            Self::Bound => "bound",
            Self::Closed => "closed",
        })
    }
}

/// One entry per live listener in [`SERVER_REGISTRY`].
struct ServerEntry {
    local_addr: SocketAddr,
    shutdown_token: CancellationToken,
}

impl Drop for ServerEntry {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

// ─── Global registry ──────────────────────────────────────────────────────────

/// Bind address (as requested and as resolved) → live listener.
static SERVER_REGISTRY: LazyLock<Mutex<HashMap<String, Weak<ServerEntry>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn is_live(addr: &str) -> bool {
    SERVER_REGISTRY
        .lock()
        .get(addr)
        .is_some_and(|weak| weak.strong_count() > 0)
}

// ─── Server ───────────────────────────────────────────────────────────────────

/// A bound listener serving a [`Router`].
pub struct Server {
    entry: Arc<ServerEntry>,
    keys: Vec<String>,
    router: Router,
    state: Mutex<ServerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Binds the router's configured address and starts serving.
    ///
    /// With port `0` the OS picks a port; the router's configuration is
    /// updated so [`Router::absolute_url`] reflects it.
    pub async fn bind(router: Router) -> TransportResult<Self> {
        let config = router.config();
        let requested = config.bind_addr();
        if config.port != 0 && is_live(&requested) {
            return Err(TransportError::AlreadyBound { addr: requested });
        }

        let listener = TcpListener::bind(&requested).await?;
        let local_addr = listener.local_addr()?;
        if config.port == 0 {
            router.set_bound_port(local_addr.port());
        }

        let shutdown_token = CancellationToken::new();
        let entry = Arc::new(ServerEntry {
            local_addr,
            shutdown_token: shutdown_token.clone(),
        });

        let mut keys = vec![local_addr.to_string()];
        if config.port != 0 && requested != keys[0] {
            keys.push(requested);
        }
        {
            let mut registry = SERVER_REGISTRY.lock();
            registry.retain(|_, weak| weak.strong_count() > 0);
            for key in &keys {
                registry.insert(key.clone(), Arc::downgrade(&entry));
            }
        }

        let app = app(router.clone());
        let task = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            );
            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "Server error");
                    }
                }
                () = shutdown_token.cancelled() => {
                    info!(addr = %local_addr, "Server shutting down");
                }
            }
        });

        info!(addr = %local_addr, "Server listening");
        Ok(Self {
            entry,
            keys,
            router,
            state: Mutex::new(ServerState::Bound),
            task: Mutex::new(Some(task)),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.entry.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Stops accepting connections and releases the address.
    ///
    /// Calling it again does nothing.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == ServerState::Closed {
                return;
            }
            *state = ServerState::Closed;
        }

        self.entry.shutdown_token.cancel();
        {
            let mut registry = SERVER_REGISTRY.lock();
            for key in &self.keys {
                let ours = registry
                    .get(key)
                    .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&self.entry)));
                if ours {
                    registry.remove(key);
                }
            }
        }

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(error = %e, "Server task failed");
        }
        info!(addr = %self.entry.local_addr, "Server closed");
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.entry.local_addr)
            .field("state", &self.state())
            .finish()
    }
}

// ─── Request pipeline ─────────────────────────────────────────────────────────

/// Builds the axum application serving `router`.
///
/// Every path and method reaches the same fallback handler, which splits
/// upgrade handshakes from plain requests.
pub fn app(router: Router) -> axum::Router {
    axum::Router::new()
        .fallback(entry_point)
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn entry_point(State(router): State<Router>, req: Request) -> Response {
    if is_websocket_upgrade(req.headers()) {
        return upgrade(router, req).await;
    }

    let limit = router.config().max_body_size;
    let req = match RouteRequest::from_http(req, limit).await {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, "Rejected request body");
            return e.into_response();
        }
    };
    match router.dispatch(req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    connection_upgrade && upgrade_websocket
}

/// Completes the handshake, then offers the socket to the layer registry.
async fn upgrade(router: Router, req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let upgrade_req = UpgradeRequest::new(parts.uri.path())
        .with_query(parts.uri.query().map(str::to_string))
        .with_headers(parts.headers.clone())
        .with_remote_addr(remote_addr);

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |mut socket| async move {
        let (handle, driver) = WsSocket::channel(upgrade_req.path(), remote_addr);
        if !router.accept_connection(&handle, &upgrade_req) {
            debug!(path = %upgrade_req.path(), "WebSocket upgrade rejected");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        driver.run(socket).await;
    })
}
