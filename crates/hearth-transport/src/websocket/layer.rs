//! WebSocket layers and the layer registry.
//!
//! A layer pairs a path matcher with the set of sockets it has accepted.
//! Layers are scanned in registration order when a handshake arrives; the
//! first one whose pattern matches takes the socket.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use axum::extract::ws::Message;
use hearth_core::{IntoPatterns, PathMatcher, Scope};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::socket::{SocketId, UpgradeRequest, WsSocket};
use crate::error::TransportResult;

/// Callback run when a layer accepts a socket.
pub type AcceptCallback = Arc<dyn Fn(&WsSocket, &UpgradeRequest) + Send + Sync>;

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    fn next() -> Self {
        Self(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

// =============================================================================
// WsLayer
// =============================================================================

struct Members {
    closed: bool,
    sockets: BTreeMap<SocketId, WsSocket>,
}

/// A path matcher plus the sockets it currently holds.
pub struct WsLayer {
    id: LayerId,
    matcher: PathMatcher,
    callback: Option<AcceptCallback>,
    members: Mutex<Members>,
}

impl WsLayer {
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    /// Returns the current member sockets ordered by id.
    pub fn sockets(&self) -> Vec<WsSocket> {
        self.members.lock().sockets.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.lock().sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().sockets.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.members.lock().closed
    }

    /// Adds a socket unless the layer is already closed.
    fn admit(&self, socket: &WsSocket) -> bool {
        let mut members = self.members.lock();
        if members.closed {
            return false;
        }
        members.sockets.insert(socket.id(), socket.clone());
        true
    }

    fn forget(&self, id: SocketId) {
        self.members.lock().sockets.remove(&id);
    }

    /// Marks the layer closed and takes its members.
    ///
    /// Returns `None` if it was already closed.
    fn shut(&self) -> Option<Vec<WsSocket>> {
        let mut members = self.members.lock();
        if members.closed {
            return None;
        }
        members.closed = true;
        Some(std::mem::take(&mut members.sockets).into_values().collect())
    }
}

impl fmt::Debug for WsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsLayer")
            .field("id", &self.id)
            .field("pattern", &self.matcher.to_string())
            .field("sockets", &self.len())
            .finish()
    }
}

// =============================================================================
// LayerHandle
// =============================================================================

/// Handle returned by layer registration.
///
/// Lets the owner enumerate and message the layer's sockets, and close the
/// layer explicitly.
#[derive(Clone)]
pub struct LayerHandle {
    layer: Arc<WsLayer>,
    registry: Weak<LayerRegistry>,
}

impl LayerHandle {
    pub fn id(&self) -> LayerId {
        self.layer.id
    }

    /// Currently connected sockets.
    pub fn sockets(&self) -> Vec<WsSocket> {
        self.layer.sockets()
    }

    pub fn len(&self) -> usize {
        self.layer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.layer.is_closed()
    }

    /// Queues a text frame on every member socket.
    ///
    /// Returns how many sockets accepted the frame.
    pub fn broadcast(&self, text: &str) -> usize {
        self.layer
            .sockets()
            .iter()
            .filter(|socket| socket.try_send(Message::text(text)).is_ok())
            .count()
    }

    /// Closes the layer and all of its sockets.
    ///
    /// Returns `false` if the layer was already closed.
    pub fn close(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.close_layer(self.layer.id),
            None => close_sockets(&self.layer),
        }
    }
}

impl fmt::Debug for LayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LayerHandle").field(&self.layer).finish()
    }
}

fn close_sockets(layer: &WsLayer) -> bool {
    let Some(sockets) = layer.shut() else {
        return false;
    };
    for socket in &sockets {
        socket.close();
    }
    info!(layer = %layer.id, sockets = sockets.len(), "WebSocket layer closed");
    true
}

// =============================================================================
// LayerRegistry
// =============================================================================

/// Ordered, copy-on-write collection of WebSocket layers.
#[derive(Default)]
pub struct LayerRegistry {
    layers: RwLock<Arc<Vec<Arc<WsLayer>>>>,
}

impl LayerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends a layer.
    ///
    /// When `scope` is given, disposing it closes the layer.
    pub fn register_layer(
        self: &Arc<Self>,
        patterns: impl IntoPatterns,
        callback: Option<AcceptCallback>,
        scope: Option<&Scope>,
    ) -> TransportResult<LayerHandle> {
        let matcher = PathMatcher::compile(patterns)?;
        let layer = Arc::new(WsLayer {
            id: LayerId::next(),
            matcher,
            callback,
            members: Mutex::new(Members {
                closed: false,
                sockets: BTreeMap::new(),
            }),
        });
        let id = layer.id;

        {
            let mut layers = self.layers.write();
            let mut next = Vec::with_capacity(layers.len() + 1);
            next.extend(layers.iter().cloned());
            next.push(Arc::clone(&layer));
            *layers = Arc::new(next);
        }
        debug!(layer = %id, pattern = %layer.matcher, "WebSocket layer registered");

        if let Some(scope) = scope {
            let registry = Arc::downgrade(self);
            scope.defer(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.close_layer(id);
                }
            });
        }

        Ok(LayerHandle {
            layer,
            registry: Arc::downgrade(self),
        })
    }

    /// Offers a freshly upgraded socket to the layers in registration order.
    ///
    /// The first open layer whose pattern matches the request path takes the
    /// socket, removes it again when it closes, and runs its accept callback.
    /// Returns `false` when no layer matches.
    pub fn accept_connection(&self, socket: &WsSocket, req: &UpgradeRequest) -> bool {
        let snapshot = self.layers();
        for layer in snapshot.iter() {
            let Some(params) = layer.matcher.captures(req.path()) else {
                continue;
            };
            if !layer.admit(socket) {
                continue;
            }

            let weak = Arc::downgrade(layer);
            socket.on_close(move |id| {
                if let Some(layer) = weak.upgrade() {
                    layer.forget(id);
                }
            });
            debug!(
                layer = %layer.id,
                socket = %socket.id(),
                path = %req.path(),
                "WebSocket accepted"
            );

            if let Some(callback) = &layer.callback {
                let mut req = req.clone();
                req.set_params(params);
                if catch_unwind(AssertUnwindSafe(|| callback(socket, &req))).is_err() {
                    error!(layer = %layer.id, socket = %socket.id(), "Accept callback panicked");
                }
            }
            return true;
        }
        debug!(path = %req.path(), "No WebSocket layer matches");
        false
    }

    /// Removes a layer, then closes its sockets.
    ///
    /// Returns `false` if the layer is not registered.
    pub fn close_layer(&self, id: LayerId) -> bool {
        let layer = {
            let mut layers = self.layers.write();
            let Some(pos) = layers.iter().position(|l| l.id == id) else {
                return false;
            };
            let mut next = Vec::clone(&layers);
            let layer = next.remove(pos);
            *layers = Arc::new(next);
            layer
        };
        close_sockets(&layer)
    }

    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.read().is_empty()
    }

    /// Returns a snapshot of the layers in scan order.
    pub fn layers(&self) -> Arc<Vec<Arc<WsLayer>>> {
        Arc::clone(&self.layers.read())
    }
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("layers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::socket::SocketDriver;

    fn connect(registry: &LayerRegistry, path: &str) -> (WsSocket, SocketDriver, bool) {
        let (socket, driver) = WsSocket::channel(path, None);
        let accepted = registry.accept_connection(&socket, &UpgradeRequest::new(path));
        (socket, driver, accepted)
    }

    #[test]
    fn test_first_registered_layer_wins() {
        let registry = LayerRegistry::new();
        let a = registry.register_layer("/chat/:room", None, None).unwrap();
        let b = registry.register_layer("/chat/*", None, None).unwrap();

        let (_socket, _driver, accepted) = connect(&registry, "/chat/general");
        assert!(accepted);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn test_unmatched_path_is_rejected() {
        let registry = LayerRegistry::new();
        let layer = registry.register_layer("/chat/:room", None, None).unwrap();
        let (_socket, _driver, accepted) = connect(&registry, "/other");
        assert!(!accepted);
        assert!(layer.is_empty());
    }

    #[test]
    fn test_disconnect_removes_member() {
        let registry = LayerRegistry::new();
        let layer = registry.register_layer("/chat/:room", None, None).unwrap();
        let (socket, driver, _) = connect(&registry, "/chat/a");
        let (_other, _other_driver, _) = connect(&registry, "/chat/b");
        assert_eq!(layer.len(), 2);

        drop(driver);
        assert_eq!(layer.len(), 1);
        assert!(layer.sockets().iter().all(|s| s.id() != socket.id()));
    }

    #[test]
    fn test_close_layer_removes_then_closes() {
        let registry = LayerRegistry::new();
        let layer = registry.register_layer("/chat/:room", None, None).unwrap();
        let (socket, _driver, _) = connect(&registry, "/chat/a");

        assert!(layer.close());
        assert!(!layer.close());
        assert!(socket.is_closed());
        assert!(layer.is_empty());
        assert!(registry.is_empty());

        let (_socket, _driver, accepted) = connect(&registry, "/chat/a");
        assert!(!accepted);
    }

    #[test]
    fn test_scope_disposal_closes_layers() {
        let registry = LayerRegistry::new();
        let scope = Scope::new("plugin");
        let keep = registry.register_layer("/keep", None, None).unwrap();
        let owned = registry
            .register_layer(["/owned", "/also"], None, Some(&scope))
            .unwrap();
        let (socket, _driver, _) = connect(&registry, "/also");
        assert_eq!(owned.len(), 1);

        scope.dispose();
        scope.dispose();
        assert!(socket.is_closed());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.layers()[0].id(), keep.id());
    }

    #[test]
    fn test_callback_receives_params() {
        let registry = LayerRegistry::new();
        let rooms = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&rooms);
        let callback: AcceptCallback = Arc::new(move |_socket: &WsSocket, req: &UpgradeRequest| {
            r.lock().push(req.param("room").unwrap_or_default().to_string());
        });
        registry
            .register_layer("/chat/:room", Some(callback), None)
            .unwrap();

        let (_socket, _driver, accepted) = connect(&registry, "/chat/general");
        assert!(accepted);
        assert_eq!(*rooms.lock(), vec!["general"]);
    }

    #[test]
    fn test_panicking_callback_keeps_socket() {
        let registry = LayerRegistry::new();
        let callback: AcceptCallback =
            Arc::new(|_socket: &WsSocket, _req: &UpgradeRequest| panic!("bad callback"));
        let layer = registry.register_layer("/x", Some(callback), None).unwrap();
        let (_socket, _driver, accepted) = connect(&registry, "/x");
        assert!(accepted);
        assert_eq!(layer.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast() {
        let registry = LayerRegistry::new();
        let layer = registry.register_layer("/feed", None, None).unwrap();
        let (_a, mut driver_a, _) = connect(&registry, "/feed");
        let (_b, mut driver_b, _) = connect(&registry, "/feed");

        assert_eq!(layer.broadcast("tick"), 2);
        assert_eq!(driver_a.recv_outgoing().await, Some(Message::text("tick")));
        assert_eq!(driver_b.recv_outgoing().await, Some(Message::text("tick")));
    }
}
