//! Accepted WebSocket connections.
//!
//! A [`WsSocket`] is a cloneable handle used by plugins; the matching
//! [`SocketDriver`] owns the channel ends and pumps frames between the handle
//! and the network connection. When the driver finishes (peer disconnect,
//! [`WsSocket::close`], or the driver being dropped) the socket's close
//! listeners run exactly once.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::http::HeaderMap;
use futures::{SinkExt, StreamExt};
use hearth_core::PathParams;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Capacity of the per-socket outgoing and incoming queues.
const QUEUE_CAPACITY: usize = 256;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    fn next() -> Self {
        Self(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws#{}", self.0)
    }
}

/// Error returned when a frame cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("socket is closed")]
    Closed,
    #[error("socket send queue is full")]
    Full,
}

// =============================================================================
// UpgradeRequest
// =============================================================================

/// The handshake request that opened a socket.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    params: PathParams,
}

impl UpgradeRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Parameters captured by the accepting layer's pattern.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }
}

// =============================================================================
// WsSocket
// =============================================================================

type CloseListener = Box<dyn FnOnce(SocketId) + Send>;

struct SocketShared {
    id: SocketId,
    path: String,
    remote_addr: Option<SocketAddr>,
    outgoing: mpsc::Sender<Message>,
    incoming: Mutex<Option<mpsc::Receiver<Message>>>,
    cancel: CancellationToken,
    finished: AtomicBool,
    listeners: Mutex<Vec<CloseListener>>,
}

impl SocketShared {
    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let listeners = std::mem::take(&mut *self.listeners.lock());
        trace!(socket = %self.id, listeners = listeners.len(), "Socket finished");
        for listener in listeners {
            listener(self.id);
        }
    }
}

/// Handle to an accepted WebSocket connection.
#[derive(Clone)]
pub struct WsSocket {
    shared: Arc<SocketShared>,
}

impl WsSocket {
    /// Creates a socket handle and the driver that serves it.
    ///
    /// The server calls this for every upgraded connection; it is public so a
    /// socket can be driven without a network connection.
    pub fn channel(
        path: impl Into<String>,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, SocketDriver) {
        let (out_tx, out_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(QUEUE_CAPACITY);
        let shared = Arc::new(SocketShared {
            id: SocketId::next(),
            path: path.into(),
            remote_addr,
            outgoing: out_tx,
            incoming: Mutex::new(Some(in_rx)),
            cancel: CancellationToken::new(),
            finished: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        });
        let driver = SocketDriver {
            shared: Arc::clone(&shared),
            outgoing: out_rx,
            incoming: in_tx,
        };
        (Self { shared }, driver)
    }

    pub fn id(&self) -> SocketId {
        self.shared.id
    }

    /// Request path of the handshake.
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    /// Queues a frame, waiting for queue space.
    pub async fn send(&self, message: Message) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.shared
            .outgoing
            .send(message)
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Queues a frame without waiting.
    pub fn try_send(&self, message: Message) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.shared.outgoing.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queues a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(Message::text(text.into())).await
    }

    /// Requests an immediate close. Safe to call repeatedly.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }

    /// Returns `true` once a close was requested or the connection ended.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Waits until the socket is closed.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// Takes the inbound message stream. Only the first caller receives it.
    ///
    /// Inbound frames arriving while nobody holds the stream are queued up
    /// to a fixed capacity, then dropped.
    pub fn take_incoming(&self) -> Option<mpsc::Receiver<Message>> {
        self.shared.incoming.lock().take()
    }

    /// Registers a listener that runs once when the connection ends.
    ///
    /// Runs immediately if it has already ended.
    pub fn on_close(&self, listener: impl FnOnce(SocketId) + Send + 'static) {
        {
            let mut listeners = self.shared.listeners.lock();
            if !self.shared.finished.load(Ordering::SeqCst) {
                listeners.push(Box::new(listener));
                return;
            }
        }
        listener(self.shared.id);
    }
}

impl fmt::Debug for WsSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSocket")
            .field("id", &self.shared.id)
            .field("path", &self.shared.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// SocketDriver
// =============================================================================

/// Owns the channel ends of a [`WsSocket`].
///
/// Dropping the driver ends the socket and runs its close listeners.
pub struct SocketDriver {
    shared: Arc<SocketShared>,
    outgoing: mpsc::Receiver<Message>,
    incoming: mpsc::Sender<Message>,
}

impl SocketDriver {
    pub fn id(&self) -> SocketId {
        self.shared.id
    }

    /// Receives the next frame queued by the socket handle.
    pub async fn recv_outgoing(&mut self) -> Option<Message> {
        self.outgoing.recv().await
    }

    /// Delivers an inbound frame to the socket's incoming stream.
    pub fn push_incoming(&self, message: Message) -> bool {
        self.incoming.try_send(message).is_ok()
    }

    /// Pumps frames between the socket handle and `ws` until either side
    /// closes.
    pub async fn run(mut self, ws: WebSocket) {
        let (mut sink, mut stream) = ws.split();
        let cancel = self.shared.cancel.clone();
        let id = self.shared.id;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                outgoing = self.outgoing.recv() => {
                    let Some(message) = outgoing else { break };
                    if let Err(e) = sink.send(message).await {
                        debug!(socket = %id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(message)) => {
                        if !self.push_incoming(message) {
                            trace!(socket = %id, "Inbound frame dropped");
                        }
                    }
                    Some(Err(e)) => {
                        debug!(socket = %id, error = %e, "WebSocket receive failed");
                        break;
                    }
                }
            }
        }
        debug!(socket = %id, "WebSocket connection ended");
    }
}

impl Drop for SocketDriver {
    fn drop(&mut self) {
        self.shared.finish();
    }
}

impl fmt::Debug for SocketDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketDriver")
            .field("id", &self.shared.id)
            .finish()
    }
}
