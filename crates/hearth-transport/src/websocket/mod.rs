//! WebSocket layers and accepted sockets.

mod layer;
mod socket;

pub use layer::{AcceptCallback, LayerHandle, LayerId, LayerRegistry, WsLayer};
pub use socket::{SendError, SocketDriver, SocketId, UpgradeRequest, WsSocket};
