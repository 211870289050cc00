//! Status Bot Example
//!
//! Two plugins sharing one listener:
//!
//! - `status`: `GET /status` answers with a JSON summary of the host
//! - `chat`: WebSocket rooms at `/chat/:room`; every text message is relayed
//!   to everyone in the same room
//!
//! # Configuration
//!
//! ```toml
//! [network]
//! port = 8080
//!
//! [plugins.status]
//! name = "my-bot"
//!
//! [plugins.chat]
//! welcome = "Be nice."
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package status-bot -- --config hearth.toml
//! curl http://127.0.0.1:8080/status
//! websocat ws://127.0.0.1:8080/chat/general
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use hearth::prelude::*;
use hearth::transport::{Json, SocketId};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Parser)]
#[command(about = "Status endpoint and chat rooms on one listener")]
struct Args {
    /// Configuration file (searched in the current directory when omitted).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(short, long)]
    profile: Option<String>,
}

// ============================================================================
// Status plugin
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct StatusSettings {
    name: Option<String>,
}

struct Status {
    started: Instant,
}

#[async_trait]
impl Plugin for Status {
    fn name(&self) -> &str {
        "status"
    }

    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let settings: StatusSettings = ctx.config()?;
        let name = settings.name.unwrap_or_else(|| "hearth".to_string());
        let started = self.started;
        let router = ctx.router().router().clone();

        ctx.router().get(
            "/status",
            handler_fn(move |_req| {
                let body = json!({
                    "name": name,
                    "uptime_secs": started.elapsed().as_secs(),
                    "routes": router.routes().len(),
                    "layers": router.layers().len(),
                });
                async move { Ok::<_, Infallible>(Json(body)) }
            }),
        )?;

        info!(url = %ctx.absolute_url("/status"), "Status endpoint ready");
        Ok(())
    }
}

// ============================================================================
// Chat plugin
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ChatSettings {
    welcome: Option<String>,
}

/// Connected sockets and the room each one joined.
type Rooms = Arc<Mutex<HashMap<SocketId, (String, WsSocket)>>>;

struct Chat;

#[async_trait]
impl Plugin for Chat {
    fn name(&self) -> &str {
        "chat"
    }

    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let settings: ChatSettings = ctx.config()?;
        let rooms: Rooms = Arc::default();
        let plugin = ctx.clone();

        ctx.router()
            .ws_with("/chat/:room", move |socket: &WsSocket, req: &UpgradeRequest| {
                let room = req.param("room").unwrap_or("lobby").to_string();
                let Some(mut incoming) = socket.take_incoming() else {
                    return;
                };

                rooms.lock().insert(socket.id(), (room.clone(), socket.clone()));
                let members = Arc::clone(&rooms);
                socket.on_close(move |id| {
                    members.lock().remove(&id);
                });
                if let Some(welcome) = &settings.welcome {
                    let _ = socket.try_send(Message::text(welcome.as_str()));
                }
                info!(socket = %socket.id(), room = %room, "Joined chat");

                let rooms = Arc::clone(&rooms);
                plugin.spawn(async move {
                    while let Some(message) = incoming.recv().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        let peers: Vec<WsSocket> = rooms
                            .lock()
                            .values()
                            .filter(|(r, _)| *r == room)
                            .map(|(_, peer)| peer.clone())
                            .collect();
                        for peer in peers {
                            if let Err(e) = peer.try_send(Message::Text(text.clone())) {
                                debug!(socket = %peer.id(), error = %e, "Dropped chat message");
                            }
                        }
                    }
                });
            })?;

        Ok(())
    }

    async fn on_unload(&self, ctx: &PluginContext) {
        info!(plugin = %ctx.name(), "Closing chat rooms");
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = HearthRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build()?;

    runtime
        .register_plugin(Status {
            started: Instant::now(),
        })
        .await?;
    runtime.register_plugin(Chat).await?;

    runtime.run().await?;

    Ok(())
}
