//! Process-level orchestration: one shared listener plus the plugin host.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use hearth_runtime::HearthRuntime;
//!
//! // Auto-loads hearth.toml from the current directory
//! let runtime = HearthRuntime::new();
//! runtime.register_plugin(Status).await?;
//! runtime.run().await?;
//!
//! // Custom configuration path
//! let runtime = HearthRuntime::builder()
//!     .config_file("config/hearth.toml")
//!     .profile("production")
//!     .build()?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use hearth_framework::{Plugin, PluginManager};
use hearth_transport::{Router, Server, ServerState};
use tokio::signal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, HearthConfig};
use crate::error::RuntimeResult;
use crate::logging;

/// Owns the shared [`Router`], the [`Server`] bound to it and the
/// [`PluginManager`] whose plugins register on it.
///
/// Lifecycle: [`start`](Self::start) binds the listener, then loads every
/// registered plugin in order. [`shutdown`](Self::shutdown) unloads them in
/// reverse order, then closes the listener.
pub struct HearthRuntime {
    config: HearthConfig,
    router: Router,
    plugins: Arc<PluginManager>,
    server: AsyncMutex<Option<Server>>,
}

impl HearthRuntime {
    /// Creates a runtime from the default configuration locations.
    ///
    /// Falls back to built-in defaults when loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .with_user_config_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                HearthConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Initializes logging and builds the router and plugin manager.
    ///
    /// Nothing is bound until [`start`](Self::start).
    pub fn from_config(config: &HearthConfig) -> Self {
        logging::init_from_config(&config.logging);

        let router = Router::new(config.network.to_server_config());
        let plugins = Arc::new(PluginManager::new(
            router.clone(),
            config.plugins.clone(),
        ));

        info!(
            addr = %router.config().bind_addr(),
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            router,
            plugins,
            server: AsyncMutex::new(None),
        }
    }

    pub fn config(&self) -> &HearthConfig {
        &self.config
    }

    /// The router shared by every plugin.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Registers a plugin. It is loaded by [`start`](Self::start), or at
    /// once through [`PluginManager::load`] if the runtime is already up.
    pub async fn register_plugin(&self, plugin: impl Plugin) -> RuntimeResult<()> {
        self.plugins.register_plugin(plugin).await?;
        Ok(())
    }

    pub async fn state(&self) -> ServerState {
        self.server
            .lock()
            .await
            .as_ref()
            .map_or(ServerState::Unbound, Server::state)
    }

    /// The bound address while the runtime is running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server
            .lock()
            .await
            .as_ref()
            .filter(|s| s.state() == ServerState::Bound)
            .map(Server::local_addr)
    }

    /// Binds the listener, then loads all registered plugins.
    ///
    /// A runtime that was shut down can be started again.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut server = self.server.lock().await;
        if server.as_ref().is_some_and(|s| s.state() == ServerState::Bound) {
            warn!("Runtime is already running");
            return Ok(());
        }

        info!("Starting Hearth runtime");
        let bound = Server::bind(self.router.clone()).await?;
        let addr = bound.local_addr();
        *server = Some(bound);
        drop(server);

        self.plugins.start_all().await;

        info!(
            addr = %addr,
            plugins = self.plugins.plugin_count().await,
            "Runtime started"
        );
        Ok(())
    }

    /// Unloads all plugins in reverse order, then closes the listener.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let server = self.server.lock().await;
        let Some(server) = server.as_ref().filter(|s| s.state() == ServerState::Bound) else {
            warn!("Runtime is not running");
            return Ok(());
        };

        info!("Stopping Hearth runtime");
        self.plugins.stop_all().await;
        server.shutdown().await;

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C (or SIGTERM on Unix), then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Hearth runtime is now running. Press Ctrl+C to stop.");

        wait_for_shutdown().await;

        self.shutdown().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.shutdown().await
    }
}

impl Default for HearthRuntime {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = wait_for_ctrl_c() => {}
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`HearthRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Loads this file instead of searching.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Supplies a programmatic base configuration.
    ///
    /// Files and environment variables still override it.
    pub fn config(mut self, config: HearthConfig) -> Self {
        self.config_loader = self.config_loader.defaults(config);
        self
    }

    pub fn build(self) -> ConfigResult<HearthRuntime> {
        let config = self.config_loader.load()?;
        Ok(HearthRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use hearth_framework::{PluginContext, PluginLoadState, async_trait};
    use hearth_transport::{BoxError, TransportError, handler_fn};
    use std::convert::Infallible;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Ping;

    #[async_trait]
    impl Plugin for Ping {
        fn name(&self) -> &str {
            "ping"
        }

        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.router()
                .get("/ping", handler_fn(|_req| async { Ok::<_, Infallible>("pong") }))?;
            Ok(())
        }
    }

    fn ephemeral() -> HearthConfig {
        let mut config = HearthConfig::default();
        config.network.port = 0;
        config
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let runtime = HearthRuntime::from_config(&ephemeral());
        runtime.register_plugin(Ping).await.unwrap();
        assert_eq!(runtime.state().await, ServerState::Unbound);

        runtime.start().await.unwrap();
        assert_eq!(runtime.state().await, ServerState::Bound);
        assert_eq!(
            runtime.plugins().plugin_state("ping").await,
            Some(PluginLoadState::Active)
        );

        let addr = runtime.local_addr().await.unwrap();
        let response = get(addr, "/ping").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("pong"));
        assert_eq!(
            runtime.router().absolute_url("/ping"),
            format!("http://127.0.0.1:{}/ping", addr.port())
        );

        runtime.shutdown().await.unwrap();
        assert_eq!(runtime.state().await, ServerState::Closed);
        assert_eq!(runtime.local_addr().await, None);
        assert!(runtime.router().routes().is_empty());
        assert_eq!(
            runtime.plugins().plugin_state("ping").await,
            Some(PluginLoadState::Registered)
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let runtime = HearthRuntime::from_config(&ephemeral());
        runtime.start().await.unwrap();
        let addr = runtime.local_addr().await;
        runtime.start().await.unwrap();
        assert_eq!(runtime.local_addr().await, addr);

        runtime.shutdown().await.unwrap();
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_runtime_on_same_port() {
        let first = HearthRuntime::from_config(&ephemeral());
        first.start().await.unwrap();
        let port = first.local_addr().await.unwrap().port();

        let mut config = HearthConfig::default();
        config.network.port = port;
        let second = HearthRuntime::from_config(&config);
        let err = second.start().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Transport(TransportError::AlreadyBound { .. })
        ));
        assert_eq!(second.state().await, ServerState::Unbound);

        first.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_shutdown() {
        let runtime = HearthRuntime::from_config(&ephemeral());
        runtime.register_plugin(Ping).await.unwrap();
        runtime.start().await.unwrap();
        runtime.shutdown().await.unwrap();

        runtime.start().await.unwrap();
        assert_eq!(runtime.state().await, ServerState::Bound);
        let addr = runtime.local_addr().await.unwrap();
        assert!(get(addr, "/ping").await.ends_with("pong"));
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until() {
        let runtime = HearthRuntime::from_config(&ephemeral());
        runtime.register_plugin(Ping).await.unwrap();
        runtime.run_until(async {}).await.unwrap();
        assert!(runtime.router().routes().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_plugin() {
        let runtime = HearthRuntime::from_config(&ephemeral());
        runtime.register_plugin(Ping).await.unwrap();
        assert!(matches!(
            runtime.register_plugin(Ping).await,
            Err(RuntimeError::Plugin(_))
        ));
    }
}
