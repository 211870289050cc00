//! Plugin lifecycle management.
//!
//! [`PluginManager`] owns every registered plugin and drives its lifecycle:
//!
//! - Each load creates a fresh child of the manager's root [`Scope`] and
//!   hands it to the plugin through a [`PluginContext`].
//! - Unload runs `on_unload`, then disposes that scope, which removes every
//!   route, WebSocket layer and task the plugin created while leaving other
//!   plugins' registrations untouched and in order.
//! - A failing `on_load` disposes whatever the plugin registered before the
//!   failure and marks the plugin [`PluginLoadState::Failed`].
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = PluginManager::new(router, HashMap::new());
//! manager.register_plugin(StatusPlugin).await?;
//! manager.start_all().await;
//! // …later…
//! manager.stop_all().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use hearth_core::Scope;
use hearth_transport::Router;
use serde_json::Value;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, error, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Plugin, PluginContext};

/// Tracks the load state of a plugin registered with [`PluginManager`].
///
/// ```text
/// register_plugin() ──► Registered
///     load()       ──► Loading   (while on_load runs)
///                  ──► Active    (on_load succeeded)
///                  ──► Failed    (on_load failed; its registrations disposed)
///     unload()     ──► Registered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLoadState {
    /// Registered but not loaded.
    Registered,
    /// `on_load` is running.
    Loading,
    /// Loaded; its routes and layers are live.
    Active,
    /// The last load attempt failed.
    Failed,
}

// =============================================================================
// PluginEntry (internal)
// =============================================================================

struct PluginEntry {
    name: String,
    plugin: Arc<dyn Plugin>,
    state: PluginLoadState,
    /// Present while the plugin is active.
    context: Option<PluginContext>,
}

// =============================================================================
// PluginManager
// =============================================================================

/// Central owner of plugin registration and lifecycle.
///
/// `plugin_configs` maps plugin name → the `plugins.<name>` section of the
/// host configuration.
pub struct PluginManager {
    plugins: AsyncRwLock<Vec<PluginEntry>>,
    plugin_configs: HashMap<String, Value>,
    router: Router,
    root: Scope,
}

impl PluginManager {
    /// Creates a manager whose plugins register on `router`.
    pub fn new(router: Router, plugin_configs: HashMap<String, Value>) -> Self {
        Self {
            plugins: AsyncRwLock::new(Vec::new()),
            plugin_configs,
            router,
            root: Scope::new("plugins"),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a plugin in state [`PluginLoadState::Registered`].
    ///
    /// It is not loaded until [`load`](Self::load) or
    /// [`start_all`](Self::start_all) is called.
    pub async fn register_plugin(&self, plugin: impl Plugin) -> PluginResult<()> {
        self.register_arc(Arc::new(plugin)).await
    }

    /// Registers an already shared plugin.
    pub async fn register_arc(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        let name = plugin.name().to_string();
        let mut plugins = self.plugins.write().await;
        if plugins.iter().any(|e| e.name == name) {
            return Err(PluginError::AlreadyRegistered { name });
        }
        plugins.push(PluginEntry {
            name: name.clone(),
            plugin,
            state: PluginLoadState::Registered,
            context: None,
        });
        info!(plugin = %name, "Plugin registered");
        Ok(())
    }

    /// Removes a plugin, unloading it first if it is active.
    pub async fn remove_plugin(&self, name: &str) -> PluginResult<()> {
        self.unload(name).await?;
        let mut plugins = self.plugins.write().await;
        if let Some(pos) = plugins.iter().position(|e| e.name == name) {
            plugins.remove(pos);
            info!(plugin = %name, "Plugin removed");
        }
        Ok(())
    }

    /// Returns the number of registered plugins (in any state).
    pub async fn plugin_count(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Returns plugin names in registration order.
    pub async fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Returns the load state of the named plugin, or `None` if not found.
    pub async fn plugin_state(&self, name: &str) -> Option<PluginLoadState> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.state)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Loads one plugin. Loading an active plugin does nothing.
    ///
    /// Fails with [`PluginError::AlreadyLoading`] while another load of the
    /// same plugin is in progress.
    pub async fn load(&self, name: &str) -> PluginResult<()> {
        let plugin = {
            let mut plugins = self.plugins.write().await;
            let entry = plugins
                .iter_mut()
                .find(|e| e.name == name)
                .ok_or_else(|| PluginError::NotFound {
                    name: name.to_string(),
                })?;
            match entry.state {
                PluginLoadState::Active => {
                    debug!(plugin = %name, "Plugin already active");
                    return Ok(());
                }
                PluginLoadState::Loading => {
                    return Err(PluginError::AlreadyLoading {
                        name: name.to_string(),
                    });
                }
                PluginLoadState::Registered | PluginLoadState::Failed => {}
            }
            entry.state = PluginLoadState::Loading;
            Arc::clone(&entry.plugin)
        };

        let scope = self.root.child(name);
        let config = Arc::new(self.plugin_configs.get(name).cloned().unwrap_or(Value::Null));
        let ctx = PluginContext::new(name, scope.clone(), self.router.clone(), config);

        let result = plugin.on_load(&ctx).await;

        let mut plugins = self.plugins.write().await;
        let Some(entry) = plugins.iter_mut().find(|e| e.name == name) else {
            warn!(plugin = %name, "Plugin removed while loading");
            scope.dispose();
            return Err(PluginError::NotFound {
                name: name.to_string(),
            });
        };

        match result {
            Ok(()) => {
                entry.state = PluginLoadState::Active;
                entry.context = Some(ctx);
                info!(plugin = %name, registrations = scope.pending(), "Plugin loaded and active");
                Ok(())
            }
            Err(source) => {
                scope.dispose();
                entry.state = PluginLoadState::Failed;
                error!(plugin = %name, error = %source, "Plugin failed to load");
                Err(PluginError::LoadFailed {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Unloads one plugin. Unloading an inactive plugin does nothing.
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let (plugin, ctx) = {
            let mut plugins = self.plugins.write().await;
            let entry = plugins
                .iter_mut()
                .find(|e| e.name == name)
                .ok_or_else(|| PluginError::NotFound {
                    name: name.to_string(),
                })?;
            let Some(ctx) = entry.context.take() else {
                return Ok(());
            };
            entry.state = PluginLoadState::Registered;
            (Arc::clone(&entry.plugin), ctx)
        };

        plugin.on_unload(&ctx).await;
        ctx.scope().dispose();
        info!(plugin = %name, "Plugin unloaded");
        Ok(())
    }

    /// Loads every plugin still in [`PluginLoadState::Registered`], in
    /// registration order.
    ///
    /// Failures are logged and do not stop the remaining plugins.
    pub async fn start_all(&self) {
        let pending: Vec<String> = {
            let plugins = self.plugins.read().await;
            plugins
                .iter()
                .filter(|e| e.state == PluginLoadState::Registered)
                .map(|e| e.name.clone())
                .collect()
        };
        for name in pending {
            // Errors are logged inside `load`.
            let _ = self.load(&name).await;
        }
    }

    /// Unloads every active plugin in reverse registration order.
    pub async fn stop_all(&self) {
        let active: Vec<String> = {
            let plugins = self.plugins.read().await;
            plugins
                .iter()
                .rev()
                .filter(|e| e.state == PluginLoadState::Active)
                .map(|e| e.name.clone())
                .collect()
        };
        for name in active {
            if let Err(e) = self.unload(&name).await {
                warn!(plugin = %name, error = %e, "Failed to unload plugin");
            }
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.root.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearth_transport::{Method, RouteRequest, handler_fn};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::convert::Infallible;
    use tower::BoxError;

    /// Registers one GET route and one WebSocket layer under `/<name>`.
    struct RoutePlugin {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for RoutePlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            let body = self.name;
            ctx.router().get(
                format!("/{}", self.name),
                handler_fn(move |_req| async move { Ok::<_, Infallible>(body) }),
            )?;
            ctx.router().ws(format!("/{}/ws", self.name))?;
            self.log.lock().push(format!("load {}", self.name));
            Ok(())
        }

        async fn on_unload(&self, _ctx: &PluginContext) {
            self.log.lock().push(format!("unload {}", self.name));
        }
    }

    /// Registers a route, then fails.
    struct BrokenPlugin;

    #[async_trait]
    impl Plugin for BrokenPlugin {
        fn name(&self) -> &str {
            "broken"
        }

        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.router()
                .get("/broken", handler_fn(|_req| async { Ok::<_, Infallible>("x") }))?;
            Err("missing credentials".into())
        }
    }

    #[derive(Default, Deserialize)]
    struct Greeting {
        text: String,
    }

    struct ConfiguredPlugin {
        seen: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl Plugin for ConfiguredPlugin {
        fn name(&self) -> &str {
            "greeter"
        }

        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            let greeting: Greeting = ctx.config()?;
            *self.seen.lock() = Some(greeting.text);
            Ok(())
        }
    }

    fn manager() -> (PluginManager, Router) {
        let router = Router::default();
        (PluginManager::new(router.clone(), HashMap::new()), router)
    }

    fn route_plugin(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> RoutePlugin {
        RoutePlugin {
            name,
            log: Arc::clone(log),
        }
    }

    fn route_paths(router: &Router) -> Vec<String> {
        router
            .routes()
            .routes()
            .iter()
            .map(|r| r.matcher().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_register_and_start() {
        let (manager, router) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_plugin(route_plugin("a", &log)).await.unwrap();
        manager.register_plugin(route_plugin("b", &log)).await.unwrap();
        assert_eq!(manager.plugin_count().await, 2);
        assert_eq!(manager.plugin_state("a").await, Some(PluginLoadState::Registered));

        manager.start_all().await;
        assert_eq!(manager.plugin_state("a").await, Some(PluginLoadState::Active));
        assert_eq!(route_paths(&router), vec!["/a", "/b"]);
        assert_eq!(router.layers().len(), 2);
        assert!(
            router
                .dispatch(RouteRequest::new(Method::GET, "/b"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (manager, _router) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_plugin(route_plugin("a", &log)).await.unwrap();
        let err = manager
            .register_plugin(route_plugin("a", &log))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn test_unload_removes_only_own_registrations() {
        let (manager, router) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            manager.register_plugin(route_plugin(name, &log)).await.unwrap();
        }
        manager.start_all().await;

        manager.unload("b").await.unwrap();
        assert_eq!(manager.plugin_state("b").await, Some(PluginLoadState::Registered));
        assert_eq!(route_paths(&router), vec!["/a", "/c"]);
        assert_eq!(router.layers().len(), 2);

        // Unloading twice is a no-op.
        manager.unload("b").await.unwrap();
        assert_eq!(route_paths(&router), vec!["/a", "/c"]);

        // Reload appends again.
        manager.load("b").await.unwrap();
        assert_eq!(route_paths(&router), vec!["/a", "/c", "/b"]);
    }

    #[tokio::test]
    async fn test_stop_all_runs_in_reverse_order() {
        let (manager, router) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_plugin(route_plugin("a", &log)).await.unwrap();
        manager.register_plugin(route_plugin("b", &log)).await.unwrap();
        manager.start_all().await;
        manager.stop_all().await;

        assert_eq!(
            *log.lock(),
            vec!["load a", "load b", "unload b", "unload a"]
        );
        assert!(router.routes().is_empty());
        assert!(router.layers().is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_disposes_partial_registrations() {
        let (manager, router) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_plugin(BrokenPlugin).await.unwrap();
        manager.register_plugin(route_plugin("ok", &log)).await.unwrap();

        manager.start_all().await;
        assert_eq!(manager.plugin_state("broken").await, Some(PluginLoadState::Failed));
        assert_eq!(manager.plugin_state("ok").await, Some(PluginLoadState::Active));
        assert_eq!(route_paths(&router), vec!["/ok"]);

        let err = manager.load("broken").await.unwrap_err();
        assert!(matches!(err, PluginError::LoadFailed { ref name, .. } if name == "broken"));
        assert_eq!(route_paths(&router), vec!["/ok"]);
    }

    #[tokio::test]
    async fn test_remove_plugin_unloads_first() {
        let (manager, router) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_plugin(route_plugin("a", &log)).await.unwrap();
        manager.start_all().await;

        manager.remove_plugin("a").await.unwrap();
        assert_eq!(manager.plugin_count().await, 0);
        assert!(router.routes().is_empty());
        assert!(matches!(
            manager.remove_plugin("a").await,
            Err(PluginError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_plugin_receives_config_section() {
        let router = Router::default();
        let configs = HashMap::from([(
            "greeter".to_string(),
            serde_json::json!({"text": "hello"}),
        )]);
        let manager = PluginManager::new(router, configs);
        let seen = Arc::new(Mutex::new(None));
        manager
            .register_plugin(ConfiguredPlugin {
                seen: Arc::clone(&seen),
            })
            .await
            .unwrap();
        manager.load("greeter").await.unwrap();
        assert_eq!(seen.lock().as_deref(), Some("hello"));
        assert_eq!(manager.plugin_names().await, vec!["greeter"]);
    }

    /// Yields once inside `on_load` before registering its route.
    struct SlowPlugin;

    #[async_trait]
    impl Plugin for SlowPlugin {
        fn name(&self) -> &str {
            "slow"
        }

        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            tokio::task::yield_now().await;
            ctx.router()
                .get("/slow", handler_fn(|_req| async { Ok::<_, Infallible>("slow") }))?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_load_runs_once() {
        let (manager, router) = manager();
        manager.register_plugin(SlowPlugin).await.unwrap();

        let (first, second) = tokio::join!(manager.load("slow"), manager.load("slow"));
        assert!(first.is_ok());
        assert!(matches!(second, Err(PluginError::AlreadyLoading { .. })));
        assert_eq!(manager.plugin_state("slow").await, Some(PluginLoadState::Active));
        assert_eq!(route_paths(&router), vec!["/slow"]);

        manager.unload("slow").await.unwrap();
        assert!(router.routes().is_empty());
    }

    #[tokio::test]
    async fn test_reload_cycles_keep_root_scope_flat() {
        let (manager, router) = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_plugin(route_plugin("a", &log)).await.unwrap();

        for _ in 0..50 {
            manager.load("a").await.unwrap();
            manager.unload("a").await.unwrap();
        }
        assert_eq!(manager.root.pending(), 0);
        assert!(router.routes().is_empty());

        manager.load("a").await.unwrap();
        assert_eq!(manager.root.pending(), 1);
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let (manager, _router) = manager();
        assert!(matches!(
            manager.load("ghost").await,
            Err(PluginError::NotFound { .. })
        ));
        assert_eq!(manager.plugin_state("ghost").await, None);
    }
}
