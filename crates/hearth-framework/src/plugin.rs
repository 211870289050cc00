//! The [`Plugin`] trait and the [`PluginContext`] handed to its hooks.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_core::Scope;
use hearth_transport::{Router, ScopedRouter};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::AbortHandle;
use tower::BoxError;
use tracing::trace;

/// A unit of bot functionality with a load/unload lifecycle.
///
/// Everything registered through the [`PluginContext`] during `on_load` (or
/// later, from tasks the plugin spawned through it) is bound to the plugin's
/// scope and disappears when the plugin is unloaded.
///
/// # Example
///
/// ```rust,ignore
/// struct Status;
///
/// #[async_trait]
/// impl Plugin for Status {
///     fn name(&self) -> &str {
///         "status"
///     }
///
///     async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
///         ctx.router().get("/status", handler_fn(|_req| async {
///             Ok::<_, Infallible>("ok")
///         }))?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique plugin name. Also selects the `plugins.<name>` config section.
    fn name(&self) -> &str;

    /// Called when the plugin is loaded.
    ///
    /// Returning an error marks the plugin as failed and disposes whatever it
    /// registered so far.
    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError>;

    /// Called before the plugin's scope is disposed on unload.
    async fn on_unload(&self, _ctx: &PluginContext) {}
}

/// Per-load handle given to plugin hooks.
///
/// Each load gets a fresh context with a fresh scope, so a plugin can be
/// unloaded and loaded again.
#[derive(Clone)]
pub struct PluginContext {
    name: Arc<str>,
    scope: Scope,
    router: Router,
    config: Arc<Value>,
}

impl PluginContext {
    pub(crate) fn new(name: &str, scope: Scope, router: Router, config: Arc<Value>) -> Self {
        Self {
            name: Arc::from(name),
            scope,
            router,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope owning everything this plugin registers.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Registration builder bound to this plugin's scope.
    pub fn router(&self) -> ScopedRouter {
        self.router.scoped(&self.scope)
    }

    /// Deserialises the plugin's `plugins.<name>` config section.
    ///
    /// A missing section yields `T::default()`.
    pub fn config<T: DeserializeOwned + Default>(&self) -> serde_json::Result<T> {
        match self.config.as_ref() {
            Value::Null => Ok(T::default()),
            value => T::deserialize(value),
        }
    }

    /// The raw config section (`null` when absent).
    pub fn raw_config(&self) -> &Value {
        &self.config
    }

    /// Builds an absolute URL pointing back at the shared server.
    pub fn absolute_url(&self, path: &str) -> String {
        self.router.absolute_url(path)
    }

    /// Spawns a task that is aborted when the plugin is unloaded.
    pub fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future).abort_handle();
        let abort = handle.clone();
        let plugin = Arc::clone(&self.name);
        self.scope.defer(move || {
            trace!(plugin = %plugin, "Aborting plugin task");
            abort.abort();
        });
        handle
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish()
    }
}
