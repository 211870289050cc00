//! Error types for plugin lifecycle operations.

use thiserror::Error;
use tower::BoxError;

/// Errors raised by [`PluginManager`](crate::PluginManager).
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin with this name is already registered.
    #[error("plugin '{name}' is already registered")]
    AlreadyRegistered {
        /// Plugin name.
        name: String,
    },

    /// No plugin with this name is registered.
    #[error("plugin '{name}' is not registered")]
    NotFound {
        /// Plugin name.
        name: String,
    },

    /// Another `load` of this plugin is still running.
    #[error("plugin '{name}' is already loading")]
    AlreadyLoading {
        /// Plugin name.
        name: String,
    },

    /// The plugin's `on_load` hook failed. Everything it registered before
    /// failing has been disposed.
    #[error("plugin '{name}' failed to load: {source}")]
    LoadFailed {
        /// Plugin name.
        name: String,
        /// The hook's error.
        #[source]
        source: BoxError,
    },
}

/// Result type for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;
