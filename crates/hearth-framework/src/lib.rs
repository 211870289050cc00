//! # Hearth Framework
//!
//! Plugin lifecycle for the Hearth bot host.
//!
//! A [`Plugin`] receives a [`PluginContext`] when it is loaded. Everything it
//! registers through that context (HTTP routes, WebSocket layers, spawned
//! tasks) is bound to the plugin's [`Scope`](hearth_core::Scope), so
//! unloading the plugin through the [`PluginManager`] removes exactly what it
//! created.

pub mod error;
pub mod manager;
pub mod plugin;

pub use error::{PluginError, PluginResult};
pub use manager::{PluginLoadState, PluginManager};
pub use plugin::{Plugin, PluginContext};

pub use async_trait::async_trait;
