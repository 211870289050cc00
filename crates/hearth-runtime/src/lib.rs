//! Hearth Runtime - configuration, logging and lifecycle for the Hearth host.
//!
//! This crate provides:
//! - Layered configuration (`HearthConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`, `SpanEvents`)
//! - Process orchestration (`HearthRuntime`): one shared listener, one
//!   router and the plugins registered on it
//!
//! ```ignore
//! use hearth_runtime::HearthRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = HearthRuntime::new();
//!     runtime.register_plugin(MyPlugin).await?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, HearthConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{HearthRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
