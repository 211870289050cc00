//! Configuration for the Hearth runtime.
//!
//! Layered loading (files, environment, programmatic overrides) through
//! figment, a serde schema for the shared listener, logging and per-plugin
//! sections, and validation of the loaded result.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    HearthConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, NetworkConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
