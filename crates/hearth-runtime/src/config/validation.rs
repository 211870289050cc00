//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{HearthConfig, LogOutput, LoggingConfig, NetworkConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &HearthConfig) -> ConfigResult<()> {
    validate_network_config(&config.network)?;
    validate_logging_config(&config.logging)?;

    if config.plugins.keys().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation("Plugin section names must not be empty"));
    }

    Ok(())
}

fn validate_network_config(network: &NetworkConfig) -> ConfigResult<()> {
    if network.host.trim().is_empty() {
        return Err(ConfigError::validation("network.host must not be empty"));
    }

    if network.max_body_size == 0 {
        return Err(ConfigError::validation(
            "network.max_body_size must be greater than 0",
        ));
    }

    if let Some(url) = &network.self_url {
        validate_http_url(url)?;
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }
    Ok(())
}

/// Validates an HTTP(S) base URL.
fn validate_http_url(url: &str) -> ConfigResult<()> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| ConfigError::invalid_url(url, "URL must start with http:// or https://"))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(ConfigError::invalid_url(url, "URL has no host"));
    }

    Ok(())
}
