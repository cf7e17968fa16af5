use crate::config::types::{Config, CrawlerConfig, DriverKind, OutputConfig, ServerConfig};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_server_config(&config.server)?;
    validate_crawler_config(&config.crawler)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the app origin
fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_path)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-path: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-path must use http or https, got '{}'",
            config.base_path
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base-path has no host: '{}'",
            config.base_path
        )));
    }

    if url.path() != "/" || url.query().is_some() {
        return Err(ConfigError::Validation(format!(
            "base-path must not contain a path, use public-path instead: '{}'",
            config.base_path
        )));
    }

    if config.port == Some(0) {
        return Err(ConfigError::Validation("port must be non-zero".to_string()));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.include.is_empty() {
        return Err(ConfigError::Validation(
            "include should be a non-empty array".to_string(),
        ));
    }

    for include in &config.include {
        if !include.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "include entries must start with '/', got '{}'",
                include
            )));
        }
    }

    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.navigation_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "navigation-timeout-ms must be greater than 0".to_string(),
        ));
    }

    for pattern in &config.exclude {
        validate_pattern(pattern)?;
    }

    if let Some(pattern) = &config.wait_for_response_url {
        validate_pattern(pattern)?;
    }

    if config.source.is_empty() {
        return Err(ConfigError::Validation("source cannot be empty".to_string()));
    }

    if config.driver == DriverKind::Chromium && !cfg!(feature = "chromium") {
        return Err(ConfigError::Validation(
            "driver 'chromium' requires building with the 'chromium' feature".to_string(),
        ));
    }

    if config.viewport.width == 0 || config.viewport.height == 0 {
        return Err(ConfigError::Validation(format!(
            "viewport must be non-empty, got {}x{}",
            config.viewport.width, config.viewport.height
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.save_as.is_empty() {
        return Err(ConfigError::Validation(
            "save-as supported values are html, png, and jpeg".to_string(),
        ));
    }

    if config.file_name.is_empty() || config.file_name.contains('/') {
        return Err(ConfigError::Validation(format!(
            "file-name must be a plain base name, got '{}'",
            config.file_name
        )));
    }

    Ok(())
}

/// Validates a regular expression pattern
fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))
}
