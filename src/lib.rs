//! Sumi-Snap: static snapshots for single-page applications
//!
//! This crate drives a headless browser across every reachable route of an
//! already-built SPA and writes a finalized HTML (or image) artifact per route,
//! so the app can be served to crawlers without running its JavaScript.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod finalize;
pub mod output;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Snap operations
#[derive(Debug, Error)]
pub enum SnapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Render error at {route}: {message}")]
    Render { route: String, message: String },

    #[error("HTML rewrite error: {0}")]
    Rewrite(String),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("200.html is present in the source directory ({0}); running twice would break the build")]
    AlreadySnapshotted(String),

    #[error("Crawl finished with {failed} failed page(s)")]
    CrawlFailed {
        failed: usize,
        report: Box<output::CrawlReport>,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Sumi-Snap operations
pub type Result<T> = std::result::Result<T, SnapError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run, CrawlObserver, NoopObserver};
pub use output::CrawlReport;
pub use state::{CrawlPhase, RouteState};
pub use url::{strip_identity, Origin, Route};
