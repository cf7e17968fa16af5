//! Browser driver seam
//!
//! Rendering is delegated to a driver behind two traits:
//!
//! - `BrowserDriver`: owns the browser process(es) and opens render contexts
//! - `RenderContext`: one tab, navigated to exactly one route
//!
//! Contexts publish `PageEvent`s to every subscriber. Live-DOM state that
//! does not survive serialization (CSSOM rules, form state, the app's
//! snapshot hook, the final location) is returned by `capture` so the
//! finalization pipeline can stay a pure function of the captured page.
//!
//! # Drivers
//!
//! - `http::HttpDriver`: plain reqwest fetch, no script execution
//! - `chromium::ChromiumDriver`: headless Chromium (feature `chromium`)

pub mod http;

#[cfg(feature = "chromium")]
pub mod chromium;

use crate::config::{Config, DriverKind};
use crate::SnapError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// Errors raised by browser drivers
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Navigation timeout of {timeout_ms} ms exceeded for {url}")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Not supported by this driver: {0}")]
    Unsupported(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Render context is closed")]
    Closed,
}

/// Something observed while a page was loading or running
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    RequestStarted {
        id: String,
        url: String,
    },
    RequestFinished {
        id: String,
    },
    RequestFailed {
        id: String,
        error: String,
    },
    Response {
        url: String,
        status: u16,
        content_type: Option<String>,
        /// Parsed body of JSON responses, when AJAX caching is enabled
        json: Option<serde_json::Value>,
    },
    Console {
        text: String,
        location: Option<String>,
    },
    /// Uncaught exception in page script
    PageError {
        message: String,
    },
}

/// What `capture` should record besides the serialized document
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    /// Mark empty `<style>` elements and return their CSSOM rule text
    pub insert_rules: bool,
}

/// Serialized page plus live-DOM state captured in the same step
#[derive(Debug, Clone, Default)]
pub struct PageCapture {
    /// `<!DOCTYPE ...>` plus the serialized document element
    pub html: String,

    /// `window.location.href` after rendering
    pub location: String,

    /// Marker id (`data-snap-rules`) to CSSOM rule text
    pub inserted_rules: BTreeMap<String, String>,

    /// Return value of `window.snapSaveState()`, if the app defines it
    pub snapshot_state: Option<BTreeMap<String, serde_json::Value>>,

    /// Form controls carry `data-snap-checked` / `data-snap-selected` markers
    pub form_state_marked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// Owns the browser and hands out render contexts
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Opens a context ready to navigate
    async fn open(&self) -> Result<Box<dyn RenderContext>, BrowserError>;

    /// Releases every browser process; called once when the crawl ends
    async fn shutdown(&self) -> Result<(), BrowserError>;
}

/// One tab rendering one route
#[async_trait]
pub trait RenderContext: Send {
    /// Returns a receiver for every event published after this call
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PageEvent>;

    /// Navigates and waits for network quiescence, bounded by `timeout`
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError>;

    async fn capture(&mut self, options: CaptureOptions) -> Result<PageCapture, BrowserError>;

    /// Full-page screenshot
    async fn screenshot(&mut self, format: ImageFormat) -> Result<Vec<u8>, BrowserError>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

/// Fan-out of page events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Vec<mpsc::UnboundedSender<PageEvent>>,
}

impl EventHub {
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Publishes to live subscribers, forgetting dropped ones
    pub fn publish(&mut self, event: PageEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn senders(&self) -> Vec<mpsc::UnboundedSender<PageEvent>> {
        self.subscribers.clone()
    }
}

/// Builds the driver selected by the configuration
pub fn driver_from_config(config: &Config) -> Result<Arc<dyn BrowserDriver>, SnapError> {
    match config.crawler.driver {
        DriverKind::Http => Ok(Arc::new(http::HttpDriver::from_config(config)?)),
        #[cfg(feature = "chromium")]
        DriverKind::Chromium => Ok(Arc::new(chromium::ChromiumDriver::from_config(config)?)),
        #[cfg(not(feature = "chromium"))]
        DriverKind::Chromium => Err(BrowserError::Unsupported(
            "this build does not include the chromium driver".to_string(),
        )
        .into()),
    }
}
