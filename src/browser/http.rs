//! Plain HTTP render driver
//!
//! Fetches the served document with reqwest and returns it as-is. No script
//! runs, so the captured page is whatever the server sends; redirects are
//! followed and reported as the post-render location.

use super::{
    BrowserDriver, BrowserError, CaptureOptions, EventHub, ImageFormat, PageCapture, PageEvent,
    RenderContext,
};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Builds the HTTP client shared by every context
///
/// # Arguments
///
/// * `user_agent` - User agent presented to the app
///
/// # Example
///
/// ```
/// use sumi_snap::browser::http::build_http_client;
///
/// let client = build_http_client("SumiSnap").unwrap();
/// ```
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Driver that fetches documents without executing them
#[derive(Debug, Clone)]
pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(&config.crawler.user_agent)?))
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    async fn open(&self) -> Result<Box<dyn RenderContext>, BrowserError> {
        Ok(Box::new(HttpContext {
            client: self.client.clone(),
            hub: EventHub::default(),
            document: None,
            next_request: 0,
        }))
    }

    async fn shutdown(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

struct FetchedDocument {
    final_url: String,
    body: String,
}

struct HttpContext {
    client: Client,
    hub: EventHub,
    document: Option<FetchedDocument>,
    next_request: u64,
}

impl HttpContext {
    async fn fetch(&mut self, id: &str, url: &Url) -> Result<FetchedDocument, BrowserError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.fail(id, url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        self.hub.publish(PageEvent::Response {
            url: final_url.clone(),
            status,
            content_type,
            json: None,
        });

        let body = response.text().await.map_err(|e| self.fail(id, url, e))?;
        self.hub.publish(PageEvent::RequestFinished { id: id.to_string() });

        Ok(FetchedDocument { final_url, body })
    }

    fn fail(&mut self, id: &str, url: &Url, error: reqwest::Error) -> BrowserError {
        self.hub.publish(PageEvent::RequestFailed {
            id: id.to_string(),
            error: error.to_string(),
        });
        BrowserError::Navigation {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl RenderContext for HttpContext {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PageEvent> {
        self.hub.subscribe()
    }

    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError> {
        let id = self.next_request.to_string();
        self.next_request += 1;

        self.hub.publish(PageEvent::RequestStarted {
            id: id.clone(),
            url: url.to_string(),
        });

        match tokio::time::timeout(timeout, self.fetch(&id, url)).await {
            Ok(Ok(document)) => {
                self.document = Some(document);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn capture(&mut self, _options: CaptureOptions) -> Result<PageCapture, BrowserError> {
        let document = self.document.as_ref().ok_or(BrowserError::Closed)?;

        Ok(PageCapture {
            html: document.body.clone(),
            location: document.final_url.clone(),
            ..PageCapture::default()
        })
    }

    async fn screenshot(&mut self, _format: ImageFormat) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unsupported(
            "screenshots require the chromium driver".to_string(),
        ))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        Ok(())
    }
}
