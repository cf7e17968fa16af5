//! Stylesheet fetcher
//!
//! Stylesheets referenced by a rendered page are fetched over plain HTTP
//! so their rules can be inlined. A stylesheet that cannot be fetched is
//! skipped, never fatal.

use futures::future::join_all;
use reqwest::Client;

/// A stylesheet referenced by a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedStylesheet {
    /// Absolute URL
    pub url: String,
    /// Response body; None when the fetch failed
    pub body: Option<String>,
}

/// Fetches all stylesheets concurrently, preserving their order
pub async fn fetch_stylesheets(client: &Client, urls: &[String]) -> Vec<FetchedStylesheet> {
    join_all(urls.iter().map(|url| async move {
        let body = match fetch_text(client, url).await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!("Could not fetch stylesheet {}: {}", url, e);
                None
            }
        };
        FetchedStylesheet {
            url: url.clone(),
            body,
        }
    }))
    .await
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}
