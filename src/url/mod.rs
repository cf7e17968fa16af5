//! URL handling module for Sumi-Snap
//!
//! This module provides route identity (query and fragment stripping), origin
//! scoping, exclusion matching, and route path normalization.

mod matcher;
mod normalize;

use crate::UrlError;
use std::fmt;
use url::Url;

// Re-export main functions
pub use matcher::ExclusionSet;
pub use normalize::{normalize_route_path, strip_identity, strip_public_path};

/// The single origin a crawl is scoped to
///
/// Only URLs with the same host and the same effective port are crawled.
/// The scheme is not compared, matching how the app is served locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    url: Url,
}

impl Origin {
    /// Parses an origin from a base URL such as `http://localhost:45678`
    pub fn parse(base: &str) -> Result<Self, UrlError> {
        let url = Url::parse(base).map_err(|e| UrlError::Parse(e.to_string()))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UrlError::InvalidScheme(url.scheme().to_string()));
        }

        if url.host_str().is_none() {
            return Err(UrlError::MissingHost);
        }

        Ok(Self { url })
    }

    /// Returns true if the URL is served by this origin
    pub fn contains(&self, url: &Url) -> bool {
        url.host_str() == self.url.host_str()
            && url.port_or_known_default() == self.url.port_or_known_default()
    }

    /// The origin serialized without a trailing slash, e.g. `http://localhost:45678`
    pub fn base(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Builds an absolute URL for a path on this origin
    pub fn join(&self, path: &str) -> Result<Url, UrlError> {
        self.url.join(path).map_err(|e| UrlError::Parse(e.to_string()))
    }

    /// Strips this origin from an absolute URL, leaving path, query and fragment
    ///
    /// Returns `None` for URLs on other origins.
    pub fn relative<'a>(&self, absolute: &'a str) -> Option<&'a str> {
        let base = self.base();
        let rest = absolute.strip_prefix(base.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// A route to render: an absolute URL with query and fragment stripped
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    url: Url,
}

impl Route {
    /// Creates a route from a URL, stripping query and fragment
    pub fn new(mut url: Url) -> Self {
        url.set_query(None);
        url.set_fragment(None);
        Self { url }
    }

    /// Parses a route from a URL string
    pub fn parse(url_str: &str) -> Result<Self, UrlError> {
        strip_identity(url_str).map(|url| Self { url })
    }

    /// The absolute URL fetched for this route
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The route identity used for deduplication
    pub fn identity(&self) -> &str {
        self.url.as_str()
    }

    /// The route path relative to the origin, e.g. `/about`
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The extension of the last path segment, if any (`.html` → `Some("html")`)
    pub fn extension(&self) -> Option<&str> {
        let last = self.path().rsplit('/').next().unwrap_or("");
        match last.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < last.len() => Some(&last[idx + 1..]),
            _ => None,
        }
    }

    /// Returns true for routes that name an HTML document explicitly
    pub fn is_html_document(&self) -> bool {
        self.path().ends_with(".html")
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Origin {
        Origin::parse("http://localhost:45678").unwrap()
    }

    #[test]
    fn test_origin_contains_same_host_and_port() {
        let origin = origin();
        assert!(origin.contains(&Url::parse("http://localhost:45678/a").unwrap()));
        assert!(!origin.contains(&Url::parse("http://localhost:8080/a").unwrap()));
        assert!(!origin.contains(&Url::parse("http://localhost/a").unwrap()));
        assert!(!origin.contains(&Url::parse("http://example.com:45678/a").unwrap()));
    }

    #[test]
    fn test_origin_default_port() {
        let origin = Origin::parse("http://localhost").unwrap();
        assert!(origin.contains(&Url::parse("http://localhost/a").unwrap()));
        assert!(origin.contains(&Url::parse("http://localhost:80/a").unwrap()));
        assert!(!origin.contains(&Url::parse("http://localhost:45678/a").unwrap()));
    }

    #[test]
    fn test_origin_base_and_relative() {
        let origin = origin();
        assert_eq!(origin.base(), "http://localhost:45678");
        assert_eq!(origin.relative("http://localhost:45678/a?b=1"), Some("/a?b=1"));
        assert_eq!(origin.relative("http://localhost:45678"), Some("/"));
        assert_eq!(origin.relative("http://localhost:456789/a"), None);
        assert_eq!(origin.relative("https://cdn.example.com/a.js"), None);
    }

    #[test]
    fn test_route_strips_identity() {
        let route = Route::parse("http://localhost:45678/c?x=1#frag").unwrap();
        assert_eq!(route.identity(), "http://localhost:45678/c");
        assert_eq!(route.path(), "/c");
        assert_eq!(route.to_string(), "/c");
    }

    #[test]
    fn test_route_extension() {
        let html = Route::parse("http://localhost:45678/404.html").unwrap();
        assert_eq!(html.extension(), Some("html"));
        assert!(html.is_html_document());

        let asset = Route::parse("http://localhost:45678/static/app.js").unwrap();
        assert_eq!(asset.extension(), Some("js"));
        assert!(!asset.is_html_document());

        let dir = Route::parse("http://localhost:45678/about/").unwrap();
        assert_eq!(dir.extension(), None);

        let dotted_dir = Route::parse("http://localhost:45678/v1.2/page").unwrap();
        assert_eq!(dotted_dir.extension(), None);

        let hidden = Route::parse("http://localhost:45678/.well-known").unwrap();
        assert_eq!(hidden.extension(), None);
    }
}
