use crate::UrlError;
use url::Url;

/// Strips query and fragment from a URL, producing its crawl identity
///
/// Two links that differ only in `?query` or `#hash` render the same route,
/// so both are removed before deduplication.
///
/// # Examples
///
/// ```
/// use sumi_snap::url::strip_identity;
///
/// let url = strip_identity("http://localhost:45678/c?x=1#top").unwrap();
/// assert_eq!(url.as_str(), "http://localhost:45678/c");
/// ```
pub fn strip_identity(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Normalizes a route path for comparison
///
/// Removes a single trailing slash, except for the root path.
/// An empty path is the root.
///
/// # Examples
///
/// ```
/// use sumi_snap::url::normalize_route_path;
///
/// assert_eq!(normalize_route_path("/"), "/");
/// assert_eq!(normalize_route_path("/about/"), "/about");
/// assert_eq!(normalize_route_path("/about"), "/about");
/// ```
pub fn normalize_route_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    path.strip_suffix('/').unwrap_or(path).to_string()
}

/// Removes the public path prefix from a route path
///
/// Routes outside the public path are returned unchanged.
pub fn strip_public_path<'a>(path: &'a str, public_path: &str) -> &'a str {
    if public_path.is_empty() {
        return path;
    }

    match path.strip_prefix(public_path) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}
