//! HTML parser for extracting links and metadata from rendered pages
//!
//! This module handles parsing the serialized page to extract:
//! - Outbound routes to offer to the frontier
//! - Page title

use scraper::{Html, Selector};
use url::Url;

/// Extracted information from a rendered page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// All links found on the page (absolute URLs, any origin)
    pub links: Vec<String>,
}

/// Parses a rendered page and extracts links and its title
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">`
/// - `<link rel="alternate" href="...">`
/// - `<iframe src="...">`
///
/// **Exclude:**
/// - `javascript:`, `mailto:`, `tel:`, `data:` links
/// - Fragment-only links
///
/// Relative links resolve against `<base href>` when present, otherwise
/// against the page location. Origin and exclusion filtering is left to
/// the frontier.
///
/// # Example
///
/// ```
/// use sumi_snap::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Home</title></head><body><a href="/about">About</a></body></html>"#;
/// let location = Url::parse("http://localhost:45678/").unwrap();
/// let parsed = parse_html(html, &location);
/// assert_eq!(parsed.title, Some("Home".to_string()));
/// assert_eq!(parsed.links, vec!["http://localhost:45678/about"]);
/// ```
pub fn parse_html(html: &str, location: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = document_base(&document, location);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, &base),
    }
}

/// Extracts the page title, if the document has a non-empty one
pub fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn document_base(document: &Html, location: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|base| base.value().attr("href"))
                .and_then(|href| location.join(href.trim()).ok())
        })
        .unwrap_or_else(|| location.clone())
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    const SOURCES: &[(&str, &str)] = &[
        ("a[href]", "href"),
        ("link[rel='alternate'][href]", "href"),
        ("iframe[src]", "src"),
    ];

    let mut links = Vec::new();
    for (selector, attr) in SOURCES {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            if let Some(absolute) = element
                .value()
                .attr(attr)
                .and_then(|value| resolve_link(value, base))
            {
                links.push(absolute);
            }
        }
    }
    links
}

/// Resolves a link to an absolute http(s) URL
///
/// Returns None for special schemes, fragment-only links and unparsable values.
fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute = base.join(href).ok()?;
    if absolute.scheme() == "http" || absolute.scheme() == "https" {
        Some(absolute.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Url {
        Url::parse("http://localhost:45678/blog/post").unwrap()
    }

    #[test]
    fn test_extract_title_with_whitespace() {
        let html = r#"<html><head><title>  Test Page  </title></head><body></body></html>"#;
        let parsed = parse_html(html, &location());
        assert_eq!(parsed.title, Some("Test Page".to_string()));
    }

    #[test]
    fn test_no_title() {
        let parsed = parse_html("<html><head></head><body></body></html>", &location());
        assert_eq!(parsed.title, None);
    }

    #[test]
    fn test_relative_links_resolve_against_location() {
        let html = r#"<html><body><a href="/about">A</a><a href="next">B</a></body></html>"#;
        let parsed = parse_html(html, &location());
        assert_eq!(
            parsed.links,
            vec!["http://localhost:45678/about", "http://localhost:45678/blog/next"]
        );
    }

    #[test]
    fn test_base_href_wins() {
        let html = r#"<html><head><base href="/app/"></head><body><a href="page">A</a></body></html>"#;
        let parsed = parse_html(html, &location());
        assert_eq!(parsed.links, vec!["http://localhost:45678/app/page"]);
    }

    #[test]
    fn test_alternate_and_iframe_links() {
        let html = r#"
            <html>
            <head>
                <link rel="alternate" href="/fr/">
                <link rel="stylesheet" href="/main.css">
            </head>
            <body><iframe src="/embed"></iframe></body>
            </html>
        "#;
        let parsed = parse_html(html, &location());
        assert_eq!(
            parsed.links,
            vec!["http://localhost:45678/fr/", "http://localhost:45678/embed"]
        );
    }

    #[test]
    fn test_foreign_links_are_kept() {
        let html = r#"<html><body><a href="https://other.com/page">Link</a></body></html>"#;
        let parsed = parse_html(html, &location());
        assert_eq!(parsed.links, vec!["https://other.com/page"]);
    }

    #[test]
    fn test_mixed_valid_and_invalid_links() {
        let html = r##"
            <html>
            <body>
                <a href="/valid">Valid</a>
                <a href="javascript:alert('no')">Invalid</a>
                <a href="mailto:test@example.com">Invalid</a>
                <a href="tel:+1234567890">Invalid</a>
                <a href="#section">Jump</a>
                <a href="">Empty</a>
                <a href="/another-valid?x=1#top">Valid</a>
            </body>
            </html>
        "##;
        let parsed = parse_html(html, &location());
        assert_eq!(
            parsed.links,
            vec![
                "http://localhost:45678/valid",
                "http://localhost:45678/another-valid?x=1#top"
            ]
        );
    }
}
