//! HTML minification and title checks

use crate::crawler::extract_title;
use lol_html::errors::RewritingError;
use lol_html::html_content::ContentType;
use lol_html::{doc_comments, doc_text, element, rewrite_str, RewriteStrSettings};
use regex::Regex;
use scraper::Html;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::OnceLock;

/// Elements whose text is whitespace-sensitive
const PRESERVED: &[&str] = &["pre", "textarea", "script", "style"];

fn whitespace() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

/// Collapses whitespace runs in text and removes comments
///
/// Text inside `pre`, `textarea`, `script` and `style` is left alone, as are
/// conditional comments.
///
/// # Example
///
/// ```
/// use sumi_snap::finalize::minify_html;
///
/// let html = "<div>\n    <p>Hello,   world</p>\n</div><!-- note -->";
/// assert_eq!(minify_html(html).unwrap(), "<div> <p>Hello, world</p> </div>");
/// ```
pub fn minify_html(html: &str) -> Result<String, RewritingError> {
    let preserved = Rc::new(Cell::new(0usize));

    let mut element_handlers = Vec::new();
    for tag in PRESERVED {
        let depth = preserved.clone();
        element_handlers.push(element!(*tag, move |el| {
            depth.set(depth.get() + 1);
            let depth = depth.clone();
            if let Some(handlers) = el.end_tag_handlers() {
                handlers.push(Box::new(move |_end| {
                    depth.set(depth.get().saturating_sub(1));
                    Ok(())
                }));
            }
            Ok(())
        }));
    }

    let split_space = Cell::new(false);

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: element_handlers,
            document_content_handlers: vec![
                doc_comments!(|c| {
                    if !c.text().starts_with("[if") {
                        c.remove();
                    }
                    Ok(())
                }),
                doc_text!(|t| {
                    if preserved.get() == 0 {
                        let mut collapsed = whitespace().replace_all(t.as_str(), " ").into_owned();
                        if split_space.get() && collapsed.starts_with(' ') {
                            collapsed.remove(0);
                        }
                        // a text node can arrive in several chunks
                        let ends_with_space = if collapsed.is_empty() {
                            split_space.get()
                        } else {
                            collapsed.ends_with(' ')
                        };
                        split_space.set(ends_with_space && !t.last_in_text_node());

                        if collapsed != t.as_str() {
                            t.replace(&collapsed, ContentType::Html);
                        }
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
}

/// Title of a serialized document
pub fn document_title(html: &str) -> Option<String> {
    extract_title(&Html::parse_document(html))
}

/// Warnings about a route whose title does not match its role
pub fn title_warnings(route: &str, title: Option<&str>) -> Vec<String> {
    let title = title.unwrap_or("");
    let mut warnings = Vec::new();

    if route.ends_with(".html") {
        if route.ends_with("/404.html") && !title.contains("404") {
            warnings.push("404 page title does not contain \"404\" string".to_string());
        }
    } else if title.contains("404") {
        warnings.push(format!("page not found {}", route));
    }

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_whitespace_sensitive_text() {
        let html = "<pre>  a\n  b</pre><textarea>x   y</textarea><script>var a =  1;\n</script><p>c   d</p>";
        assert_eq!(
            minify_html(html).unwrap(),
            "<pre>  a\n  b</pre><textarea>x   y</textarea><script>var a =  1;\n</script><p>c d</p>"
        );
    }

    #[test]
    fn test_keeps_conditional_comments() {
        let html = "<head><!--[if IE]><script src=\"/ie.js\"></script><![endif]--><!-- build 42 --></head>";
        assert_eq!(
            minify_html(html).unwrap(),
            "<head><!--[if IE]><script src=\"/ie.js\"></script><![endif]--></head>"
        );
    }

    #[test]
    fn test_entities_untouched() {
        let html = "<p>a  &amp;  b &lt;c&gt;</p>";
        assert_eq!(minify_html(html).unwrap(), "<p>a &amp; b &lt;c&gt;</p>");
    }

    #[test]
    fn test_minify_is_idempotent() {
        let html = "<html>\n<head>\n  <title> App </title>\n</head>\n<body>\n  <div>  x  </div>\n</body>\n</html>";
        let once = minify_html(html).unwrap();
        assert_eq!(minify_html(&once).unwrap(), once);
    }

    #[test]
    fn test_document_title() {
        assert_eq!(
            document_title("<html><head><title>Home</title></head></html>").as_deref(),
            Some("Home")
        );
        assert_eq!(document_title("<p>no title</p>"), None);
    }

    #[test]
    fn test_not_found_page_title() {
        assert_eq!(
            title_warnings("/404.html", Some("Oops")),
            vec!["404 page title does not contain \"404\" string"]
        );
        assert!(title_warnings("/404.html", Some("404 - Not found")).is_empty());
        assert!(title_warnings("/about.html", Some("404")).is_empty());
    }

    #[test]
    fn test_route_rendering_not_found() {
        assert_eq!(
            title_warnings("/missing", Some("404 Not Found")),
            vec!["page not found /missing"]
        );
        assert!(title_warnings("/about", Some("About")).is_empty());
        assert!(title_warnings("/about", None).is_empty());
    }
}
