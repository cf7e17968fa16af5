//! Resource hints from observed network responses
//!
//! Same-origin images can be preloaded, third-party origins preconnected,
//! and same-origin scripts, styles and images turned into push hints.

use super::{escape_attribute, HintKind, PageContext, PushHint, RenderedPage};
use lol_html::errors::RewritingError;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use std::collections::HashSet;
use url::Url;

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".svg"];

/// Hints derived from one page's responses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHints {
    /// Origin-relative image URLs to preload in the document
    pub preload_images: Vec<String>,
    /// Third-party origins, e.g. `https://fonts.example.com`
    pub preconnect: Vec<String>,
    pub push: Vec<PushHint>,
}

/// Classifies every response once, in the order it was observed
pub fn collect(
    page: &RenderedPage,
    context: &PageContext,
    preload_images: bool,
    push_manifest: bool,
    ignore_for_preload: &[String],
) -> ResourceHints {
    let mut hints = ResourceHints::default();
    let mut seen = HashSet::new();

    for response in &page.responses {
        let url = response.url.as_str();
        if url.starts_with("data:") || url.starts_with("blob:") {
            continue;
        }

        let Ok(parsed) = Url::parse(url) else {
            continue;
        };

        if context.origin.contains(&parsed) {
            if !seen.insert(url.to_string()) {
                continue;
            }
            let Some(link) = context.origin.relative(url) else {
                continue;
            };
            let path = parsed.path();
            let file_name = path.rsplit('/').next().unwrap_or("");

            if preload_images && IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
                if push_manifest {
                    hints.push.push(PushHint::new(link, HintKind::Image));
                } else {
                    hints.preload_images.push(link.to_string());
                }
            } else if push_manifest && !ignore_for_preload.iter().any(|f| f == file_name) {
                if path.ends_with(".js") {
                    hints.push.push(PushHint::new(link, HintKind::Script));
                } else if path.ends_with(".css") {
                    hints.push.push(PushHint::new(link, HintKind::Style));
                }
            }
        } else {
            let domain = parsed.origin().ascii_serialization();
            if domain != "null" && seen.insert(domain.clone()) {
                hints.preconnect.push(domain);
            }
        }
    }

    hints
}

/// Appends image preloads to `<body>` and preconnects to `<head>`
pub fn inject(html: &str, images: &[String], preconnect: &[String]) -> Result<String, RewritingError> {
    if images.is_empty() && preconnect.is_empty() {
        return Ok(html.to_string());
    }

    let preconnect_tags: String = preconnect
        .iter()
        .map(|origin| format!(r#"<link rel="preconnect" href="{}">"#, escape_attribute(origin)))
        .collect();
    let image_tags: String = images
        .iter()
        .map(|href| format!(r#"<link rel="preload" as="image" href="{}">"#, escape_attribute(href)))
        .collect();

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head", |el| {
                    if !preconnect_tags.is_empty() {
                        el.append(&preconnect_tags, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if !image_tags.is_empty() {
                        el.append(&image_tags, ContentType::Html);
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
}
