//! Removal passes: style/script tags, blob stylesheets, unused preloads

use super::ConsoleEvent;
use lol_html::errors::RewritingError;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use regex::Regex;
use url::Url;

/// Diagnostic Chromium logs for a preload nobody used
const UNUSED_PRELOAD: &str = "was preloaded using link preload but not used";

/// Removes every element with the given tag name
pub fn remove_tags(html: &str, tag: &str) -> Result<String, RewritingError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(tag, |el| {
                el.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
}

/// Removes stylesheet links whose href is a `blob:` URL
pub fn remove_blob_stylesheets(html: &str) -> Result<String, RewritingError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("link[rel=stylesheet]", |el| {
                let is_blob = el
                    .get_attribute("href")
                    .map(|href| href.trim_start().starts_with("blob:"))
                    .unwrap_or(false);
                if is_blob {
                    el.remove();
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
}

/// Collects the `{base}/...` URLs the browser reported as preloaded but unused
///
/// JSON preloads are never reported, since apps commonly fetch them late.
pub fn unused_preloads(events: &[ConsoleEvent], base: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(&format!("({}/[^ ]+)", regex::escape(base))) else {
        return Vec::new();
    };

    events
        .iter()
        .filter(|event| event.text.contains(UNUSED_PRELOAD) && !event.text.contains(".json"))
        .filter_map(|event| {
            pattern
                .captures(&event.text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Removes preload links whose resolved href contains any of `unused`
pub fn remove_preloads(
    html: &str,
    location: &str,
    unused: &[String],
) -> Result<String, RewritingError> {
    let location = Url::parse(location).ok();

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("link[rel=preload]", |el| {
                let Some(href) = el.get_attribute("href") else {
                    return Ok(());
                };
                let resolved = location
                    .as_ref()
                    .and_then(|base| base.join(&href).ok())
                    .map(|url| url.to_string())
                    .unwrap_or(href);

                if unused.iter().any(|preload| resolved.contains(preload.as_str())) {
                    el.remove();
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
}
