//! Script tag passes: `async` attributes and the inline state script

use lol_html::errors::RewritingError;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sets `async="true"` on every external script
pub fn async_script_tags(html: &str) -> Result<String, RewritingError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("script[src]", |el| {
                el.set_attribute("async", "true")?;
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
}

/// Builds the inline script that rehydrates captured state
///
/// Returns None when there is neither cached AJAX data nor saved state.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use std::collections::BTreeMap;
/// use sumi_snap::finalize::scripts::state_script;
///
/// let mut cache = BTreeMap::new();
/// cache.insert("/api".to_string(), json!({"html": "</script>"}));
///
/// assert_eq!(
///     state_script(&cache, None).unwrap(),
///     r#"window.snapStore={"\u002Fapi":{"html":"\u003C\u002Fscript\u003E"}};"#
/// );
/// ```
pub fn state_script(
    ajax_cache: &BTreeMap<String, Value>,
    snapshot_state: Option<&BTreeMap<String, Value>>,
) -> Option<String> {
    let mut script = String::new();

    if !ajax_cache.is_empty() {
        script.push_str(&format!("window.snapStore={};", to_script_json(ajax_cache)));
    }

    for (key, value) in snapshot_state.into_iter().flatten() {
        script.push_str(&format!(
            "window[{}]={};",
            to_script_json(key),
            to_script_json(value)
        ));
    }

    (!script.is_empty()).then_some(script)
}

/// JSON that is safe to embed in a `<script>` element
fn to_script_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    escape_script_json(&json)
}

fn escape_script_json(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => escaped.push_str("\\u003C"),
            '>' => escaped.push_str("\\u003E"),
            '/' => escaped.push_str("\\u002F"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Inserts the state script before the first script, or at the end of `<head>`
pub fn inject_state_script(html: &str, script: &str) -> Result<String, RewritingError> {
    let tag = format!("<script>{}</script>", script);
    let mut inserted = false;

    let out = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("script", |el| {
                if !inserted {
                    el.before(&tag, ContentType::Html);
                    inserted = true;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;
    if inserted {
        return Ok(out);
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", |el| {
                el.append(&tag, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
}
