//! Live DOM state that serialization loses
//!
//! Rules inserted through the CSSOM leave their `<style>` element empty,
//! and form controls keep their state in properties rather than attributes.
//! The capture step marks both; these passes write them back as markup.

use lol_html::errors::RewritingError;
use lol_html::html_content::{ContentType, Element};
use lol_html::{element, rewrite_str, RewriteStrSettings};
use std::collections::BTreeMap;

const RULES_MARKER: &str = "data-snap-rules";
const CHECKED_MARKER: &str = "data-snap-checked";
const SELECTED_MARKER: &str = "data-snap-selected";

/// Fills marked `<style>` elements with their captured rule text
///
/// Markers are always stripped, even for ids without captured rules.
pub fn apply_inserted_rules(
    html: &str,
    rules: &BTreeMap<String, String>,
) -> Result<String, RewritingError> {
    let selector = format!("style[{}]", RULES_MARKER);

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, |el| {
                if let Some(text) = el.get_attribute(RULES_MARKER).and_then(|id| rules.get(&id)) {
                    el.set_inner_content(&text.replace("</style", "<\\/style"), ContentType::Html);
                }
                el.remove_attribute(RULES_MARKER);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
}

/// Turns capture markers into `checked` / `selected` attributes
pub fn apply_form_state(html: &str) -> Result<String, RewritingError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("input[type=radio]", |el| mirror_marker(el, CHECKED_MARKER, "checked")),
                element!("input[type=checkbox]", |el| mirror_marker(el, CHECKED_MARKER, "checked")),
                element!("option", |el| mirror_marker(el, SELECTED_MARKER, "selected")),
            ],
            ..RewriteStrSettings::default()
        },
    )
}

fn mirror_marker(
    el: &mut Element,
    marker: &str,
    attribute: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if el.has_attribute(marker) {
        el.remove_attribute(marker);
        el.set_attribute(attribute, attribute)?;
    } else {
        el.remove_attribute(attribute);
    }
    Ok(())
}
