//! Bundler chunk preloads
//!
//! Code-split bundles load their chunks from the main script. In a
//! snapshot the chunk `<script>` tags are already present, so they are
//! replaced by `<link rel="preload" as="script">` and left to the main
//! script to execute in the right order.

use crate::config::ChunkStrategy;
use lol_html::errors::RewritingError;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use regex::Regex;
use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;
use url::Url;

/// Scripts to remove and preloads to create, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Indices into the document's `script[src]` elements
    pub removed: Vec<usize>,
    pub preloads: Vec<String>,
}

impl ChunkPlan {
    fn link(&mut self, script: &Script, base: &str) {
        self.preloads.push(script.url.replacen(base, "", 1));
    }

    fn move_to_preload(&mut self, script: &Script, base: &str) {
        self.removed.push(script.index);
        self.link(script, base);
    }
}

#[derive(Debug, Clone)]
struct Script {
    index: usize,
    /// Resolved src
    url: String,
    in_head: bool,
}

struct Patterns {
    main: Regex,
    chunk: Regex,
}

impl Patterns {
    fn for_strategy(strategy: ChunkStrategy) -> Option<Self> {
        let (main, chunk) = match strategy {
            ChunkStrategy::Cra1 => (
                r"main\.[\w]{8}.js|main\.[\w]{8}\.chunk\.js",
                r"(\w+)\.[\w]{8}(\.chunk)?\.js",
            ),
            ChunkStrategy::Cra2 => (r"main\.[\w]{8}\.chunk\.js", r"(\w+)\.[\w]{8}\.chunk\.js"),
            ChunkStrategy::Parcel => (r"main\.[\w]{8}\.js", r"(\w+)\.[\w]{8}\.js"),
            ChunkStrategy::None => return None,
        };
        Some(Self {
            main: Regex::new(main).ok()?,
            chunk: Regex::new(chunk).ok()?,
        })
    }

    /// Bundle name of a chunk script, e.g. `main`, `vendors` or `2`
    fn chunk_name<'a>(&self, url: &'a str) -> Option<&'a str> {
        self.chunk
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|name| name.as_str())
    }
}

/// Works out which chunk scripts become preloads
///
/// Returns None when the strategy is off or the document has no main bundle.
pub fn plan(html: &str, strategy: ChunkStrategy, location: &str, base: &str) -> Option<ChunkPlan> {
    let patterns = Patterns::for_strategy(strategy)?;
    let location = Url::parse(location).ok()?;

    let local: Vec<Script> = scan_scripts(html, &location)
        .map_err(|e| tracing::debug!("Could not scan scripts: {}", e))
        .ok()?
        .into_iter()
        .filter(|script| script.url.starts_with(base))
        .collect();

    if !local.iter().any(|script| patterns.main.is_match(&script.url)) {
        return None;
    }

    let mut plan = ChunkPlan::default();
    match strategy {
        ChunkStrategy::Cra1 => {
            let named: Vec<(&Script, &str)> = local
                .iter()
                .filter_map(|script| patterns.chunk_name(&script.url).map(|name| (script, name)))
                .collect();
            let is_main = |name: &str| name == "main" || name == "vendors";

            for (script, _) in named.iter().filter(|(_, name)| is_main(name)) {
                plan.link(script, base);
            }
            for (script, _) in named.iter().rev().filter(|(_, name)| !is_main(name)) {
                plan.move_to_preload(script, base);
            }
        }
        ChunkStrategy::Cra2 => {
            let chunks: Vec<&Script> = local
                .iter()
                .filter(|script| patterns.chunk.is_match(&script.url))
                .collect();
            let head: Vec<&Script> = chunks.iter().copied().filter(|script| script.in_head).collect();

            for script in chunks.iter().skip(head.len()) {
                plan.link(script, base);
            }
            for script in head.into_iter().rev() {
                plan.move_to_preload(script, base);
            }
        }
        ChunkStrategy::Parcel => {
            let parcel_base = format!("{}/", base);
            for script in &local {
                if patterns.chunk_name(&script.url).is_some_and(|name| name != "main") {
                    plan.removed.push(script.index);
                    plan.preloads.push(script.url.replacen(&parcel_base, "", 1));
                }
            }
        }
        ChunkStrategy::None => return None,
    }

    Some(plan)
}

/// Removes planned scripts and inserts preload links
///
/// Links go before the first `<style>` when CSS was inlined and a style
/// exists, otherwise at the end of `<head>`.
pub fn apply(
    html: &str,
    removed: &[usize],
    preloads: &[String],
    inline_css: bool,
) -> Result<String, RewritingError> {
    let removed: HashSet<usize> = removed.iter().copied().collect();
    let links: String = preloads
        .iter()
        .map(|href| {
            super::render_tag(
                "link",
                &[
                    ("rel".to_string(), "preload".to_string()),
                    ("as".to_string(), "script".to_string()),
                    ("href".to_string(), href.clone()),
                ],
            )
        })
        .collect();
    let before_style = inline_css && !links.is_empty() && has_element(html, "style")?;

    let mut index = 0;
    let mut inserted = false;
    let mut handlers = vec![element!("script[src]", |el| {
        if removed.contains(&index) {
            el.remove();
        }
        index += 1;
        Ok(())
    })];

    if !links.is_empty() {
        if before_style {
            handlers.push(element!("style", |el| {
                if !inserted {
                    el.before(&links, ContentType::Html);
                    inserted = true;
                }
                Ok(())
            }));
        } else {
            handlers.push(element!("head", |el| {
                el.append(&links, ContentType::Html);
                Ok(())
            }));
        }
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
}

fn has_element(html: &str, selector: &str) -> Result<bool, RewritingError> {
    let mut found = false;
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, |_el| {
                found = true;
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(found)
}

fn scan_scripts(html: &str, location: &Url) -> Result<Vec<Script>, RewritingError> {
    let in_head = Rc::new(Cell::new(false));
    let head_flag = in_head.clone();
    let mut scripts = Vec::new();
    let mut index = 0;

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head", move |el| {
                    head_flag.set(true);
                    let flag = head_flag.clone();
                    if let Some(handlers) = el.end_tag_handlers() {
                        handlers.push(Box::new(move |_end| {
                            flag.set(false);
                            Ok(())
                        }));
                    }
                    Ok(())
                }),
                element!("script[src]", |el| {
                    if let Some(url) = el
                        .get_attribute("src")
                        .and_then(|src| location.join(src.trim()).ok())
                    {
                        scripts.push(Script {
                            index,
                            url: url.to_string(),
                            in_head: in_head.get(),
                        });
                    }
                    index += 1;
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(scripts)
}
