//! Page finalization pipeline
//!
//! Turns a rendered page into the HTML that gets written to disk. Every pass
//! is a post-serialization rewrite of the document, so the pipeline never
//! touches the browser. Live-DOM state the passes need (CSSOM rules, form
//! state, the app's snapshot hook) was captured alongside the HTML.
//!
//! # Pass order
//!
//! 0. resource hints (`preload-images`, `preconnect-third-party`)
//! 1. strip `<style>` / `<script>`
//! 2. drop `blob:` stylesheets
//! 3. drop preloads the browser reported as unused
//! 4. CSS inlining (full or critical), `process_css`
//! 5. bundler chunk preloads
//! 6. `async` script tags
//! 7. inline state script (`window.snapStore`, `snapSaveState`)
//! 8. CSSOM rules into empty `<style>` elements
//! 9. form control state
//! 10. HTML minification, `process_html`, title checks
//!
//! Apart from the stylesheet fetch in pass 4 and the observer's `process_css`
//! and `process_html` hooks, `transform` is a pure function of the page, the
//! configuration and the fetched stylesheets.

pub mod chunks;
pub mod css;
pub mod extract;
pub mod hints;
pub mod live_state;
pub mod minify;
pub mod scripts;
pub mod strip;

use crate::config::{Config, FinalizeConfig};
use crate::crawler::{fetch_stylesheets, CrawlObserver, FetchedStylesheet};
use crate::url::{Origin, Route};
use crate::SnapError;
use lol_html::errors::RewritingError;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use css::{decide_css_strategy, minify_css, CssDecision, CssStrategy};
pub use extract::{CriticalCssExtractor, SelectorCoverageExtractor};
pub use minify::minify_html;

/// A console message or browser diagnostic observed while rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleEvent {
    pub text: String,
    pub location: Option<String>,
}

/// A network response observed while rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
}

/// Everything a render session captured for one route
///
/// Produced once by the session and only borrowed by the pipeline.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub route: Route,
    pub html: String,
    pub title: Option<String>,
    pub links: Vec<String>,
    pub console_events: Vec<ConsoleEvent>,
    /// JSON responses keyed by URL relative to the origin
    pub ajax_cache: BTreeMap<String, serde_json::Value>,
    pub responses: Vec<ObservedResponse>,
    /// Browser location after rendering
    pub location: String,
    pub inserted_rules: BTreeMap<String, String>,
    pub snapshot_state: Option<BTreeMap<String, serde_json::Value>>,
    pub form_state_marked: bool,
}

impl RenderedPage {
    /// A page with only a route and its HTML; everything else empty
    pub fn new(route: Route, html: impl Into<String>) -> Self {
        let location = route.url().to_string();
        Self {
            route,
            html: html.into(),
            title: None,
            links: Vec::new(),
            console_events: Vec::new(),
            ajax_cache: BTreeMap::new(),
            responses: Vec::new(),
            location,
            inserted_rules: BTreeMap::new(),
            snapshot_state: None,
            form_state_marked: false,
        }
    }
}

/// `as` value of a preload / push hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HintKind {
    Script,
    Style,
    Image,
}

impl HintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Style => "style",
            Self::Image => "image",
        }
    }
}

/// One HTTP/2 push hint for a route
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PushHint {
    pub link: String,
    #[serde(rename = "as")]
    pub kind: HintKind,
}

impl PushHint {
    pub fn new(link: impl Into<String>, kind: HintKind) -> Self {
        Self {
            link: link.into(),
            kind,
        }
    }
}

/// Result of running the pipeline over one page
#[derive(Debug, Clone, Default)]
pub struct FinalizedPage {
    pub html: String,
    pub title: Option<String>,
    /// Hints from observed responses and chunk rewriting
    pub push_hints: Vec<PushHint>,
    /// Origin-relative paths of stylesheets that were inlined
    pub inlined_css: Vec<String>,
    pub warnings: Vec<String>,
}

/// Origin and mount path the passes resolve URLs against
#[derive(Debug, Clone)]
pub struct PageContext {
    pub origin: Origin,
    /// e.g. `http://localhost:45678`
    pub base: String,
    pub public_path: String,
}

/// Runs the finalization passes configured for a crawl
pub struct Pipeline {
    settings: FinalizeConfig,
    context: PageContext,
    push_manifest: bool,
    ignore_for_preload: Vec<String>,
    remove_script_tags: bool,
    extractor: Box<dyn CriticalCssExtractor>,
    client: Client,
    observer: Arc<dyn CrawlObserver>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        client: Client,
        observer: Arc<dyn CrawlObserver>,
    ) -> Result<Self, SnapError> {
        let origin = Origin::parse(&config.base_url())?;
        let base = origin.base();

        Ok(Self {
            settings: config.finalize.clone(),
            context: PageContext {
                origin,
                base,
                public_path: config.server.public_path.clone(),
            },
            push_manifest: config.output.http2_push_manifest,
            ignore_for_preload: config.output.ignore_for_preload.clone(),
            remove_script_tags: config.finalize.remove_script_tags,
            extractor: Box::new(SelectorCoverageExtractor),
            client,
            observer,
        })
    }

    /// Replaces the critical CSS extractor
    pub fn with_extractor(mut self, extractor: Box<dyn CriticalCssExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Push hints derived from observed responses alone
    pub fn resource_hints(&self, page: &RenderedPage) -> Vec<PushHint> {
        if !self.push_manifest {
            return Vec::new();
        }
        hints::collect(
            page,
            &self.context,
            self.settings.preload_images,
            true,
            &self.ignore_for_preload,
        )
        .push
    }

    /// Fetches stylesheets when CSS inlining is on, then runs every pass
    pub async fn finalize(&self, page: &RenderedPage) -> FinalizedPage {
        let prepared = self.prepare(page);

        let stylesheets = if self.settings.inline_css {
            let urls = css::stylesheet_urls(&prepared.html, &page.location);
            fetch_stylesheets(&self.client, &urls).await
        } else {
            Vec::new()
        };

        self.complete(page, prepared, &stylesheets)
    }

    /// Runs every pass with already-fetched stylesheets
    pub fn transform(&self, page: &RenderedPage, stylesheets: &[FetchedStylesheet]) -> FinalizedPage {
        let prepared = self.prepare(page);
        self.complete(page, prepared, stylesheets)
    }

    /// Passes 0-3
    fn prepare(&self, page: &RenderedPage) -> FinalizedPage {
        let settings = &self.settings;
        let mut out = FinalizedPage {
            html: page.html.clone(),
            ..FinalizedPage::default()
        };

        let resources = hints::collect(
            page,
            &self.context,
            settings.preload_images,
            self.push_manifest,
            &self.ignore_for_preload,
        );
        if settings.preload_images || settings.preconnect_third_party {
            let preconnect: &[String] = if settings.preconnect_third_party {
                &resources.preconnect
            } else {
                &[]
            };
            apply(&mut out.html, "resource hints", |html| {
                hints::inject(html, &resources.preload_images, preconnect)
            });
        }
        out.push_hints = resources.push;

        if settings.remove_style_tags {
            apply(&mut out.html, "remove style tags", |html| strip::remove_tags(html, "style"));
        }
        if settings.remove_script_tags {
            apply(&mut out.html, "remove script tags", |html| strip::remove_tags(html, "script"));
        }
        if settings.remove_blobs {
            apply(&mut out.html, "remove blobs", strip::remove_blob_stylesheets);
        }
        if settings.clean_preloads {
            let unused = strip::unused_preloads(&page.console_events, &self.context.base);
            if !unused.is_empty() {
                apply(&mut out.html, "clean preloads", |html| {
                    strip::remove_preloads(html, &page.location, &unused)
                });
            }
        }

        out
    }

    /// Passes 4-10
    fn complete(
        &self,
        page: &RenderedPage,
        mut out: FinalizedPage,
        stylesheets: &[FetchedStylesheet],
    ) -> FinalizedPage {
        let settings = &self.settings;
        let route = page.route.path();

        if settings.inline_css {
            let options = css::InlineOptions {
                minify: settings.minify_css,
                leave_link_css: settings.leave_link_css,
                warn_kb: settings.warn_on_inline_css_kb,
            };
            let inlined = css::inline_css(&out.html, stylesheets, self.extractor.as_ref(), &options, |css| {
                self.observer.process_css(&page.route, css)
            });
            match inlined {
                Ok(inlined) => {
                    if let Some(warning) = inlined.warning {
                        tracing::warn!("{} ({})", warning, route);
                        out.warnings.push(warning);
                    }
                    out.html = inlined.html;
                    out.inlined_css = inlined
                        .inlined_files
                        .iter()
                        .filter_map(|url| self.context.origin.relative(url))
                        .map(str::to_string)
                        .collect();
                }
                Err(e) => tracing::warn!("Error when inlining css at {}: {}", route, e),
            }
        }

        let chunk_plan = chunks::plan(
            &out.html,
            settings.chunk_strategy,
            &page.location,
            &self.context.base,
        );
        if let Some(plan) = chunk_plan {
            if self.push_manifest {
                out.push_hints.extend(
                    plan.preloads
                        .iter()
                        .map(|href| PushHint::new(href.clone(), HintKind::Script)),
                );
            }
            let links = if self.push_manifest { &[][..] } else { &plan.preloads[..] };
            apply(&mut out.html, "chunk preloads", |html| {
                chunks::apply(html, &plan.removed, links, settings.inline_css)
            });
        }

        if settings.async_script_tags {
            apply(&mut out.html, "async script tags", scripts::async_script_tags);
        }

        if !self.remove_script_tags {
            if let Some(text) = scripts::state_script(&page.ajax_cache, page.snapshot_state.as_ref()) {
                apply(&mut out.html, "state script", |html| scripts::inject_state_script(html, &text));
            }
        }

        apply(&mut out.html, "insert rules", |html| {
            let rules = if settings.fix_insert_rule {
                &page.inserted_rules
            } else {
                &EMPTY_RULES
            };
            live_state::apply_inserted_rules(html, rules)
        });

        if page.form_state_marked {
            apply(&mut out.html, "form fields", live_state::apply_form_state);
        }

        if settings.minify_html {
            apply(&mut out.html, "minify html", minify::minify_html);
        }
        out.html = self.observer.process_html(&page.route, out.html);

        out.title = minify::document_title(&out.html);
        out.warnings.extend(minify::title_warnings(route, out.title.as_deref()));

        out
    }
}

static EMPTY_RULES: BTreeMap<String, String> = BTreeMap::new();

/// Runs one rewrite pass, keeping the previous HTML if it fails
fn apply<F>(html: &mut String, pass: &str, rewrite: F)
where
    F: FnOnce(&str) -> Result<String, RewritingError>,
{
    match rewrite(html) {
        Ok(rewritten) => *html = rewritten,
        Err(e) => tracing::warn!("{} pass failed: {}", pass, e),
    }
}

/// Renders a start tag from attribute pairs
pub(crate) fn render_tag(name: &str, attributes: &[(String, String)]) -> String {
    let mut tag = format!("<{}", name);
    for (key, value) in attributes {
        if value.is_empty() {
            tag.push_str(&format!(" {}", key));
        } else {
            tag.push_str(&format!(" {}=\"{}\"", key, escape_attribute(value)));
        }
    }
    tag.push('>');
    tag
}

pub(crate) fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkStrategy;
    use crate::crawler::NoopObserver;

    fn pipeline(config: &Config) -> Pipeline {
        Pipeline::new(config, Client::new(), Arc::new(NoopObserver)).unwrap()
    }

    fn page(html: &str) -> RenderedPage {
        RenderedPage::new(Route::parse("http://localhost:45678/").unwrap(), html)
    }

    const APP: &str = r#"<!DOCTYPE html><html><head><title>App</title><link rel="stylesheet" href="/static/css/main.css"></head><body><div id="root"><h1 class="title">Hello</h1></div><script src="/static/js/main.1a2b3c4d.js"></script><script src="/static/js/1.5e6f7a8b.chunk.js"></script></body></html>"#;

    fn stylesheets() -> Vec<FetchedStylesheet> {
        vec![FetchedStylesheet {
            url: "http://localhost:45678/static/css/main.css".to_string(),
            body: Some(".title { color: red; }\n.unused { color: blue; }".to_string()),
        }]
    }

    #[test]
    fn test_render_tag() {
        let tag = render_tag(
            "link",
            &[
                ("rel".to_string(), "preload".to_string()),
                ("onload".to_string(), "this.rel=\"x\"".to_string()),
                ("crossorigin".to_string(), String::new()),
            ],
        );
        assert_eq!(tag, r#"<link rel="preload" onload="this.rel=&quot;x&quot;" crossorigin>"#);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let mut config = Config::default();
        config.finalize.inline_css = true;
        config.finalize.async_script_tags = true;
        let pipeline = pipeline(&config);

        let mut page = page(APP);
        page.ajax_cache
            .insert("/api/items".to_string(), serde_json::json!({"items": [1, 2]}));

        let first = pipeline.transform(&page, &stylesheets());
        let second = pipeline.transform(&page, &stylesheets());

        assert_eq!(first.html, second.html);
        assert_eq!(first.push_hints, second.push_hints);
        assert_eq!(first.inlined_css, second.inlined_css);
    }

    #[test]
    fn test_default_passes_keep_document() {
        let mut config = Config::default();
        config.finalize.minify_html = false;
        config.finalize.chunk_strategy = ChunkStrategy::None;
        let pipeline = pipeline(&config);

        let out = pipeline.transform(&page(APP), &[]);
        assert_eq!(out.html, APP);
        assert_eq!(out.title.as_deref(), Some("App"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_critical_strategy_end_to_end() {
        let mut config = Config::default();
        config.finalize.inline_css = true;
        config.finalize.chunk_strategy = ChunkStrategy::None;
        config.finalize.minify_html = false;
        let pipeline = pipeline(&config);

        let big_unused = (0..50)
            .map(|i| format!(".unused{} {{ color: blue; }}", i))
            .collect::<String>();
        let sheets = vec![FetchedStylesheet {
            url: "http://localhost:45678/static/css/main.css".to_string(),
            body: Some(format!(".title {{ color: red; }}{}", big_unused)),
        }];

        let out = pipeline.transform(&page(APP), &sheets);

        assert!(out.html.contains("<style>.title{color:red}</style>"));
        assert!(out.html.contains(r#"<noscript><link rel="stylesheet" href="/static/css/main.css"></noscript>"#));
        assert!(out.html.contains(
            r#"<link rel="preload" href="/static/css/main.css" as="style" onload="this.rel='stylesheet'">"#
        ));
        assert!(out.inlined_css.is_empty());
    }

    #[test]
    fn test_inline_strategy_reports_inlined_files() {
        let mut config = Config::default();
        config.finalize.inline_css = true;
        config.finalize.minify_css = false;
        config.finalize.chunk_strategy = ChunkStrategy::None;
        let pipeline = pipeline(&config);

        let out = pipeline.transform(&page(APP), &stylesheets());

        assert!(out.html.contains("<style>.title{color:red}.unused{color:blue}</style>"));
        assert!(!out.html.contains("rel=\"stylesheet\""));
        assert_eq!(out.inlined_css, vec!["/static/css/main.css"]);
    }

    #[test]
    fn test_chunks_become_push_hints_with_manifest() {
        let mut config = Config::default();
        config.output.http2_push_manifest = true;
        config.finalize.minify_html = false;
        let pipeline = pipeline(&config);

        let out = pipeline.transform(&page(APP), &[]);

        assert!(!out.html.contains("1.5e6f7a8b.chunk.js"));
        assert!(!out.html.contains("rel=\"preload\""));
        assert!(out
            .push_hints
            .contains(&PushHint::new("/static/js/1.5e6f7a8b.chunk.js", HintKind::Script)));
    }

    #[test]
    fn test_state_script_skipped_when_scripts_removed() {
        let mut config = Config::default();
        config.finalize.remove_script_tags = true;
        config.finalize.minify_html = false;
        let pipeline = pipeline(&config);

        let mut page = page(APP);
        page.ajax_cache
            .insert("/api".to_string(), serde_json::json!(1));

        let out = pipeline.transform(&page, &[]);
        assert!(!out.html.contains("<script"));
        assert!(!out.html.contains("snapStore"));
    }

    #[test]
    fn test_not_found_title_warning() {
        let config = Config::default();
        let pipeline = pipeline(&config);

        let page = RenderedPage::new(
            Route::parse("http://localhost:45678/404.html").unwrap(),
            "<html><head><title>Oops</title></head><body></body></html>",
        );
        let out = pipeline.transform(&page, &[]);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("404"));
    }

    struct FailingExtractor;

    impl CriticalCssExtractor for FailingExtractor {
        fn extract(&self, _css: &str, _html: &str) -> Result<String, extract::ExtractError> {
            Err(extract::ExtractError("renderer unavailable".to_string()))
        }
    }

    #[test]
    fn test_extractor_failure_falls_back_to_inline() {
        let mut config = Config::default();
        config.finalize.inline_css = true;
        config.finalize.chunk_strategy = ChunkStrategy::None;
        config.finalize.minify_html = false;
        let pipeline = pipeline(&config).with_extractor(Box::new(FailingExtractor));

        let out = pipeline.transform(&page(APP), &stylesheets());

        assert!(out.html.contains("<style>.title{color:red}.unused{color:blue}</style>"));
        assert!(!out.html.contains(r#"rel="stylesheet""#));
        assert_eq!(out.inlined_css, vec!["/static/css/main.css"]);
    }

    #[derive(Default)]
    struct CssObserver {
        routes: std::sync::Mutex<Vec<String>>,
    }

    impl CrawlObserver for CssObserver {
        fn process_css(&self, route: &Route, css: String) -> String {
            self.routes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(route.path().to_string());
            format!("{}.x{{margin:0}}", css).repeat(100)
        }
    }

    #[test]
    fn test_process_css_hook() {
        let mut config = Config::default();
        config.finalize.inline_css = true;
        config.finalize.minify_css = false;
        config.finalize.chunk_strategy = ChunkStrategy::None;
        config.finalize.warn_on_inline_css_kb = 1;
        let observer = Arc::new(CssObserver::default());
        let pipeline = Pipeline::new(&config, Client::new(), observer.clone()).unwrap();

        let out = pipeline.transform(&page(APP), &stylesheets());

        assert_eq!(*observer.routes.lock().unwrap(), vec!["/"]);
        assert!(out.html.contains("<style>.title{color:red}.unused{color:blue}.x{margin:0}"));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].starts_with("inlining CSS more than 1kb"));
    }
}
