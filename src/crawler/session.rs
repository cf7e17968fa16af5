//! Render session
//!
//! Renders one route in its own context: navigate, wait, capture, feed the
//! discovered links back into the frontier, then write every requested
//! artifact. State shared by all workers lives in `Session`.

use super::frontier::Frontier;
use super::observer::{CrawlObserver, ResponsePredicate};
use super::parser::parse_html;
use super::tracker::ConnectionTracker;
use crate::browser::http::build_http_client;
use crate::browser::{BrowserDriver, BrowserError, CaptureOptions, ImageFormat, PageEvent, RenderContext};
use crate::config::{Config, SaveAs};
use crate::finalize::{ConsoleEvent, ObservedResponse, Pipeline, RenderedPage};
use crate::output::{ArtifactPaths, CrawlReport, PushManifest};
use crate::state::{RouteState, ShutdownCoordinator};
use crate::url::{normalize_route_path, strip_public_path, Origin, Route};
use crate::{ConfigError, SnapError};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Everything render sessions share across workers
pub struct Session {
    pub(crate) config: Config,
    pub(crate) driver: Arc<dyn BrowserDriver>,
    pub(crate) frontier: Arc<Frontier>,
    pub(crate) shutdown: Arc<ShutdownCoordinator>,
    pub(crate) observer: Arc<dyn CrawlObserver>,
    pipeline: Pipeline,
    paths: ArtifactPaths,
    predicate: Option<ResponsePredicate>,
    manifest: Mutex<PushManifest>,
    report: Mutex<CrawlReport>,
}

impl Session {
    pub fn new(
        config: Config,
        driver: Arc<dyn BrowserDriver>,
        observer: Arc<dyn CrawlObserver>,
    ) -> Result<Self, SnapError> {
        let frontier = Arc::new(Frontier::from_config(&config)?);
        let shutdown = Arc::new(ShutdownCoordinator::new(
            frontier.clone(),
            config.crawler.ignore_page_errors,
        ));

        let client = build_http_client(&config.crawler.user_agent)?;
        let pipeline = Pipeline::new(&config, client, observer.clone())?;

        let predicate = match observer.response_predicate() {
            Some(predicate) => Some(predicate),
            None => config
                .crawler
                .wait_for_response_url
                .as_deref()
                .filter(|pattern| !pattern.is_empty())
                .map(|pattern| {
                    Regex::new(pattern)
                        .map(ResponsePredicate::url_matches)
                        .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", pattern, e)))
                })
                .transpose()?,
        };

        Ok(Self {
            paths: ArtifactPaths::from_config(&config),
            config,
            driver,
            frontier,
            shutdown,
            observer,
            pipeline,
            predicate,
            manifest: Mutex::new(PushManifest::new()),
            report: Mutex::new(CrawlReport::start()),
        })
    }

    pub(crate) fn report(&self) -> MutexGuard<'_, CrawlReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn manifest(&self) -> MutexGuard<'_, PushManifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a route failure and lets the coordinator decide whether to drain
    pub(crate) fn fail(&self, route: &Route, message: &str) {
        self.report().log(route.path(), message);
        self.shutdown.report_fatal(route.path(), message);
    }

    /// Renders one route and writes its artifacts
    ///
    /// Returns the state the route ended in. Errors are render errors for
    /// this route only; the caller decides whether the crawl drains.
    pub async fn render_route(&self, route: &Route) -> Result<RouteState, SnapError> {
        if self.shutdown.is_draining() || self.is_existing_asset(route).await {
            let counters = self.frontier.counters();
            tracing::info!(
                "skipping ({}/{}) {}",
                counters.processed + 1,
                counters.enqueued,
                route
            );
            return Ok(RouteState::Skipped);
        }

        self.observer.before_fetch(route);

        let mut context = self.driver.open().await?;
        let result = self.render_in(context.as_mut(), route).await;
        if let Err(e) = context.close().await {
            tracing::warn!("Could not close render context for {}: {}", route, e);
        }
        let saved = result?;

        let counters = self.frontier.counters();
        tracing::info!(
            "crawled {} out of {} ({}) - saved {}",
            counters.processed + 1,
            counters.enqueued,
            route,
            saved.join(", ")
        );
        Ok(RouteState::Saved)
    }

    /// Non-HTML routes that exist in the source tree are served as-is
    async fn is_existing_asset(&self, route: &Route) -> bool {
        match route.extension() {
            Some(ext) if ext != "html" => {
                let relative = route.path().trim_start_matches('/');
                let path = Path::new(&self.config.crawler.source).join(relative);
                tokio::fs::try_exists(path).await.unwrap_or(false)
            }
            _ => false,
        }
    }

    async fn render_in(
        &self,
        context: &mut dyn RenderContext,
        route: &Route,
    ) -> Result<Vec<String>, SnapError> {
        let mut tracker = ConnectionTracker::new(context.subscribe());
        let mut events = PageEvents::new(context.subscribe(), self.config.crawler.cache_ajax_requests);
        let timeout = Duration::from_millis(self.config.crawler.navigation_timeout_ms);

        match context.navigate(route.url(), timeout).await {
            Ok(()) => {}
            Err(e @ BrowserError::NavigationTimeout { .. }) => {
                return Err(SnapError::Render {
                    route: route.path().to_string(),
                    message: tracker.augment_timeout_error(&e.to_string()),
                });
            }
            Err(e) => return Err(e.into()),
        }
        drop(tracker);

        if let Some(predicate) = &self.predicate {
            let matched = tokio::time::timeout(timeout, events.wait_for_response(predicate))
                .await
                .unwrap_or(false);
            if !matched {
                return Err(SnapError::Render {
                    route: route.path().to_string(),
                    message: format!("no matching response within {} ms", timeout.as_millis()),
                });
            }
        }

        if self.config.crawler.wait_for_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.crawler.wait_for_ms)).await;
        }

        let capture = context
            .capture(CaptureOptions {
                insert_rules: self.config.finalize.fix_insert_rule,
            })
            .await?;
        events.drain();

        for message in &events.page_errors {
            tracing::warn!("pageerror at {}: {}", route, message);
            self.report().log(route.path(), format!("pageerror at {}: {}", route, message));
            if message != "Event" && !message.starts_with("TypeError") {
                self.shutdown.report_fatal(route.path(), message);
            }
        }

        let origin = self.frontier.origin();
        for response in events.responses.iter().filter(|r| r.status >= 400) {
            if response.url == route.url().as_str() || response.url == capture.location {
                return Err(SnapError::Render {
                    route: route.path().to_string(),
                    message: format!("got {} HTTP code for {}", response.status, response.url),
                });
            }

            let warning = format!(
                "warning at {}: got {} HTTP code for {}",
                route, response.status, response.url
            );
            tracing::warn!("{}", warning);
            self.report().log(route.path(), warning.clone());
            events.console.push(ConsoleEvent {
                text: warning,
                location: Some(response.url.clone()),
            });
        }

        let location = Url::parse(&capture.location).unwrap_or_else(|_| route.url().clone());
        let parsed = parse_html(&capture.html, &location);
        let ajax_cache = events.ajax_cache(origin);
        let page = RenderedPage {
            route: route.clone(),
            html: capture.html,
            title: parsed.title,
            links: parsed.links,
            console_events: events.console,
            ajax_cache,
            responses: events.responses,
            location: capture.location,
            inserted_rules: capture.inserted_rules,
            snapshot_state: capture.snapshot_state,
            form_state_marked: capture.form_state_marked,
        };

        if self.config.crawler.crawl {
            for link in &page.links {
                self.frontier.add(link);
            }
        }

        self.observer.after_fetch(route, &page);

        let mut saved = Vec::new();
        for format in &self.config.output.save_as {
            match format {
                SaveAs::Html => self.save_html(&page).await?,
                SaveAs::Png | SaveAs::Jpeg => {
                    let image = match format {
                        SaveAs::Jpeg => ImageFormat::Jpeg,
                        _ => ImageFormat::Png,
                    };
                    let bytes = context.screenshot(image).await?;
                    let path = self.paths.write(route, *format, bytes).await?;
                    self.report().record_saved(route.path(), path);
                }
            }
            saved.push(format!("{}.{}", self.config.output.file_name, format.extension()));
        }

        if self.config.output.http2_push_manifest && !self.config.saves_html() {
            let hints = self.pipeline.resource_hints(&page);
            self.manifest().record(route.path(), &hints, &[]);
        }

        Ok(saved)
    }

    async fn save_html(&self, page: &RenderedPage) -> Result<(), SnapError> {
        let route = &page.route;
        let finalized = self.pipeline.finalize(page).await;
        let path = self.paths.write(route, SaveAs::Html, &finalized.html).await?;

        {
            let mut report = self.report();
            report.record_saved(route.path(), path);
            for warning in &finalized.warnings {
                report.log(route.path(), warning.clone());
            }
        }

        if self.config.output.http2_push_manifest {
            self.manifest()
                .record(route.path(), &finalized.push_hints, &finalized.inlined_css);
        }

        self.redirect_feedback(page);
        Ok(())
    }

    /// Enqueues the route the app redirected to in the browser
    fn redirect_feedback(&self, page: &RenderedPage) {
        let public_path = &self.config.server.public_path;
        let location = match Url::parse(&page.location) {
            Ok(location) => location,
            Err(_) => return,
        };

        let old_route = normalize_route_path(strip_public_path(page.route.path(), public_path));
        let new_route = normalize_route_path(strip_public_path(location.path(), public_path));
        if old_route == new_route {
            return;
        }

        tracing::info!("in browser redirect ({} -> {})", old_route, new_route);
        self.report().record_redirect(&old_route, &new_route);
        self.frontier.add(&format!(
            "{}{}{}",
            self.frontier.origin().base(),
            public_path,
            new_route
        ));
    }
}

/// Collects page events for the lifetime of one render context
struct PageEvents {
    events: mpsc::UnboundedReceiver<PageEvent>,
    cache_ajax: bool,
    console: Vec<ConsoleEvent>,
    responses: Vec<ObservedResponse>,
    json: Vec<(String, serde_json::Value)>,
    page_errors: Vec<String>,
}

impl PageEvents {
    fn new(events: mpsc::UnboundedReceiver<PageEvent>, cache_ajax: bool) -> Self {
        Self {
            events,
            cache_ajax,
            console: Vec::new(),
            responses: Vec::new(),
            json: Vec::new(),
            page_errors: Vec::new(),
        }
    }

    fn record(&mut self, event: PageEvent) {
        match event {
            PageEvent::Response {
                url,
                status,
                content_type,
                json,
            } => {
                if let Some(json) = json.filter(|_| self.cache_ajax) {
                    self.json.push((url.clone(), json));
                }
                self.responses.push(ObservedResponse {
                    url,
                    status,
                    content_type,
                });
            }
            PageEvent::Console { text, location } => {
                self.console.push(ConsoleEvent { text, location });
            }
            PageEvent::PageError { message } => self.page_errors.push(message),
            PageEvent::RequestStarted { .. }
            | PageEvent::RequestFinished { .. }
            | PageEvent::RequestFailed { .. } => {}
        }
    }

    /// Records everything published so far
    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.record(event);
        }
    }

    /// Waits until a response matches; false when the context went away first
    async fn wait_for_response(&mut self, predicate: &ResponsePredicate) -> bool {
        self.drain();
        if self.responses.iter().any(|r| predicate.matches(r)) {
            return true;
        }

        while let Some(event) = self.events.recv().await {
            let is_response = matches!(event, PageEvent::Response { .. });
            self.record(event);
            if is_response && self.responses.last().map_or(false, |r| predicate.matches(r)) {
                return true;
            }
        }
        false
    }

    /// JSON bodies keyed by URL relative to the origin
    fn ajax_cache(&self, origin: &Origin) -> BTreeMap<String, serde_json::Value> {
        self.json
            .iter()
            .map(|(url, json)| {
                let key = origin.relative(url).unwrap_or(url);
                (key.to_string(), json.clone())
            })
            .collect()
    }
}
