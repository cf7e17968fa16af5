//! Crawl lifecycle hooks

use crate::finalize::{ObservedResponse, RenderedPage};
use crate::output::CrawlReport;
use crate::url::Route;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Callbacks invoked around every rendered route
///
/// All methods have no-op defaults. Hooks run on worker tasks, so they
/// must be cheap or hand work off.
pub trait CrawlObserver: Send + Sync {
    /// Before a render context is opened for `route`
    fn before_fetch(&self, _route: &Route) {}

    /// After the page was captured, before finalization
    fn after_fetch(&self, _route: &Route, _page: &RenderedPage) {}

    /// Rewrites the CSS chosen for embedding; its size is checked afterwards
    fn process_css(&self, _route: &Route, css: String) -> String {
        css
    }

    /// Last chance to change the finalized HTML before it is written
    fn process_html(&self, _route: &Route, html: String) -> String {
        html
    }

    /// Response a route must observe before it is captured
    ///
    /// Overrides `wait-for-response-url` when it returns Some.
    fn response_predicate(&self) -> Option<ResponsePredicate> {
        None
    }

    /// Once, after the crawl settled
    fn on_end(&self, _report: &CrawlReport) {}
}

/// Observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CrawlObserver for NoopObserver {}

/// Decides whether an observed response is the one a route waits for
#[derive(Clone)]
pub struct ResponsePredicate(Arc<dyn Fn(&ObservedResponse) -> bool + Send + Sync>);

impl ResponsePredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ObservedResponse) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Matches responses whose URL matches `pattern`
    pub fn url_matches(pattern: Regex) -> Self {
        Self::new(move |response| pattern.is_match(&response.url))
    }

    pub fn matches(&self, response: &ObservedResponse) -> bool {
        (self.0)(response)
    }
}

impl fmt::Debug for ResponsePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponsePredicate")
    }
}
