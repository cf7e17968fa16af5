//! URL frontier
//!
//! The frontier is the single source of truth for which routes get rendered.
//! It deduplicates by route identity (query and fragment stripped), filters
//! foreign origins and excluded paths, and hands routes to workers in FIFO
//! order.
//!
//! # Lifecycle
//!
//! - `Open`: routes are accepted and handed out
//! - `Sealed`: no new routes are accepted, queued routes are still handed out
//! - `Closed`: `enqueued == processed`, `next()` returns `None` for every worker

use crate::config::Config;
use crate::url::{strip_identity, ExclusionSet, Origin, Route};
use crate::SnapError;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Outcome of offering a URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New route, queued for rendering
    Accepted,
    /// Identity already seen
    Duplicate,
    /// Path matched an exclusion pattern
    Excluded,
    /// Host or port differ from the crawl origin
    ForeignOrigin,
    /// Frontier is closed or sealed
    Closed,
    /// Not an http(s) URL
    Invalid,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Monotonic crawl counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrontierCounters {
    pub enqueued: usize,
    pub processed: usize,
}

#[derive(Debug, Default)]
struct FrontierState {
    seen: HashSet<String>,
    queue: VecDeque<Route>,
    counters: FrontierCounters,
    sealed: bool,
    closed: bool,
    sentinel_added: bool,
}

/// Deduplicating FIFO of routes shared by all workers
#[derive(Debug)]
pub struct Frontier {
    origin: Origin,
    exclusions: ExclusionSet,
    /// Absolute URL of the 404 page, present when discovery is enabled
    sentinel: Option<String>,
    state: Mutex<FrontierState>,
    notify: Notify,
}

impl Frontier {
    /// Creates a frontier scoped to `origin`
    ///
    /// # Arguments
    ///
    /// * `origin` - The only origin whose URLs are accepted
    /// * `exclusions` - Path patterns that are never enqueued
    /// * `public_path` - Mount path of the app (normalized, no trailing slash)
    /// * `crawl` - Whether discovery is enabled; enables the 404 sentinel
    pub fn new(origin: Origin, exclusions: ExclusionSet, public_path: &str, crawl: bool) -> Self {
        let sentinel = crawl.then(|| format!("{}{}/404.html", origin.base(), public_path));

        Self {
            origin,
            exclusions,
            sentinel,
            state: Mutex::new(FrontierState::default()),
            notify: Notify::new(),
        }
    }

    /// Builds a frontier from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self, SnapError> {
        let origin = Origin::parse(&config.base_url())?;
        let exclusions = ExclusionSet::new(&config.crawler.exclude)?;

        Ok(Self::new(
            origin,
            exclusions,
            &config.server.public_path,
            config.crawler.crawl,
        ))
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers a URL to the frontier
    ///
    /// The second accepted route also enqueues the 404 sentinel when
    /// discovery is enabled, so the app's not-found page is captured once.
    pub fn add(&self, url: &str) -> Admission {
        let mut state = self.lock();
        let admission = self.admit(&mut state, url);

        if admission.is_accepted() && state.counters.enqueued == 2 && !state.sentinel_added {
            if let Some(sentinel) = &self.sentinel {
                state.sentinel_added = true;
                let sentinel_admission = self.admit(&mut state, sentinel);
                tracing::debug!("404 sentinel {}: {:?}", sentinel, sentinel_admission);
            }
        }

        admission
    }

    fn admit(&self, state: &mut FrontierState, url: &str) -> Admission {
        if state.closed || state.sealed {
            return Admission::Closed;
        }

        let url = match strip_identity(url) {
            Ok(url) => url,
            Err(e) => {
                tracing::trace!("Ignoring {}: {}", url, e);
                return Admission::Invalid;
            }
        };

        if !self.origin.contains(&url) {
            return Admission::ForeignOrigin;
        }

        if self.exclusions.is_excluded(url.path()) {
            tracing::debug!("Excluded {}", url.path());
            return Admission::Excluded;
        }

        if !state.seen.insert(url.as_str().to_string()) {
            return Admission::Duplicate;
        }

        tracing::trace!("Enqueued {}", url);
        state.counters.enqueued += 1;
        state.queue.push_back(Route::new(url));
        self.notify.notify_one();
        Admission::Accepted
    }

    /// Waits for the next route
    ///
    /// Returns `None` once the frontier is closed.
    pub async fn next(&self) -> Option<Route> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(route) = state.queue.pop_front() {
                    return Some(route);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Records one finished route
    ///
    /// Returns `true` when this call closed the frontier.
    pub fn mark_processed(&self) -> bool {
        let mut state = self.lock();
        state.counters.processed += 1;

        if !state.closed && state.counters.processed >= state.counters.enqueued {
            state.closed = true;
            drop(state);
            self.notify.notify_waiters();
            return true;
        }

        false
    }

    /// Stops accepting new routes; queued routes are still handed out
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    /// Closes the frontier; idempotent
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn counters(&self) -> FrontierCounters {
        self.lock().counters
    }
}
