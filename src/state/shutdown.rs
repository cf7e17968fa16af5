//! Shutdown coordination
//!
//! A crawl moves through three phases, published on a `watch` channel so
//! any task can observe or await them:
//!
//! - `Running`: routes are accepted and rendered
//! - `Draining`: the frontier is sealed, queued routes are skipped
//! - `Closed`: every enqueued route has been processed

use crate::crawler::Frontier;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Crawl lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    Running,
    Draining,
    Closed,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// What to do after a termination signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: finish in-flight pages, skip the rest
    Drain,
    /// Second signal: exit immediately
    Exit,
}

/// Owns the crawl phase and the rules for leaving `Running`
pub struct ShutdownCoordinator {
    phase_tx: watch::Sender<CrawlPhase>,
    frontier: Arc<Frontier>,
    ignore_page_errors: bool,
    fatal_errors: AtomicUsize,
    signals: AtomicUsize,
}

impl ShutdownCoordinator {
    pub fn new(frontier: Arc<Frontier>, ignore_page_errors: bool) -> Self {
        let (phase_tx, _) = watch::channel(CrawlPhase::Running);

        Self {
            phase_tx,
            frontier,
            ignore_page_errors,
            fatal_errors: AtomicUsize::new(0),
            signals: AtomicUsize::new(0),
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        *self.phase_tx.borrow()
    }

    /// True once the crawl has left `Running`
    pub fn is_draining(&self) -> bool {
        self.phase() != CrawlPhase::Running
    }

    pub fn subscribe(&self) -> watch::Receiver<CrawlPhase> {
        self.phase_tx.subscribe()
    }

    /// Moves `Running` to `Draining` and seals the frontier
    ///
    /// Returns `false` if the crawl was already draining or closed.
    pub fn drain(&self) -> bool {
        let entered = self.phase_tx.send_if_modified(|phase| {
            if *phase == CrawlPhase::Running {
                *phase = CrawlPhase::Draining;
                true
            } else {
                false
            }
        });

        if entered {
            self.frontier.seal();
        }
        entered
    }

    /// Records a fatal render error for `route`
    ///
    /// Unless page errors are ignored, the crawl starts draining.
    pub fn report_fatal(&self, route: &str, message: &str) {
        tracing::error!("{}: {}", route, message);

        if self.ignore_page_errors {
            return;
        }

        self.fatal_errors.fetch_add(1, Ordering::SeqCst);
        if self.drain() {
            tracing::warn!("Draining after error on {}; remaining routes will be skipped", route);
        }
    }

    /// Number of errors that were not ignored
    pub fn fatal_errors(&self) -> usize {
        self.fatal_errors.load(Ordering::SeqCst)
    }

    /// Handles one termination signal
    pub fn on_signal(&self) -> SignalAction {
        let previous = self.signals.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.drain();
            tracing::warn!("Gracefully finishing in-flight pages. Press Ctrl-C again to exit immediately");
            SignalAction::Drain
        } else {
            SignalAction::Exit
        }
    }

    /// Marks the crawl closed; idempotent
    pub fn close(&self) {
        self.frontier.close();
        self.phase_tx.send_if_modified(|phase| {
            if *phase == CrawlPhase::Closed {
                false
            } else {
                *phase = CrawlPhase::Closed;
                true
            }
        });
    }

    /// Resolves once the crawl is closed
    pub async fn wait_closed(&self) {
        let mut rx = self.phase_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|phase| *phase == CrawlPhase::Closed).await;
    }

    /// Spawns a Ctrl-C listener bound to this coordinator
    ///
    /// The listener is aborted by the caller once the crawl ends.
    pub fn listen_for_signals(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::debug!("Signal handler unavailable");
                    return;
                }
                if coordinator.on_signal() == SignalAction::Exit {
                    tracing::warn!("Exiting immediately");
                    std::process::exit(1);
                }
            }
        })
    }
}
