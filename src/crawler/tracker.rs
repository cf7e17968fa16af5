//! Connection tracker
//!
//! Records which requests a page started and which of them settled, so a
//! navigation timeout can name the URLs that were still loading.

use crate::browser::PageEvent;
use tokio::sync::mpsc;

/// Tracks in-flight requests of one render context
///
/// The tracker owns its event receiver; dropping the tracker unsubscribes it.
#[derive(Debug)]
pub struct ConnectionTracker {
    events: mpsc::UnboundedReceiver<PageEvent>,
    /// Request id and URL of requests that have not settled, in start order
    pending: Vec<(String, String)>,
    started: usize,
}

impl ConnectionTracker {
    pub fn new(events: mpsc::UnboundedReceiver<PageEvent>) -> Self {
        Self {
            events,
            pending: Vec::new(),
            started: 0,
        }
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                PageEvent::RequestStarted { id, url } => {
                    self.started += 1;
                    self.pending.push((id, url));
                }
                PageEvent::RequestFinished { id } | PageEvent::RequestFailed { id, .. } => {
                    self.pending.retain(|(pending, _)| *pending != id);
                }
                _ => {}
            }
        }
    }

    /// URLs of requests that have not finished or failed, in request order
    pub fn pending_urls(&mut self) -> Vec<String> {
        self.drain();
        self.pending.iter().map(|(_, url)| url.clone()).collect()
    }

    /// Number of requests seen so far
    pub fn started(&mut self) -> usize {
        self.drain();
        self.started
    }

    /// Appends the still-loading URLs to a navigation timeout message
    ///
    /// # Example
    ///
    /// ```
    /// use sumi_snap::browser::PageEvent;
    /// use sumi_snap::crawler::ConnectionTracker;
    /// use tokio::sync::mpsc;
    ///
    /// let (tx, rx) = mpsc::unbounded_channel();
    /// let mut tracker = ConnectionTracker::new(rx);
    /// tx.send(PageEvent::RequestStarted { id: "1".into(), url: "http://localhost/api".into() }).unwrap();
    ///
    /// assert_eq!(
    ///     tracker.augment_timeout_error("Navigation timeout"),
    ///     "Navigation timeout\nFor http://localhost/api"
    /// );
    /// ```
    pub fn augment_timeout_error(&mut self, message: &str) -> String {
        let urls = self.pending_urls();
        match urls.len() {
            0 => message.to_string(),
            1 => format!("{}\nFor {}", message, urls[0]),
            _ => format!(
                "{}\nTracked URLs that have not finished loading:\n{}",
                message,
                urls.join("\n")
            ),
        }
    }
}
