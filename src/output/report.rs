//! Crawl report
//!
//! Collected while the crawl runs and handed to `CrawlObserver::on_end`,
//! printed as a summary by the binary, and optionally written as JSON.

use crate::crawler::FrontierCounters;
use crate::state::{CrawlPhase, RouteState};
use crate::SnapError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Outcome of a whole crawl
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Phase the crawl ended in
    pub phase: CrawlPhase,

    pub counters: FrontierCounters,

    /// Errors that drained the crawl
    pub fatal_errors: usize,

    /// Final state of every route that reached a worker, keyed by route path
    pub routes: BTreeMap<String, RouteState>,

    /// Artifacts written, in write order
    pub saved: Vec<SavedArtifact>,

    /// In-browser redirects, as `"/old -> /new"`
    pub redirects: Vec<String>,

    /// Warnings and errors per route
    pub logs: Vec<RouteLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedArtifact {
    pub route: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteLog {
    pub url: String,
    pub logs: Vec<String>,
}

impl CrawlReport {
    /// Starts a report stamped with the current time
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            phase: CrawlPhase::Running,
            counters: FrontierCounters::default(),
            fatal_errors: 0,
            routes: BTreeMap::new(),
            saved: Vec::new(),
            redirects: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn set_state(&mut self, route: &str, state: RouteState) {
        self.routes.insert(route.to_string(), state);
    }

    pub fn record_saved(&mut self, route: &str, path: PathBuf) {
        self.saved.push(SavedArtifact {
            route: route.to_string(),
            path,
        });
    }

    pub fn record_redirect(&mut self, from: &str, to: &str) {
        self.redirects.push(format!("{} -> {}", from, to));
    }

    /// Appends a message to the log of `url`
    pub fn log(&mut self, url: &str, message: impl Into<String>) {
        let message = message.into();
        match self.logs.iter_mut().find(|entry| entry.url == url) {
            Some(entry) => entry.logs.push(message),
            None => self.logs.push(RouteLog {
                url: url.to_string(),
                logs: vec![message],
            }),
        }
    }

    /// Stamps the finish time and final counters
    pub fn finish(&mut self, phase: CrawlPhase, counters: FrontierCounters, fatal_errors: usize) {
        self.finished_at = Some(Utc::now());
        self.phase = phase;
        self.counters = counters;
        self.fatal_errors = fatal_errors;
    }

    /// Number of routes that ended in `state`
    pub fn count(&self, state: RouteState) -> usize {
        self.routes.values().filter(|s| **s == state).count()
    }

    /// Routes that failed, in route order
    pub fn failed_routes(&self) -> Vec<&str> {
        self.routes
            .iter()
            .filter(|(_, state)| state.is_error())
            .map(|(route, _)| route.as_str())
            .collect()
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }

    /// Writes the report as pretty JSON
    pub async fn write_json(&self, path: &Path) -> Result<(), SnapError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;
        tracing::info!("Wrote crawl report to {}", path.display());
        Ok(())
    }

    /// Prints a human readable summary to stdout
    pub fn print_summary(&self) {
        println!("=== Snapshot Summary ===\n");

        println!("Overview:");
        println!("  Started: {}", self.started_at.to_rfc3339());
        if let Some(seconds) = self.duration_seconds() {
            println!("  Duration: {}s", seconds);
        }
        println!("  Phase: {}", self.phase);
        println!(
            "  Routes processed: {} of {}",
            self.counters.processed, self.counters.enqueued
        );
        println!("  Artifacts written: {}", self.saved.len());
        println!();

        println!("Routes by State:");
        let total = self.routes.len();
        for state in RouteState::all_states() {
            let count = self.count(state);
            if count == 0 {
                continue;
            }
            let percentage = (count as f64 / total as f64) * 100.0;
            println!("  {}: {} ({:.1}%)", state, count, percentage);
        }
        println!();

        if !self.redirects.is_empty() {
            println!("Redirects ({}):", self.redirects.len());
            for redirect in &self.redirects {
                println!("  - {}", redirect);
            }
            println!();
        }

        let failed = self.failed_routes();
        if !failed.is_empty() {
            println!("Failed Routes ({}):", failed.len());
            for route in failed {
                println!("  - {}", route);
            }
            println!();
        }

        if !self.logs.is_empty() {
            println!("Warnings:");
            for entry in &self.logs {
                println!("  {}", entry.url);
                for message in &entry.logs {
                    println!("    {}", message);
                }
            }
            println!();
        }
    }
}

impl Default for CrawlReport {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logs_grouped_by_url() {
        let mut report = CrawlReport::start();
        report.log("/", "warning at /: got 404 HTTP code for /missing.png");
        report.log("/about", "page not found /about");
        report.log("/", "404 page title does not contain \"404\" string");

        assert_eq!(report.logs.len(), 2);
        assert_eq!(report.logs[0].url, "/");
        assert_eq!(report.logs[0].logs.len(), 2);
        assert_eq!(report.logs[1].logs, vec!["page not found /about"]);
    }

    #[test]
    fn test_state_counts() {
        let mut report = CrawlReport::start();
        report.set_state("/", RouteState::Saved);
        report.set_state("/a", RouteState::Rendering);
        report.set_state("/a", RouteState::Failed);
        report.set_state("/b", RouteState::Skipped);

        assert_eq!(report.count(RouteState::Saved), 1);
        assert_eq!(report.count(RouteState::Rendering), 0);
        assert_eq!(report.failed_routes(), vec!["/a"]);
    }

    #[test]
    fn test_finish() {
        let mut report = CrawlReport::start();
        report.record_redirect("/old", "/new");
        report.finish(
            CrawlPhase::Closed,
            FrontierCounters {
                enqueued: 3,
                processed: 3,
            },
            0,
        );

        assert!(report.finished_at.is_some());
        assert!(report.duration_seconds().unwrap() >= 0);
        assert_eq!(report.redirects, vec!["/old -> /new"]);
    }

    #[tokio::test]
    async fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports/crawl.json");

        let mut report = CrawlReport::start();
        report.set_state("/", RouteState::Saved);
        report.record_saved("/", dir.path().join("index.html"));
        report.write_json(&path).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["routes"]["/"], "saved");
        assert_eq!(value["phase"], "running");
        assert_eq!(value["saved"][0]["route"], "/");
    }
}
