//! Crawl coordinator - top-level snapshot orchestration
//!
//! This module wires the pieces of a crawl together:
//! - Seeding the SPA fallback (`200.html`)
//! - Enqueueing the include routes
//! - Running the worker pool until the crawl closes
//! - Writing the push manifest and the crawl report

use super::observer::CrawlObserver;
use super::pool::run_workers;
use super::session::Session;
use crate::browser::BrowserDriver;
use crate::config::Config;
use crate::output::CrawlReport;
use crate::SnapError;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Snapshots every reachable route of the app
///
/// # Arguments
///
/// * `config` - A validated configuration
/// * `driver` - Render driver, shut down before this returns
/// * `observer` - Lifecycle hooks
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Every route was processed without a fatal error
/// * `Err(SnapError::CrawlFailed)` - A fatal error drained the crawl; the
///   partial report is attached
/// * `Err(SnapError)` - The crawl could not start or its outputs could not
///   be written
pub async fn run(
    config: Config,
    driver: Arc<dyn BrowserDriver>,
    observer: Arc<dyn CrawlObserver>,
) -> Result<CrawlReport, SnapError> {
    seed_spa_fallback(&config).await?;

    let concurrency = config.crawler.concurrency as usize;
    let session = Arc::new(Session::new(config, driver, observer)?);
    crawl(session, concurrency).await
}

async fn crawl(session: Arc<Session>, concurrency: usize) -> Result<CrawlReport, SnapError> {
    let config = &session.config;
    let base = session.frontier.origin().base();
    tracing::info!("Crawling paths on {}{}", base, config.server.public_path);

    for include in &config.crawler.include {
        let admission = session.frontier.add(&format!("{}{}", base, include));
        tracing::debug!("Include {}: {:?}", include, admission);
    }

    if session.frontier.counters().enqueued == 0 {
        tracing::warn!("No include route could be enqueued");
        session.shutdown.close();
    }

    let signals = session.shutdown.listen_for_signals();

    tokio::select! {
        _ = session.shutdown.wait_closed() => {
            tracing::debug!("Crawl closed, cancelling wait for idle workers");
        }
        _ = run_workers(session.clone(), concurrency) => {
            tracing::debug!("All workers finished");
        }
    }
    signals.abort();

    if let Err(e) = session.driver.shutdown().await {
        tracing::warn!("Browser shutdown failed: {}", e);
    }

    if config.output.http2_push_manifest {
        let manifest = session.manifest().clone();
        manifest.write(Path::new(config.destination())).await?;
    }

    let fatal_errors = session.shutdown.fatal_errors();
    let report = {
        let mut report = std::mem::take(&mut *session.report());
        report.finish(
            session.shutdown.phase(),
            session.frontier.counters(),
            fatal_errors,
        );
        report
    };

    if let Some(path) = &config.output.report_path {
        report.write_json(Path::new(path)).await?;
    }

    session.observer.on_end(&report);

    let counters = report.counters;
    if fatal_errors > 0 {
        tracing::error!(
            "Crawl failed: {} error(s), {} of {} routes processed",
            fatal_errors,
            counters.processed,
            counters.enqueued
        );
        return Err(SnapError::CrawlFailed {
            failed: fatal_errors,
            report: Box::new(report),
        });
    }

    tracing::info!(
        "Crawl completed: {} routes, {} artifacts",
        counters.processed,
        report.saved.len()
    );
    Ok(report)
}

/// Copies `index.html` to `200.html` so the server can fall back to the
/// unrendered app for routes that were never snapshotted
async fn seed_spa_fallback(config: &Config) -> Result<(), SnapError> {
    let source = Path::new(&config.crawler.source);
    let destination = Path::new(config.destination());
    let fallback = source.join("200.html");

    if source == destination
        && config.saves_html()
        && tokio::fs::try_exists(&fallback).await?
    {
        return Err(SnapError::AlreadySnapshotted(source.display().to_string()));
    }

    let index = source.join("index.html");
    match tokio::fs::copy(&index, &fallback).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!("{} not found, no 200.html written", index.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    if source != destination && config.saves_html() {
        tokio::fs::create_dir_all(destination).await?;
        tokio::fs::copy(&index, destination.join("200.html")).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{ScriptedDriver, ScriptedPage};
    use crate::config::parse_config;
    use crate::crawler::NoopObserver;
    use crate::state::{CrawlPhase, RouteState};
    use crate::url::Route;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const INDEX: &str = "<html><head><title>App</title></head><body><div id=\"root\"></div></body></html>";

    fn config(source: &TempDir, extra: &str) -> Config {
        std::fs::write(source.path().join("index.html"), INDEX).unwrap();
        parse_config(&format!(
            "[crawler]\nsource = \"{}\"\ndriver = \"http\"\n{}",
            source.path().display(),
            extra
        ))
        .unwrap()
    }

    fn page(title: &str, links: &[&str]) -> ScriptedPage {
        let anchors = links
            .iter()
            .map(|href| format!("<a href=\"{}\">{}</a>", href, href))
            .collect::<String>();
        ScriptedPage::html(&format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, anchors
        ))
    }

    async fn run_scripted(config: Config, driver: ScriptedDriver) -> (Result<CrawlReport, SnapError>, Arc<ScriptedDriver>) {
        let driver = Arc::new(driver);
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run(config, driver.clone(), Arc::new(NoopObserver)),
        )
        .await
        .unwrap();
        (result, driver)
    }

    #[tokio::test]
    async fn test_seeds_fallback_and_crawls_site() {
        let dir = TempDir::new().unwrap();
        let driver = ScriptedDriver::new()
            .page("/", page("Home", &["/a", "/b?x=1", "/b#top"]))
            .page("/a", page("A", &["/"]))
            .page("/b", page("B", &[]))
            .page("/404.html", page("404 - Not found", &[]));

        let (result, driver) = run_scripted(config(&dir, ""), driver).await;
        let report = result.unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("200.html")).unwrap(), INDEX);
        assert!(dir.path().join("index.html").exists());
        assert!(dir.path().join("a/index.html").exists());
        assert!(dir.path().join("b/index.html").exists());
        assert!(dir.path().join("404.html").exists());

        assert_eq!(report.counters.enqueued, 4);
        assert_eq!(report.counters.processed, 4);
        assert_eq!(report.phase, CrawlPhase::Closed);
        assert_eq!(report.count(RouteState::Saved), 4);
        assert!(report.finished_at.is_some());
        assert_eq!(driver.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refuses_to_run_twice() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "");
        std::fs::write(dir.path().join("200.html"), INDEX).unwrap();

        let (result, driver) = run_scripted(config, ScriptedDriver::new()).await;

        assert!(matches!(result, Err(SnapError::AlreadySnapshotted(_))));
        assert_eq!(driver.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_separate_destination_gets_fallback() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        std::fs::write(source.path().join("200.html"), "stale").unwrap();
        let config = config(
            &source,
            &format!("destination = \"{}\"\ncrawl = false", destination.path().display()),
        );

        let (result, _) = run_scripted(config, ScriptedDriver::new().page("/", page("Home", &[]))).await;

        result.unwrap();
        assert_eq!(std::fs::read_to_string(source.path().join("200.html")).unwrap(), INDEX);
        assert_eq!(std::fs::read_to_string(destination.path().join("200.html")).unwrap(), INDEX);
        assert!(destination.path().join("index.html").exists());
    }

    #[tokio::test]
    async fn test_all_includes_excluded_closes_immediately() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "exclude = [\"^/$\"]");

        let (result, driver) = run_scripted(config, ScriptedDriver::new()).await;
        let report = result.unwrap();

        assert_eq!(report.counters.enqueued, 0);
        assert_eq!(report.phase, CrawlPhase::Closed);
        assert_eq!(driver.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_returns_partial_report() {
        let dir = TempDir::new().unwrap();
        let driver = ScriptedDriver::new()
            .page(
                "/",
                ScriptedPage {
                    hang: true,
                    ..ScriptedPage::default()
                },
            )
            .page("/a", page("A", &[]));
        let config = config(&dir, "include = [\"/\", \"/a\"]\nconcurrency = 1\nnavigation-timeout-ms = 20");

        let (result, driver) = run_scripted(config, driver).await;

        match result {
            Err(SnapError::CrawlFailed { failed, report }) => {
                assert_eq!(failed, 1);
                assert_eq!(report.routes["/"], RouteState::Failed);
                assert_eq!(report.routes["/a"], RouteState::Skipped);
            }
            other => panic!("expected CrawlFailed, got {:?}", other.map(|r| r.counters)),
        }
        assert_eq!(driver.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_manifest_and_report_written() {
        let dir = TempDir::new().unwrap();
        let report_path = dir.path().join("snap-report.json");
        let home = ScriptedPage {
            events: vec![crate::browser::PageEvent::Response {
                url: "http://localhost:45678/static/js/main.js".to_string(),
                status: 200,
                content_type: Some("application/javascript".to_string()),
                json: None,
            }],
            ..page("Home", &[])
        };
        let config = config(
            &dir,
            &format!(
                "crawl = false\n[output]\nhttp2-push-manifest = true\nreport-path = \"{}\"",
                report_path.display()
            ),
        );

        let (result, _) = run_scripted(config, ScriptedDriver::new().page("/", home)).await;
        result.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("http2-push-manifest.json")).unwrap(),
            r#"[{"source":"/","headers":[{"key":"Link","value":"</static/js/main.js>;rel=preload;as=script"}]}]"#
        );
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(report["routes"]["/"], "saved");
    }

    #[derive(Default)]
    struct CountingObserver {
        before: AtomicUsize,
        after: AtomicUsize,
        ended: AtomicUsize,
    }

    impl CrawlObserver for CountingObserver {
        fn before_fetch(&self, _route: &Route) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_fetch(&self, _route: &Route, _page: &crate::finalize::RenderedPage) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }

        fn process_html(&self, _route: &Route, html: String) -> String {
            html.replace("</body>", "<!-- snapped --></body>")
        }

        fn on_end(&self, _report: &CrawlReport) {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_observer_hooks() {
        let dir = TempDir::new().unwrap();
        let observer = Arc::new(CountingObserver::default());
        let driver = ScriptedDriver::new().page("/", page("Home", &[]));

        run(
            config(&dir, "crawl = false"),
            Arc::new(driver),
            observer.clone(),
        )
        .await
        .unwrap();

        assert_eq!(observer.before.load(Ordering::SeqCst), 1);
        assert_eq!(observer.after.load(Ordering::SeqCst), 1);
        assert_eq!(observer.ended.load(Ordering::SeqCst), 1);
        assert!(std::fs::read_to_string(dir.path().join("index.html"))
            .unwrap()
            .contains("<!-- snapped -->"));
    }
}
