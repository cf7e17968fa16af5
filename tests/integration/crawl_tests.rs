//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small app and run full snapshot
//! crawls through the plain HTTP driver.

use std::path::Path;
use std::sync::Arc;
use sumi_snap::browser::http::{build_http_client, HttpDriver};
use sumi_snap::config::{parse_config, Config};
use sumi_snap::{run, CrawlPhase, CrawlReport, NoopObserver, RouteState, SnapError};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INDEX: &str = r#"<!DOCTYPE html><html><head><title>App</title></head><body><div id="root"></div></body></html>"#;

/// Creates a test configuration pointing at the mock server
fn create_test_config(server: &MockServer, source: &Path, extra: &str) -> Config {
    std::fs::write(source.join("index.html"), INDEX).unwrap();

    let uri = url::Url::parse(&server.uri()).unwrap();
    let port = uri.port().expect("mock server has a port");

    let toml = format!(
        r#"
[server]
base-path = "http://127.0.0.1"
port = {port}

[crawler]
source = "{source}"
driver = "http"
concurrency = 2
navigation-timeout-ms = 5000
{extra}
"#,
        port = port,
        source = source.display(),
        extra = extra,
    );
    parse_config(&toml).expect("valid test config")
}

async fn mount_page(server: &MockServer, route: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html.to_string(), "text/html"))
        .mount(server)
        .await;
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{}</title></head><body>{}</body></html>",
        title, body
    )
}

async fn snapshot(config: Config) -> Result<CrawlReport, SnapError> {
    let driver = Arc::new(HttpDriver::new(build_http_client("SumiSnapTest").unwrap()));
    run(config, driver, Arc::new(NoopObserver)).await
}

fn read(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn test_full_crawl_single_origin() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "/",
        &page(
            "Home",
            r#"<a href="/about">About</a> <a href="/about?ref=nav">About again</a> <a href="/about#team">Team</a> <a href="https://example.com/">Elsewhere</a>"#,
        ),
    )
    .await;
    mount_page(&server, "/about", &page("About", r#"<a href="/">Home</a>"#)).await;
    mount_page(&server, "/404.html", &page("404 - Not found", "")).await;

    let config = create_test_config(&server, dir.path(), "");
    let report = snapshot(config).await.unwrap();

    // `/`, `/about` and the 404 sentinel; query and fragment variants dedupe
    assert_eq!(report.counters.enqueued, 3);
    assert_eq!(report.counters.processed, 3);
    assert_eq!(report.phase, CrawlPhase::Closed);
    assert_eq!(report.count(RouteState::Saved), 3);

    assert_eq!(read(dir.path().join("200.html")), INDEX);
    assert!(read(dir.path().join("index.html")).contains("<title>Home</title>"));
    assert!(read(dir.path().join("about/index.html")).contains("<title>About</title>"));
    assert!(read(dir.path().join("404.html")).contains("404 - Not found"));
}

#[tokio::test]
async fn test_excluded_routes_are_never_requested() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "/",
        &page("Home", r#"<a href="/admin/users">Admin</a><a href="/docs">Docs</a>"#),
    )
    .await;
    mount_page(&server, "/docs", &page("Docs", "")).await;
    mount_page(&server, "/404.html", &page("404", "")).await;
    Mock::given(method("GET"))
        .and(path("/admin/users"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), r#"exclude = ["^/admin"]"#);
    let report = snapshot(config).await.unwrap();

    assert!(!report.routes.contains_key("/admin/users"));
    assert!(!dir.path().join("admin").exists());
    assert!(dir.path().join("docs/index.html").exists());
    server.verify().await;
}

#[tokio::test]
async fn test_missing_route_fails_crawl() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(&server, "/", &page("Home", r#"<a href="/gone">Gone</a>"#)).await;

    let config = create_test_config(&server, dir.path(), "crawl = true\nconcurrency = 1");
    let result = snapshot(config).await;

    match result {
        Err(SnapError::CrawlFailed { failed, report }) => {
            assert!(failed >= 1);
            assert_eq!(report.routes["/gone"], RouteState::Failed);
            assert_eq!(report.counters.processed, report.counters.enqueued);
        }
        other => panic!("expected a failed crawl, got {:?}", other.map(|r| r.counters)),
    }
    assert!(!dir.path().join("gone").exists());
}

#[tokio::test]
async fn test_ignore_page_errors_keeps_crawling() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "/",
        &page("Home", r#"<a href="/gone">Gone</a><a href="/kept">Kept</a>"#),
    )
    .await;
    mount_page(&server, "/kept", &page("Kept", "")).await;

    let config = create_test_config(&server, dir.path(), "ignore-page-errors = true\nconcurrency = 1");
    let report = snapshot(config).await.unwrap();

    assert_eq!(report.routes["/gone"], RouteState::Failed);
    assert_eq!(report.routes["/404.html"], RouteState::Failed);
    assert_eq!(report.routes["/kept"], RouteState::Saved);
    assert!(dir.path().join("kept/index.html").exists());
}

#[tokio::test]
async fn test_server_redirect_is_fed_back() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    mount_page(&server, "/new", &page("New", "")).await;

    let config = create_test_config(&server, dir.path(), "include = [\"/old\"]\ncrawl = false");
    let report = snapshot(config).await.unwrap();

    assert_eq!(report.redirects, vec!["/old -> /new"]);
    assert_eq!(report.counters.enqueued, 2);
    assert!(read(dir.path().join("old/index.html")).contains("<title>New</title>"));
    assert!(dir.path().join("new/index.html").exists());
}

#[tokio::test]
async fn test_push_manifest_from_chunks() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "/",
        &page(
            "Home",
            r#"<script src="/static/js/main.1a2b3c4d.js"></script><script src="/static/js/1.5e6f7a8b.chunk.js"></script>"#,
        ),
    )
    .await;

    let config = create_test_config(
        &server,
        dir.path(),
        "crawl = false\n[output]\nhttp2-push-manifest = true",
    );
    snapshot(config).await.unwrap();

    assert_eq!(
        read(dir.path().join("http2-push-manifest.json")),
        concat!(
            r#"[{"source":"/","headers":[{"key":"Link","value":"#,
            r#""</static/js/main.1a2b3c4d.js>;rel=preload;as=script,"#,
            r#"</static/js/1.5e6f7a8b.chunk.js>;rel=preload;as=script"}]}]"#,
        )
    );
    let html = read(dir.path().join("index.html"));
    assert!(html.contains("main.1a2b3c4d.js"));
    assert!(!html.contains("1.5e6f7a8b.chunk.js"));
}

#[tokio::test]
async fn test_inline_css() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "/",
        r#"<!DOCTYPE html><html><head><title>Home</title><link rel="stylesheet" href="/static/css/main.css"></head><body><h1 class="title">Hi</h1></body></html>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/static/css/main.css"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(".title { color: red; }", "text/css"))
        .mount(&server)
        .await;

    let config = create_test_config(
        &server,
        dir.path(),
        "crawl = false\n[finalize]\ninline-css = true",
    );
    snapshot(config).await.unwrap();

    let html = read(dir.path().join("index.html"));
    assert!(html.contains("<style>.title{color:red}</style>"));
    assert!(!html.contains(r#"rel="stylesheet""#));
}

#[tokio::test]
async fn test_refuses_second_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_page(&server, "/", &page("Home", "")).await;

    let config = create_test_config(&server, dir.path(), "crawl = false");
    snapshot(config.clone()).await.unwrap();

    let second = snapshot(config).await;
    assert!(matches!(second, Err(SnapError::AlreadySnapshotted(_))));
}
