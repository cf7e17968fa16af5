//! Headless Chromium render driver
//!
//! Each context is a tab driven over the DevTools protocol. Network events
//! are pumped into the context's `EventHub` and also feed an in-flight set
//! used to wait for network quiescence after the load event.
//!
//! Isolation:
//! - `per-page`: every context launches and owns its own browser
//! - `shared`: one browser is launched lazily and every context is a tab in it

use super::{
    BrowserDriver, BrowserError, CaptureOptions, EventHub, ImageFormat, PageCapture, PageEvent,
    RenderContext,
};
use crate::config::{Config, Isolation};
use crate::url::Origin;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
    FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::log::{
    EnableParams as LogEnableParams, EventEntryAdded,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, ErrorReason, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams, ResourceType,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// Quiet period with no in-flight requests that counts as network idle
const NETWORK_IDLE: Duration = Duration::from_millis(500);

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Runs in the page after rendering; marks live state and serializes the document
const CAPTURE_SCRIPT: &str = r#"(() => {
  const rules = {};
  if (__INSERT_RULES__) {
    let next = 0;
    for (const style of document.querySelectorAll('style')) {
      if (style.textContent.trim() !== '' || !style.sheet) continue;
      const text = Array.from(style.sheet.cssRules).map((rule) => rule.cssText).join('');
      if (text === '') continue;
      const id = String(next++);
      style.setAttribute('data-snap-rules', id);
      rules[id] = text;
    }
  }
  for (const input of document.querySelectorAll('input[type=radio], input[type=checkbox]')) {
    if (input.checked) input.setAttribute('data-snap-checked', '');
    else input.removeAttribute('data-snap-checked');
  }
  for (const option of document.querySelectorAll('option')) {
    if (option.selected) option.setAttribute('data-snap-selected', '');
    else option.removeAttribute('data-snap-selected');
  }
  let state = null;
  if (typeof window.snapSaveState === 'function') {
    try { state = window.snapSaveState(); } catch (e) { state = null; }
  }
  const doctype = document.doctype ? new XMLSerializer().serializeToString(document.doctype) : '';
  return {
    html: doctype + document.documentElement.outerHTML,
    location: window.location.href,
    rules,
    state: state && typeof state === 'object' && !Array.isArray(state) ? state : null,
  };
})()"#;

#[derive(Debug, Deserialize)]
struct CaptureResult {
    html: String,
    location: String,
    rules: BTreeMap<String, String>,
    state: Option<BTreeMap<String, serde_json::Value>>,
}

fn protocol<E: std::fmt::Display>(error: E) -> BrowserError {
    BrowserError::Protocol(error.to_string())
}

#[derive(Debug, Clone)]
struct LaunchOptions {
    headless: bool,
    args: Vec<String>,
    executable_path: Option<String>,
    width: u32,
    height: u32,
}

struct LaunchedBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl LaunchedBrowser {
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!("Browser close failed: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Driver backed by headless Chromium
pub struct ChromiumDriver {
    launch: LaunchOptions,
    isolation: Isolation,
    origin: Origin,
    user_agent: String,
    skip_third_party_requests: bool,
    cache_ajax_requests: bool,
    shared: tokio::sync::Mutex<Option<LaunchedBrowser>>,
}

impl ChromiumDriver {
    pub fn from_config(config: &Config) -> Result<Self, BrowserError> {
        let origin = Origin::parse(&config.base_url())
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let crawler = &config.crawler;

        Ok(Self {
            launch: LaunchOptions {
                headless: crawler.headless,
                args: crawler.browser_args.clone(),
                executable_path: crawler.executable_path.clone(),
                width: crawler.viewport.width,
                height: crawler.viewport.height,
            },
            isolation: crawler.isolation,
            origin,
            user_agent: crawler.user_agent.clone(),
            skip_third_party_requests: crawler.skip_third_party_requests,
            cache_ajax_requests: crawler.cache_ajax_requests,
            shared: tokio::sync::Mutex::new(None),
        })
    }

    async fn launch(&self) -> Result<LaunchedBrowser, BrowserError> {
        let options = &self.launch;
        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .viewport(CdpViewport {
                width: options.width,
                height: options.height,
                ..CdpViewport::default()
            })
            .args(options.args.clone());

        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable_path {
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(BrowserError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        tracing::debug!("Launched browser");
        Ok(LaunchedBrowser { browser, handler })
    }

    async fn attach(
        &self,
        page: Page,
        owned: Option<LaunchedBrowser>,
    ) -> Result<Box<dyn RenderContext>, BrowserError> {
        page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
            .map_err(protocol)?;
        page.execute(NetworkEnableParams::default())
            .await
            .map_err(protocol)?;
        page.execute(LogEnableParams::default())
            .await
            .map_err(protocol)?;

        let hub = Arc::new(Mutex::new(EventHub::default()));
        let network = Arc::new(Mutex::new(NetworkState::new()));
        let mut tasks = vec![
            spawn_event_pump(
                page.clone(),
                hub.clone(),
                network.clone(),
                self.cache_ajax_requests,
            )
            .await?,
        ];

        if self.skip_third_party_requests {
            tasks.push(spawn_third_party_filter(page.clone(), self.origin.clone()).await?);
        }

        Ok(Box::new(ChromiumContext {
            page: Some(page),
            owned,
            hub,
            network,
            tasks,
        }))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&self) -> Result<Box<dyn RenderContext>, BrowserError> {
        match self.isolation {
            Isolation::PerPage => {
                let launched = self.launch().await?;
                let page = launched
                    .browser
                    .new_page("about:blank")
                    .await
                    .map_err(protocol)?;
                self.attach(page, Some(launched)).await
            }
            Isolation::Shared => {
                let page = {
                    let mut shared = self.shared.lock().await;
                    if shared.is_none() {
                        *shared = Some(self.launch().await?);
                    }
                    let launched = shared.as_ref().ok_or(BrowserError::Closed)?;
                    launched
                        .browser
                        .new_page("about:blank")
                        .await
                        .map_err(protocol)?
                };
                self.attach(page, None).await
            }
        }
    }

    async fn shutdown(&self) -> Result<(), BrowserError> {
        if let Some(launched) = self.shared.lock().await.take() {
            launched.close().await;
        }
        Ok(())
    }
}

/// In-flight requests, used for the network idle wait
struct NetworkState {
    inflight: HashSet<String>,
    last_activity: Instant,
}

impl NetworkState {
    fn new() -> Self {
        Self {
            inflight: HashSet::new(),
            last_activity: Instant::now(),
        }
    }

    fn start(&mut self, id: String) {
        self.inflight.insert(id);
        self.last_activity = Instant::now();
    }

    fn settle(&mut self, id: &str) {
        self.inflight.remove(id);
        self.last_activity = Instant::now();
    }

    fn is_idle(&self) -> bool {
        self.inflight.is_empty() && self.last_activity.elapsed() >= NETWORK_IDLE
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Metadata of a JSON response whose body is read once loading finishes
struct PendingJson {
    url: String,
    status: u16,
    content_type: String,
}

async fn spawn_event_pump(
    page: Page,
    hub: Arc<Mutex<EventHub>>,
    network: Arc<Mutex<NetworkState>>,
    cache_ajax: bool,
) -> Result<JoinHandle<()>, BrowserError> {
    let mut started = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(protocol)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(protocol)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(protocol)?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(protocol)?;
    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(protocol)?;
    let mut log_entries = page
        .event_listener::<EventEntryAdded>()
        .await
        .map_err(protocol)?;
    let mut exceptions = page
        .event_listener::<EventExceptionThrown>()
        .await
        .map_err(protocol)?;

    Ok(tokio::spawn(async move {
        let mut pending_json: HashMap<String, PendingJson> = HashMap::new();
        let publish = |event: PageEvent| lock(&hub).publish(event);

        loop {
            tokio::select! {
                Some(event) = started.next() => {
                    let id = event.request_id.inner().clone();
                    lock(&network).start(id.clone());
                    publish(PageEvent::RequestStarted { id, url: event.request.url.clone() });
                }
                Some(event) = finished.next() => {
                    let id = event.request_id.inner().clone();
                    if let Some(pending) = pending_json.remove(&id) {
                        let json = read_json_body(&page, &event.request_id).await;
                        publish(PageEvent::Response {
                            url: pending.url,
                            status: pending.status,
                            content_type: Some(pending.content_type),
                            json,
                        });
                    }
                    lock(&network).settle(&id);
                    publish(PageEvent::RequestFinished { id });
                }
                Some(event) = failed.next() => {
                    let id = event.request_id.inner().clone();
                    pending_json.remove(&id);
                    lock(&network).settle(&id);
                    publish(PageEvent::RequestFailed { id, error: event.error_text.clone() });
                }
                Some(event) = responses.next() => {
                    let status = u16::try_from(event.response.status).unwrap_or(0);
                    let content_type = event.response.mime_type.clone();
                    let is_ajax = matches!(event.r#type, ResourceType::Xhr | ResourceType::Fetch);

                    if cache_ajax && is_ajax && content_type.contains("json") {
                        pending_json.insert(
                            event.request_id.inner().clone(),
                            PendingJson { url: event.response.url.clone(), status, content_type },
                        );
                    } else {
                        publish(PageEvent::Response {
                            url: event.response.url.clone(),
                            status,
                            content_type: Some(content_type),
                            json: None,
                        });
                    }
                }
                Some(event) = console.next() => {
                    let text = event
                        .args
                        .iter()
                        .map(|arg| match (&arg.value, &arg.description) {
                            (Some(serde_json::Value::String(s)), _) => s.clone(),
                            (Some(value), _) => value.to_string(),
                            (None, Some(description)) => description.clone(),
                            (None, None) => String::new(),
                        })
                        .collect::<Vec<_>>()
                        .join(" ");
                    let location = event
                        .stack_trace
                        .as_ref()
                        .and_then(|trace| trace.call_frames.first())
                        .map(|frame| format!("{}:{}", frame.url, frame.line_number));
                    publish(PageEvent::Console { text, location });
                }
                Some(event) = log_entries.next() => {
                    publish(PageEvent::Console {
                        text: event.entry.text.clone(),
                        location: event.entry.url.clone(),
                    });
                }
                Some(event) = exceptions.next() => {
                    let details = &event.exception_details;
                    let message = details
                        .exception
                        .as_ref()
                        .and_then(|e| e.description.as_deref())
                        .and_then(|d| d.lines().next())
                        .unwrap_or(&details.text)
                        .to_string();
                    publish(PageEvent::PageError { message });
                }
                else => break,
            }
        }
    }))
}

async fn read_json_body(
    page: &Page,
    request_id: &chromiumoxide::cdp::browser_protocol::network::RequestId,
) -> Option<serde_json::Value> {
    let response = page
        .execute(GetResponseBodyParams::new(request_id.clone()))
        .await
        .ok()?;
    if response.result.base64_encoded {
        return None;
    }
    serde_json::from_str(&response.result.body).ok()
}

async fn spawn_third_party_filter(page: Page, origin: Origin) -> Result<JoinHandle<()>, BrowserError> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(protocol)?;
    page.execute(FetchEnableParams::default())
        .await
        .map_err(protocol)?;

    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let third_party = Url::parse(&event.request.url)
                .map(|url| url.scheme().starts_with("http") && !origin.contains(&url))
                .unwrap_or(false);

            let result = if third_party {
                tracing::trace!("Aborting third-party request {}", event.request.url);
                page.execute(FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::BlockedByClient,
                ))
                .await
                .map(|_| ())
            } else {
                page.execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };

            if let Err(e) = result {
                tracing::debug!("Request interception failed: {}", e);
            }
        }
    }))
}

struct ChromiumContext {
    page: Option<Page>,
    owned: Option<LaunchedBrowser>,
    hub: Arc<Mutex<EventHub>>,
    network: Arc<Mutex<NetworkState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumContext {
    fn page(&self) -> Result<&Page, BrowserError> {
        self.page.as_ref().ok_or(BrowserError::Closed)
    }

    async fn wait_for_network_idle(&self) {
        loop {
            if lock(&self.network).is_idle() {
                return;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PageEvent> {
        lock(&self.hub).subscribe()
    }

    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError> {
        let page = self.page()?.clone();
        let navigation = async {
            page.goto(url.as_str())
                .await
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            self.wait_for_network_idle().await;
            Ok(())
        };

        match tokio::time::timeout(timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn capture(&mut self, options: CaptureOptions) -> Result<PageCapture, BrowserError> {
        let script = CAPTURE_SCRIPT.replace(
            "__INSERT_RULES__",
            if options.insert_rules { "true" } else { "false" },
        );

        let result: CaptureResult = self
            .page()?
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(protocol)?;

        Ok(PageCapture {
            html: result.html,
            location: result.location,
            inserted_rules: result.rules,
            snapshot_state: result.state,
            form_state_marked: true,
        })
    }

    async fn screenshot(&mut self, format: ImageFormat) -> Result<Vec<u8>, BrowserError> {
        let format = match format {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        };

        self.page()?
            .screenshot(ScreenshotParams::builder().format(format).full_page(true).build())
            .await
            .map_err(protocol)
    }

    async fn close(mut self: Box<Self>) -> Result<(), BrowserError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!("Page close failed: {}", e);
            }
        }
        if let Some(launched) = self.owned.take() {
            launched.close().await;
        }
        Ok(())
    }
}
