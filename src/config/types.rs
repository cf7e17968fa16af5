use serde::{Deserialize, Serialize};

/// Main configuration structure for Sumi-Snap
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub crawler: CrawlerConfig,
    pub finalize: FinalizeConfig,
    pub output: OutputConfig,
}

/// Where the built application is being served during the crawl
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Scheme and host, e.g. `http://localhost`
    pub base_path: String,

    /// Port the app is served on; `None` means the scheme default
    pub port: Option<u16>,

    /// Path prefix the app is mounted under
    pub public_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_path: "http://localhost".to_string(),
            port: Some(45678),
            public_path: "/".to_string(),
        }
    }
}

/// Crawl scheduling and render session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Directory holding the built application
    pub source: String,

    /// Directory snapshots are written to (defaults to `source`)
    pub destination: Option<String>,

    /// Number of concurrent render sessions
    pub concurrency: u32,

    /// How render contexts are isolated from each other
    pub isolation: Isolation,

    /// Which render driver to use
    pub driver: DriverKind,

    /// Routes to start from
    pub include: Vec<String>,

    /// Regular expressions; matching URL paths are never enqueued
    pub exclude: Vec<String>,

    /// Follow links discovered on rendered pages
    pub crawl: bool,

    /// User agent presented to the app
    pub user_agent: String,

    /// Upper bound for a navigation to reach network quiescence (milliseconds)
    pub navigation_timeout_ms: u64,

    /// Extra delay after navigation (milliseconds, 0 disables)
    pub wait_for_ms: u64,

    /// Regex; when set, wait for a response whose URL matches after navigation
    pub wait_for_response_url: Option<String>,

    /// Keep crawling after page errors
    pub ignore_page_errors: bool,

    /// Abort requests that leave the app origin
    pub skip_third_party_requests: bool,

    /// Capture JSON responses into `window.snapStore`
    pub cache_ajax_requests: bool,

    pub headless: bool,

    /// Extra command line arguments for the browser
    pub browser_args: Vec<String>,

    /// Browser executable override
    pub executable_path: Option<String>,

    pub viewport: Viewport,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            source: "build".to_string(),
            destination: None,
            concurrency: 4,
            isolation: Isolation::PerPage,
            driver: DriverKind::default(),
            include: vec!["/".to_string()],
            exclude: Vec::new(),
            crawl: true,
            user_agent: "SumiSnap".to_string(),
            navigation_timeout_ms: 30_000,
            wait_for_ms: 0,
            wait_for_response_url: None,
            ignore_page_errors: false,
            skip_third_party_requests: false,
            cache_ajax_requests: false,
            headless: true,
            browser_args: Vec::new(),
            executable_path: None,
            viewport: Viewport::default(),
        }
    }
}

/// Browser viewport size; mobile first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 480,
            height: 850,
        }
    }
}

/// Render context isolation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// A fresh browser for every page
    PerPage,
    /// One browser shared by the whole pool, one tab per page
    Shared,
}

/// Render driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// Headless Chromium (requires the `chromium` feature)
    Chromium,
    /// Plain HTTP fetch; no script execution
    Http,
}

impl Default for DriverKind {
    fn default() -> Self {
        if cfg!(feature = "chromium") {
            Self::Chromium
        } else {
            Self::Http
        }
    }
}

/// Finalization pipeline toggles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FinalizeConfig {
    pub remove_style_tags: bool,
    pub remove_script_tags: bool,
    pub remove_blobs: bool,
    pub clean_preloads: bool,
    pub inline_css: bool,
    pub minify_css: bool,
    pub warn_on_inline_css_kb: u64,
    pub leave_link_css: bool,
    pub chunk_strategy: ChunkStrategy,
    pub async_script_tags: bool,
    pub fix_insert_rule: bool,
    pub minify_html: bool,
    pub preload_images: bool,
    pub preconnect_third_party: bool,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            remove_style_tags: false,
            remove_script_tags: false,
            remove_blobs: true,
            clean_preloads: false,
            inline_css: false,
            minify_css: true,
            warn_on_inline_css_kb: 20,
            leave_link_css: false,
            chunk_strategy: ChunkStrategy::Cra1,
            async_script_tags: false,
            fix_insert_rule: true,
            minify_html: true,
            preload_images: false,
            preconnect_third_party: true,
        }
    }
}

/// Bundler naming convention used to relocate chunk scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    /// create-react-app v1 / v2 alpha
    Cra1,
    /// create-react-app v2
    Cra2,
    Parcel,
    None,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Artifact formats written per route
    pub save_as: Vec<SaveAs>,

    /// Base file name for directory-style routes (no extension)
    pub file_name: String,

    /// Write `http2-push-manifest.json` at the destination root
    pub http2_push_manifest: bool,

    /// File names never turned into push hints
    pub ignore_for_preload: Vec<String>,

    /// Optional path for a JSON crawl report
    pub report_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_as: vec![SaveAs::Html],
            file_name: "index".to_string(),
            http2_push_manifest: false,
            ignore_for_preload: vec!["service-worker.js".to_string()],
            report_path: None,
        }
    }
}

/// Artifact format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveAs {
    Html,
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl SaveAs {
    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

impl Config {
    /// Destination directory, falling back to the source directory
    pub fn destination(&self) -> &str {
        self.crawler
            .destination
            .as_deref()
            .unwrap_or(&self.crawler.source)
    }

    /// Whether any HTML artifacts are written
    pub fn saves_html(&self) -> bool {
        self.output.save_as.contains(&SaveAs::Html)
    }

    /// `base-path` joined with the port, e.g. `http://localhost:45678`
    pub fn base_url(&self) -> String {
        match self.server.port {
            Some(port) => format!("{}:{}", self.server.base_path, port),
            None => self.server.base_path.clone(),
        }
    }
}
