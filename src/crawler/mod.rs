//! Crawler module for rendering routes and following their links
//!
//! This module contains the core snapshot logic, including:
//! - The deduplicating route frontier
//! - Render sessions and the worker pool that runs them
//! - Link extraction and stylesheet fetching
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
pub mod frontier;
mod observer;
mod parser;
pub mod pool;
pub mod session;
pub mod tracker;

pub use coordinator::run;
pub use fetcher::{fetch_stylesheets, FetchedStylesheet};
pub use frontier::{Admission, Frontier, FrontierCounters};
pub use observer::{CrawlObserver, NoopObserver, ResponsePredicate};
pub use parser::{extract_title, parse_html, ParsedPage};
pub use session::Session;
pub use tracker::ConnectionTracker;

pub use crate::finalize::RenderedPage;
