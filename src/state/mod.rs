//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `RouteState`: Tracks the state of individual routes (queued, rendering, saved, etc.)
//! - `CrawlPhase`: Crawl-wide lifecycle (running, draining, closed)
//! - `ShutdownCoordinator`: Owns the phase and reacts to errors and signals

mod page_state;
pub mod shutdown;

// Re-export main types
pub use page_state::RouteState;
pub use shutdown::{CrawlPhase, ShutdownCoordinator, SignalAction};
