//! Output module for snapshot artifacts and crawl summaries
//!
//! This module handles:
//! - Mapping routes to artifact paths and writing them
//! - Aggregating the HTTP/2 push manifest
//! - Recording the crawl report

pub mod artifact;
pub mod push_manifest;
pub mod report;

pub use artifact::ArtifactPaths;
pub use push_manifest::{PushManifest, MANIFEST_FILE};
pub use report::{CrawlReport, RouteLog, SavedArtifact};
