//! Configuration module for Sumi-Snap
//!
//! This module handles loading, normalizing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_snap::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("snap.toml")).unwrap();
//! println!("Snapshots go to: {}", config.destination());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ChunkStrategy, Config, CrawlerConfig, DriverKind, FinalizeConfig, Isolation, OutputConfig,
    SaveAs, ServerConfig, Viewport,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, normalize, parse_config};
