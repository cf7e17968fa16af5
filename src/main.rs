//! Sumi-Snap main entry point
//!
//! This is the command-line interface for the Sumi-Snap SPA snapshotter.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sumi_snap::browser::driver_from_config;
use sumi_snap::config::{load_config_with_hash, Config};
use sumi_snap::{run, NoopObserver, SnapError};
use tracing_subscriber::EnvFilter;

/// Sumi-Snap: static snapshots for single-page applications
///
/// Sumi-Snap renders every reachable route of an already-built and served
/// SPA in a headless browser and writes the finalized HTML (or a
/// screenshot) for each route next to the app.
#[derive(Parser, Debug)]
#[command(name = "sumi-snap")]
#[command(version = "1.0.0")]
#[command(about = "Static snapshots for single-page applications", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without rendering anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_crawl(config, cli.quiet).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_snap=info,warn"),
            1 => EnvFilter::new("sumi_snap=debug,info"),
            2 => EnvFilter::new("sumi_snap=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the resolved configuration
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Snap Dry Run ===\n");

    println!("Server:");
    println!("  Base URL: {}", config.base_url());
    println!("  Public path: {}", display_or(&config.server.public_path, "/"));

    println!("\nCrawler:");
    println!("  Source: {}", config.crawler.source);
    println!("  Destination: {}", config.destination());
    println!("  Driver: {:?}", config.crawler.driver);
    println!("  Concurrency: {} ({:?})", config.crawler.concurrency, config.crawler.isolation);
    println!("  Follow links: {}", config.crawler.crawl);
    println!("  Navigation timeout: {}ms", config.crawler.navigation_timeout_ms);
    if config.crawler.wait_for_ms > 0 {
        println!("  Wait after navigation: {}ms", config.crawler.wait_for_ms);
    }
    if let Some(pattern) = &config.crawler.wait_for_response_url {
        println!("  Wait for response: {}", pattern);
    }
    println!("  Ignore page errors: {}", config.crawler.ignore_page_errors);

    println!("\nInclude ({}):", config.crawler.include.len());
    for include in &config.crawler.include {
        println!("  - {}{}", config.base_url(), include);
    }

    if !config.crawler.exclude.is_empty() {
        println!("\nExclude ({}):", config.crawler.exclude.len());
        for pattern in &config.crawler.exclude {
            println!("  - {}", pattern);
        }
    }

    println!("\nOutput:");
    let formats = config
        .output
        .save_as
        .iter()
        .map(|format| format!("{}.{}", config.output.file_name, format.extension()))
        .collect::<Vec<_>>();
    println!("  Artifacts: {}", formats.join(", "));
    println!("  HTTP/2 push manifest: {}", config.output.http2_push_manifest);
    if let Some(path) = &config.output.report_path {
        println!("  Report: {}", path);
    }

    println!("\n✓ Configuration is valid");
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Snapshotting {} into {}",
        config.base_url(),
        config.destination()
    );

    let driver = driver_from_config(&config)?;

    match run(config, driver, Arc::new(NoopObserver)).await {
        Ok(report) => {
            if !quiet {
                report.print_summary();
            }
            tracing::info!("Crawl completed successfully");
            Ok(())
        }
        Err(SnapError::CrawlFailed { failed, report }) => {
            if !quiet {
                report.print_summary();
            }
            tracing::error!("Crawl failed with {} error(s)", failed);
            Err(SnapError::CrawlFailed { failed, report }.into())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
