//! HTTP/2 push manifest
//!
//! Collects per-route push hints during the crawl and writes them once at
//! the end as `http2-push-manifest.json`:
//!
//! ```json
//! [{"source":"/","headers":[{"key":"Link","value":"</main.js>;rel=preload;as=script"}]}]
//! ```

use crate::finalize::PushHint;
use crate::SnapError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "http2-push-manifest.json";

/// Push hints per route, ordered by route
#[derive(Debug, Clone, Default)]
pub struct PushManifest {
    routes: BTreeMap<String, Vec<PushHint>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub source: String,
    pub headers: Vec<ManifestHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestHeader {
    pub key: String,
    pub value: String,
}

impl PushManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds hints for a route
    ///
    /// Duplicate hints are dropped, as are hints for stylesheets whose
    /// content was inlined into the page (`inlined` holds path prefixes).
    pub fn record(&mut self, route: &str, hints: &[PushHint], inlined: &[String]) {
        let entry = self.routes.entry(route.to_string()).or_default();

        for hint in hints {
            if inlined.iter().any(|prefix| hint.link.starts_with(prefix.as_str())) {
                continue;
            }
            if !entry.contains(hint) {
                entry.push(hint.clone());
            }
        }
    }

    /// Hints recorded for a route
    pub fn hints(&self, route: &str) -> &[PushHint] {
        self.routes.get(route).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns true when no route has any hint
    pub fn is_empty(&self) -> bool {
        self.routes.values().all(Vec::is_empty)
    }

    /// Manifest entries, skipping routes without hints
    pub fn entries(&self) -> Vec<ManifestEntry> {
        self.routes
            .iter()
            .filter(|(_, hints)| !hints.is_empty())
            .map(|(route, hints)| ManifestEntry {
                source: route.clone(),
                headers: vec![ManifestHeader {
                    key: "Link".to_string(),
                    value: hints
                        .iter()
                        .map(|hint| format!("<{}>;rel=preload;as={}", hint.link, hint.kind.as_str()))
                        .collect::<Vec<_>>()
                        .join(","),
                }],
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries())
    }

    /// Writes the manifest into `destination`, returning the file path
    pub async fn write(&self, destination: &Path) -> Result<PathBuf, SnapError> {
        let path = destination.join(MANIFEST_FILE);
        tokio::fs::create_dir_all(destination).await?;
        tokio::fs::write(&path, self.to_json()?).await?;
        tracing::info!("Wrote push manifest to {}", path.display());
        Ok(path)
    }
}
