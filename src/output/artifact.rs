//! Artifact paths and writing
//!
//! A route maps to a file under the destination directory:
//!
//! - `/about` → `{destination}/about/index.html`
//! - `/404.html` → `{destination}/404.html`
//! - `/404.html` as PNG → `{destination}/404.png`
//!
//! The public path is removed from the route first, so an app mounted under
//! `/app` still writes `/app/about` to `{destination}/about/index.html`.

use crate::config::{Config, SaveAs};
use crate::url::{strip_public_path, Route};
use crate::SnapError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    destination: PathBuf,
    public_path: String,
    file_name: String,
}

impl ArtifactPaths {
    pub fn new(destination: impl Into<PathBuf>, public_path: &str, file_name: &str) -> Self {
        Self {
            destination: destination.into(),
            public_path: public_path.to_string(),
            file_name: file_name.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.destination(),
            &config.server.public_path,
            &config.output.file_name,
        )
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Where the artifact of `format` for `route` is written
    pub fn path_for(&self, route: &Route, format: SaveAs) -> PathBuf {
        let route_path = strip_public_path(route.path(), &self.public_path);
        let mut path = self.destination.clone();

        if let Some(document) = route_path.strip_suffix(".html") {
            let document = format!("{}.{}", document, format.extension());
            path.extend(segments(&document));
        } else {
            path.extend(segments(route_path));
            path.push(format!("{}.{}", self.file_name, format.extension()));
        }
        path
    }

    /// Writes an artifact, creating parent directories as needed
    pub async fn write(
        &self,
        route: &Route,
        format: SaveAs,
        contents: impl AsRef<[u8]>,
    ) -> Result<PathBuf, SnapError> {
        let path = self.path_for(route, format);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        tracing::debug!("Wrote {}", path.display());
        Ok(path)
    }
}

// Empty, `.` and `..` segments never leave the destination directory
fn segments(route_path: &str) -> impl Iterator<Item = &str> {
    route_path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn route(path: &str) -> Route {
        Route::parse(&format!("http://localhost:45678{}", path)).unwrap()
    }

    #[test]
    fn test_directory_routes() {
        let paths = ArtifactPaths::new("/out", "", "index");

        assert_eq!(paths.path_for(&route("/"), SaveAs::Html), PathBuf::from("/out/index.html"));
        assert_eq!(
            paths.path_for(&route("/about"), SaveAs::Html),
            PathBuf::from("/out/about/index.html")
        );
        assert_eq!(
            paths.path_for(&route("/about/"), SaveAs::Png),
            PathBuf::from("/out/about/index.png")
        );
    }

    #[test]
    fn test_html_document_routes() {
        let paths = ArtifactPaths::new("/out", "", "index");

        assert_eq!(
            paths.path_for(&route("/404.html"), SaveAs::Html),
            PathBuf::from("/out/404.html")
        );
        assert_eq!(
            paths.path_for(&route("/docs/intro.html"), SaveAs::Jpeg),
            PathBuf::from("/out/docs/intro.jpeg")
        );
    }

    #[test]
    fn test_public_path_removed() {
        let paths = ArtifactPaths::new("/out", "/app", "page");

        assert_eq!(
            paths.path_for(&route("/app/about"), SaveAs::Html),
            PathBuf::from("/out/about/page.html")
        );
        assert_eq!(paths.path_for(&route("/app"), SaveAs::Html), PathBuf::from("/out/page.html"));
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(dir.path(), "", "index");

        let written = paths
            .write(&route("/blog/first-post"), SaveAs::Html, "<p>post</p>")
            .await
            .unwrap();

        assert_eq!(written, dir.path().join("blog/first-post/index.html"));
        assert_eq!(std::fs::read_to_string(written).unwrap(), "<p>post</p>");
    }
}
