use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Artifact extensions that must not be part of `file-name`
const ARTIFACT_EXTENSIONS: &[&str] = &[".html", ".jpg", ".jpeg", ".png"];

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded, normalized and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_snap::config::load_config;
///
/// let config = load_config(Path::new("snap.toml")).unwrap();
/// println!("Concurrency: {}", config.crawler.concurrency);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses, normalizes and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    normalize(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Applies the defaulting rules that depend on other fields
///
/// - `base-path` loses any trailing slash
/// - `public-path` gets a leading slash and loses its trailing slash
/// - every `include` entry is prefixed with `public-path`
/// - `file-name` loses an artifact extension
/// - empty optional strings become `None`
pub fn normalize(config: &mut Config) {
    let base_path = config.server.base_path.trim_end_matches('/').to_string();
    config.server.base_path = base_path;

    let mut public_path = config.server.public_path.clone();
    if !public_path.starts_with('/') {
        public_path.insert(0, '/');
    }
    let public_path = public_path.trim_end_matches('/').to_string();

    config.crawler.include = config
        .crawler
        .include
        .iter()
        .map(|include| format!("{}{}", public_path, include))
        .collect();
    config.server.public_path = public_path;

    for ext in ARTIFACT_EXTENSIONS {
        if let Some(stripped) = config.output.file_name.strip_suffix(ext) {
            tracing::warn!(
                "file-name should be a base name, the appropriate extension will be added"
            );
            config.output.file_name = stripped.to_string();
            break;
        }
    }

    empty_to_none(&mut config.crawler.destination);
    empty_to_none(&mut config.crawler.wait_for_response_url);
    empty_to_none(&mut config.crawler.executable_path);
    empty_to_none(&mut config.output.report_path);
}

fn empty_to_none(value: &mut Option<String>) {
    if value.as_deref().map(str::is_empty).unwrap_or(false) {
        *value = None;
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so snapshot runs can be matched to the configuration
/// that produced them.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkStrategy, Isolation, SaveAs};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[server]
base-path = "http://localhost"
port = 45678
public-path = "/"

[crawler]
driver = "http"
source = "dist"
concurrency = 2
isolation = "shared"
include = ["/", "/about"]
exclude = ["^/admin"]

[finalize]
inline-css = true
chunk-strategy = "parcel"

[output]
save-as = ["html", "png"]
http2-push-manifest = true
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.concurrency, 2);
        assert_eq!(config.crawler.isolation, Isolation::Shared);
        assert_eq!(config.crawler.include, vec!["/", "/about"]);
        assert_eq!(config.destination(), "dist");
        assert!(config.finalize.inline_css);
        assert_eq!(config.finalize.chunk_strategy, ChunkStrategy::Parcel);
        assert_eq!(config.output.save_as, vec![SaveAs::Html, SaveAs::Png]);
        assert_eq!(config.base_url(), "http://localhost:45678");
    }

    #[test]
    fn test_defaults_apply_to_empty_sections() {
        let config = parse_config("[crawler]\ndriver = \"http\"\n").unwrap();
        assert_eq!(config.crawler.concurrency, 4);
        assert_eq!(config.crawler.include, vec!["/"]);
        assert_eq!(config.output.file_name, "index");
        assert!(config.finalize.remove_blobs);
        assert_eq!(config.finalize.warn_on_inline_css_kb, 20);
    }

    #[test]
    fn test_public_path_prefixes_includes() {
        let config = parse_config(
            r#"
[server]
public-path = "app/"

[crawler]
driver = "http"
include = ["/", "/a"]
"#,
        )
        .unwrap();

        assert_eq!(config.server.public_path, "/app");
        assert_eq!(config.crawler.include, vec!["/app/", "/app/a"]);
    }

    #[test]
    fn test_file_name_extension_stripped() {
        let config = parse_config(
            r#"
[crawler]
driver = "http"

[output]
file-name = "page.html"
"#,
        )
        .unwrap();
        assert_eq!(config.output.file_name, "page");
    }

    #[test]
    fn test_unsupported_save_as_rejected() {
        let result = parse_config(
            r#"
[output]
save-as = ["json"]
"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_jpg_alias() {
        let config = parse_config(
            r#"
[crawler]
driver = "http"

[output]
save-as = ["jpg"]
"#,
        )
        .unwrap();
        assert_eq!(config.output.save_as, vec![SaveAs::Jpeg]);
    }

    #[test]
    fn test_empty_include_rejected() {
        let result = parse_config(
            r#"
[crawler]
driver = "http"
include = []
"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/snap.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }
}
