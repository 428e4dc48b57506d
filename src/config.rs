//! Configuration file parser for ~/.config/swipefeed/config.toml.
//!
//! The config file is optional. A missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cache::policy::{
    RouteTable, DEFAULT_FONT_FILE_ORIGIN, DEFAULT_FONT_STYLESHEET_ORIGIN,
    DEFAULT_REMOTE_IMAGE_ORIGIN,
};
use crate::cache::router::{DEFAULT_FALLBACK_IMAGE, DEFAULT_OFFLINE_PAGE};
use crate::cache::store::DEFAULT_QUOTA_BYTES;
use crate::feed::{FeedSettings, HasMoreStrategy};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub source: SourceConfig,
    pub cache: CacheConfig,
}

/// `[feed]`: page sizes and pagination behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Size of the first page.
    pub initial_page_size: u32,
    /// Size of every later page.
    pub page_size: u32,
    /// Load more when the active item is this close to the end.
    pub load_more_threshold: usize,
    /// Wall-clock bound on one page fetch, in seconds.
    pub fetch_timeout_secs: u64,
    /// `"lookahead"` (one-record read after each page) or `"overfetch"` (fetch n+1).
    pub has_more: HasMoreStrategy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        let settings = FeedSettings::default();
        Self {
            initial_page_size: settings.initial_page_size,
            page_size: settings.page_size,
            load_more_threshold: settings.load_more_threshold,
            fetch_timeout_secs: 10,
            has_more: HasMoreStrategy::default(),
        }
    }
}

impl FeedConfig {
    /// Controller settings. Page sizes below 1 are raised to 1.
    pub fn settings(&self) -> FeedSettings {
        FeedSettings {
            initial_page_size: self.initial_page_size.max(1),
            page_size: self.page_size.max(1),
            load_more_threshold: self.load_more_threshold,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

/// `[source]`: where articles come from.
///
/// Without a `base_url` the local SQLite article store is used.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Document-store REST endpoint.
    pub base_url: Option<String>,
    /// Bearer token for the endpoint.
    pub api_key: Option<String>,
}

/// Mask api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// `[cache]`: origins, quota and offline fallbacks for the cache router.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub app_origin: String,
    pub remote_image_origin: String,
    pub font_stylesheet_origin: String,
    pub font_file_origin: String,
    /// Total storage budget across every named cache, in bytes.
    pub quota_bytes: u64,
    pub offline_page: String,
    pub fallback_image: String,
    /// JSON asset manifest to precache at install time.
    pub precache_manifest: Option<PathBuf>,
    pub network_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_origin: "http://localhost:3001".to_string(),
            remote_image_origin: DEFAULT_REMOTE_IMAGE_ORIGIN.to_string(),
            font_stylesheet_origin: DEFAULT_FONT_STYLESHEET_ORIGIN.to_string(),
            font_file_origin: DEFAULT_FONT_FILE_ORIGIN.to_string(),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
            fallback_image: DEFAULT_FALLBACK_IMAGE.to_string(),
            precache_manifest: None,
            network_timeout_secs: 10,
        }
    }
}

impl CacheConfig {
    pub fn app_origin_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.app_origin)
    }

    pub fn route_table(&self) -> Result<RouteTable, url::ParseError> {
        Ok(RouteTable::new(
            &self.app_origin_url()?,
            &Url::parse(&self.remote_image_origin)?,
            &Url::parse(&self.font_stylesheet_origin)?,
            &Url::parse(&self.font_file_origin)?,
        ))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs.max(1))
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_SECTIONS: [&'static str; 3] = ["feed", "source", "cache"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        Self::warn_unknown_keys(&content);

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            remote_source = config.source.base_url.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn warn_unknown_keys(content: &str) {
        let Ok(raw) = content.parse::<toml::Table>() else {
            return;
        };
        for (key, value) in &raw {
            if !Self::KNOWN_SECTIONS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                continue;
            }
            let known: &[&str] = match key.as_str() {
                "feed" => &[
                    "initial_page_size",
                    "page_size",
                    "load_more_threshold",
                    "fetch_timeout_secs",
                    "has_more",
                ],
                "source" => &["base_url", "api_key"],
                _ => &[
                    "app_origin",
                    "remote_image_origin",
                    "font_stylesheet_origin",
                    "font_file_origin",
                    "quota_bytes",
                    "offline_page",
                    "fallback_image",
                    "precache_manifest",
                    "network_timeout_secs",
                ],
            };
            if let Some(table) = value.as_table() {
                for inner in table.keys() {
                    if !known.contains(&inner.as_str()) {
                        tracing::warn!(key = %format!("{key}.{inner}"), "Unknown key in config file, ignoring");
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("swipefeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed.initial_page_size, 12);
        assert_eq!(config.feed.page_size, 8);
        assert_eq!(config.feed.load_more_threshold, 3);
        assert_eq!(config.feed.has_more, HasMoreStrategy::Lookahead);
        assert!(config.source.base_url.is_none());
        assert_eq!(config.cache.quota_bytes, 50 * 1024 * 1024);
        assert_eq!(config.cache.offline_page, "/offline.html");
        assert!(config.cache.route_table().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/swipefeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.feed.page_size, 8);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed.initial_page_size, 12);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config(
            "partial",
            "[feed]\npage_size = 5\nhas_more = \"overfetch\"\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed.page_size, 5);
        assert_eq!(config.feed.initial_page_size, 12);
        assert_eq!(config.feed.has_more, HasMoreStrategy::Overfetch);
        assert_eq!(config.cache, CacheConfig::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
[feed]
initial_page_size = 20
page_size = 10
load_more_threshold = 5
fetch_timeout_secs = 3

[source]
base_url = "https://store.example.com/v1"
api_key = "test-key-123"

[cache]
app_origin = "https://news.example.com"
quota_bytes = 1000
precache_manifest = "/srv/app/manifest.json"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.feed.settings(),
            FeedSettings {
                initial_page_size: 20,
                page_size: 10,
                load_more_threshold: 5,
            }
        );
        assert_eq!(config.feed.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(
            config.source.base_url.as_deref(),
            Some("https://store.example.com/v1")
        );
        assert_eq!(config.cache.quota_bytes, 1000);
        assert_eq!(
            config.cache.precache_manifest.as_deref(),
            Some(Path::new("/srv/app/manifest.json"))
        );
        assert_eq!(
            config.cache.app_origin_url().unwrap().as_str(),
            "https://news.example.com/"
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_page_sizes_raised() {
        let feed = FeedConfig {
            initial_page_size: 0,
            page_size: 0,
            ..FeedConfig::default()
        };
        let settings = feed.settings();
        assert_eq!(settings.initial_page_size, 1);
        assert_eq!(settings.page_size, 1);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
totally_fake_key = "should not fail"

[feed]
page_size = 4
another_unknown = 42
"#;
        let (dir, path) = write_config("unknown", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed.page_size, 4);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "[feed]\npage_size = \"eight\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bad_strategy_returns_error() {
        let (dir, path) = write_config("badstrategy", "[feed]\nhas_more = \"guess\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_api_key() {
        let mut config = Config::default();
        config.source.api_key = Some("super-secret-key-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
