//! Configuration file parser for `press-ingest.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! `PRESS_INGEST_DB` overrides `database_path` when set; the environment takes
//! precedence over the file.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::sync::{RetryPolicy, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};

/// Environment variable that overrides `database_path`.
pub const DATABASE_ENV: &str = "PRESS_INGEST_DB";

/// Categories recognized by default. Tags outside this list are discarded
/// before they reach the store.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "要闻",
    "路德时评",
    "中国",
    "美国",
    "国际",
    "台湾",
    "香港",
    "经济",
    "军事",
    "科技",
    "社会",
    "评论",
    "视频",
];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value that would make a run meaningless or unsafe (zero batch size,
    /// non-http feed URL, ...). Always raised before any I/O.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level ingestion configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `:memory:` is accepted for dry runs.
    pub database_path: String,

    /// RSS feed of the site. Older pages are requested as `?paged=N`.
    pub feed_url: String,

    /// Sitemap (or sitemap index) listing every article URL.
    pub sitemap_url: String,

    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retries after the first attempt, for both HTTP requests and
    /// existence-check batches.
    pub retry_times: u32,

    /// First backoff delay in milliseconds; doubles on each retry.
    pub retry_base_delay_ms: u64,

    /// Minimum pause between consecutive page fetches, in milliseconds.
    pub request_delay_ms: u64,

    /// Maximum number of links per existence-check query.
    pub batch_size: usize,

    /// Highest `?paged=N` feed page to request.
    pub max_feed_pages: u32,

    /// Cap on backfill fetches per run (0 = unlimited).
    pub max_backfill: usize,

    /// Category allow-list.
    pub allowed_categories: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "press.db".to_string(),
            feed_url: "https://ludepress.com/feed/".to_string(),
            sitemap_url: "https://ludepress.com/sitemap.xml".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            request_timeout_secs: 30,
            retry_times: 3,
            retry_base_delay_ms: 2000,
            request_delay_ms: 1000,
            batch_size: DEFAULT_BATCH_SIZE,
            max_feed_pages: 50,
            max_backfill: 0,
            allowed_categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 12] = [
        "database_path",
        "feed_url",
        "sitemap_url",
        "user_agent",
        "request_timeout_secs",
        "retry_times",
        "retry_base_delay_ms",
        "request_delay_ms",
        "batch_size",
        "max_feed_pages",
        "max_backfill",
        "allowed_categories",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    ///
    /// The result is not validated; call [`Config::validate`] once overrides
    /// have been applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feed = %config.feed_url,
            sitemap = %config.sitemap_url,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply environment overrides (currently only [`DATABASE_ENV`]).
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(DATABASE_ENV) {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }
    }

    /// Reject settings that cannot produce a correct run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than 0".into()));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be at most {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        for (key, value) in [("feed_url", &self.feed_url), ("sitemap_url", &self.sitemap_url)] {
            match url::Url::parse(value) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "{key} must be an http(s) URL, got {value:?}"
                    )))
                }
            }
        }
        if self.allowed_categories.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "allowed_categories must name at least one category".into(),
            ));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid("database_path must not be empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_times, Duration::from_millis(self.retry_base_delay_ms))
    }

    /// `max_backfill` with 0 mapped to "no limit".
    pub fn backfill_limit(&self) -> Option<usize> {
        (self.max_backfill > 0).then_some(self.max_backfill)
    }
}

// ============================================================================
// Tests
// ============================================================================
