//! Run configuration.
//!
//! Settings come from a flat `key=value` file (the historical
//! `analyzer.config`), then command-line flags override individual values.
//!
//! ```text
//! # empty = direct connection
//! web_proxy=https://proxy.example/?url=
//! strategy=http
//! headless=true
//! ```

use crate::error::{ElibError, Result};
use crate::fetch::{FetcherKind, DEFAULT_BASE_URL, DEFAULT_WAIT_BOUND};
use crate::identity::{DelayRange, DEFAULT_REQUEST_DELAY};
use crate::store::DEFAULT_DATABASE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "analyzer.config";

/// Everything a run needs to know
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Site root, overridable for mirrors
    pub base_url: String,
    /// Prefix prepended to profile URLs; `None` = direct connection
    pub web_proxy: Option<String>,
    /// Run Chrome without a window
    pub headless: bool,
    pub strategy: FetcherKind,
    pub database: PathBuf,
    /// Pause before each request
    pub request_delay: DelayRange,
    /// Bound on waiting for redirects / CAPTCHA pages to settle
    pub wait_timeout: Duration,
    /// Tesseract language data directory (exported as `TESSDATA_PREFIX`)
    pub tessdata: Option<PathBuf>,
    pub ocr_lang: String,
    /// Concurrent identifiers in a batch; 1 = strictly sequential
    pub workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            web_proxy: None,
            headless: true,
            strategy: FetcherKind::Http,
            database: PathBuf::from(DEFAULT_DATABASE),
            request_delay: DEFAULT_REQUEST_DELAY,
            wait_timeout: DEFAULT_WAIT_BOUND,
            tessdata: None,
            ocr_lang: "rus".to_string(),
            workers: 1,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ElibError::Config(format!("{}: expected true/false, got '{}'", key, value))),
    }
}

fn parse_url(key: &str, value: &str) -> Result<String> {
    Url::parse(value)
        .map_err(|e| ElibError::Config(format!("{}: invalid URL '{}': {}", key, value, e)))?;
    Ok(value.to_string())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ElibError::Config(format!("{}: expected a number, got '{}'", key, value)))
}

impl Settings {
    /// Parse the `key=value` format on top of the defaults
    pub fn parse(text: &str) -> Result<Self> {
        let mut settings = Self::default();
        let mut min_delay = settings.request_delay.min;
        let mut max_delay = settings.request_delay.max;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = lineno + 1, content = line, "Ignoring config line without '='");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "base_url" => settings.base_url = parse_url(key, value)?,
                "web_proxy" if value.is_empty() => settings.web_proxy = None,
                "web_proxy" => settings.web_proxy = Some(parse_url(key, value)?),
                "headless" => settings.headless = parse_bool(key, value)?,
                "strategy" => settings.strategy = value.parse()?,
                "database" => settings.database = PathBuf::from(value),
                "min_delay_ms" => min_delay = Duration::from_millis(parse_number(key, value)?),
                "max_delay_ms" => max_delay = Duration::from_millis(parse_number(key, value)?),
                "wait_timeout_secs" => {
                    settings.wait_timeout = Duration::from_secs(parse_number(key, value)?)
                }
                "tessdata" => {
                    settings.tessdata = (!value.is_empty()).then(|| PathBuf::from(value))
                }
                "ocr_lang" => settings.ocr_lang = value.to_string(),
                "workers" => settings.workers = parse_number::<usize>(key, value)?.max(1),
                _ => warn!(key, "Unknown config key"),
            }
        }

        settings.request_delay = DelayRange {
            min: min_delay,
            max: max_delay,
        };
        Ok(settings)
    }

    /// Read settings from `path`; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let settings = Self::parse(&text)?;
        info!(path = %path.display(), strategy = %settings.strategy, "Config loaded");
        Ok(settings)
    }
}
