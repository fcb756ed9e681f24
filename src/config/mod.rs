//! Configuration management for bookwatch.
//!
//! Configuration is read from `~/.config/bookwatch/config.toml` (or the path
//! given with `--config`). If the file doesn't exist, a default configuration
//! with comments is created.

use serde::{Deserialize, Deserializer};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file (default: data dir `bookwatch/bookwatch.db`)
    pub database_path: Option<PathBuf>,
    pub service: ServiceConfig,
    pub scanner: ScannerConfig,
    pub downloader: DownloaderConfig,
    pub notify: NotifyConfig,
}

/// Remote content service endpoints and request settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Episode metadata endpoint, queried with `book_id` and `episode_id`
    pub metadata_url: String,
    /// Prefix of every media URL
    pub image_base_url: String,
    /// Custom header sent with every request
    pub header_name: Option<String>,
    pub header_value: Option<String>,
    /// Referer sent with media requests
    pub referer: Option<String>,
    /// Metadata and status request timeout in seconds (default: 20)
    pub timeout_secs: u64,
    /// Page transfer timeout in seconds (default: 120)
    pub page_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            metadata_url: String::new(),
            image_base_url: String::new(),
            header_name: None,
            header_value: None,
            referer: None,
            timeout_secs: 20,
            page_timeout_secs: 120,
            user_agent: concat!("bookwatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

/// Polling budgets and pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Attempts before a new-episode watch gives up (default: 100000)
    pub max_attempts: u32,
    /// Wait between new-episode probes, e.g. "10m" (default: 10m)
    #[serde(deserialize_with = "deserialize_interval")]
    pub poll_interval: Duration,
    /// Attempts while walking a backlog (default: 999)
    pub catch_up_max_attempts: u32,
    /// Wait between backlog probes in milliseconds (default: 500)
    pub catch_up_interval_ms: u64,
    /// Wait after an unexpected response in seconds (default: 10)
    pub error_backoff_secs: u64,
    /// Wait between full resolution checks in seconds (default: 60)
    pub full_version_retry_secs: u64,
    /// Log every miss at info level (default: true)
    pub log_misses: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 100_000,
            poll_interval: Duration::from_secs(600),
            catch_up_max_attempts: 999,
            catch_up_interval_ms: 500,
            error_backoff_secs: 10,
            full_version_retry_secs: 60,
            log_misses: true,
        }
    }
}

impl ScannerConfig {
    pub fn catch_up_interval(&self) -> Duration {
        Duration::from_millis(self.catch_up_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn full_version_retry(&self) -> Duration {
        Duration::from_secs(self.full_version_retry_secs)
    }
}

/// Page download settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Root directory; each episode gets its own subdirectory
    pub download_dir: PathBuf,
    /// Maximum pages in flight (default: 10)
    pub concurrency: usize,
    /// Safety ceiling on pages per episode (default: 1200)
    pub max_pages: u32,
    /// Consecutive failures before giving up when no page succeeded (default: 500)
    pub cold_error_threshold: u32,
    /// Consecutive failures that mark the end of an episode (default: 5)
    pub warm_error_threshold: u32,
    /// Wait before retrying failed pages in seconds (default: 10)
    pub retry_backoff_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: default_data_dir().join("downloads"),
            concurrency: crate::downloader::DEFAULT_CONCURRENCY,
            max_pages: 1200,
            cold_error_threshold: 500,
            warm_error_threshold: 5,
            retry_backoff_secs: 10,
        }
    }
}

impl DownloaderConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

/// Outbound notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Chat incoming-webhook URL; notifications are only logged when unset
    pub webhook_url: Option<String>,
    /// Webhook request timeout in seconds (default: 10)
    pub webhook_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}

impl NotifyConfig {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

impl Config {
    /// Load configuration from `path`, or from the default path.
    ///
    /// If the default config file doesn't exist, creates one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(ConfigError::Io {
                    path: config_path,
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/bookwatch/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("bookwatch").join("config.toml"))
    }

    /// Database file, defaulting to the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("bookwatch.db"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# bookwatch configuration
#
# Intervals accept "30s", "10m", "1h", "1d" or a number of seconds.

# database_path = "/var/lib/bookwatch/bookwatch.db"

[service]
# Episode metadata endpoint (queried with ?book_id=...&episode_id=...)
metadata_url = ""
# Prefix of every page image URL
image_base_url = ""
# Custom header the service expects on every request
# header_name = ""
# header_value = ""
# referer = ""
timeout_secs = 20
page_timeout_secs = 120

[scanner]
max_attempts = 100000
poll_interval = "10m"
catch_up_max_attempts = 999
catch_up_interval_ms = 500
error_backoff_secs = 10
full_version_retry_secs = 60
log_misses = true

[downloader]
# download_dir = "/srv/books"
concurrency = 10
max_pages = 1200
cold_error_threshold = 500
warm_error_threshold = 5
retry_backoff_secs = 10

[notify]
# webhook_url = "https://chat.example.com/api/webhooks/..."
webhook_timeout_secs = 10
"##
        .to_string()
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bookwatch")
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_interval(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse interval string like "1h", "30m", "45s", "1d"
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let secs = if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .map(|h| h * 3600)
            .map_err(|_| format!("Invalid hours: {}", hours))?
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes
            .parse::<u64>()
            .map(|m| m * 60)
            .map_err(|_| format!("Invalid minutes: {}", minutes))?
    } else if let Some(days) = s.strip_suffix('d') {
        days.parse::<u64>()
            .map(|d| d * 86400)
            .map_err(|_| format!("Invalid days: {}", days))?
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>()
            .map_err(|_| format!("Invalid seconds: {}", secs))?
    } else {
        s.parse::<u64>()
            .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))?
    };

    Ok(Duration::from_secs(secs))
}

/// Format interval for display
pub fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs == 0 {
        format!("{}ms", interval.as_millis())
    } else if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
