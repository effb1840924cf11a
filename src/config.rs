//! Configuration file parser for `~/.config/podsync/config.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

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
}

// ============================================================================
// Log Level
// ============================================================================

/// Minimum severity written to the log.
///
/// Unrecognized names fall back to `info` with a warning rather than failing
/// the whole config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            other => {
                // The subscriber is not installed yet when config loads
                eprintln!("Unknown log_level in config ({other}), falling back to info");
                LogLevel::Info
            }
        })
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of episodes downloaded at the same time.
    pub max_downloads: usize,

    /// Root directory for downloads; one subdirectory per subscription.
    pub download_dir: PathBuf,

    /// Path of the SQLite catalog.
    pub database_file: PathBuf,

    /// Whether log lines carry a timestamp.
    pub log_time: bool,

    /// Minimum log severity. `RUST_LOG` overrides it when set.
    pub log_level: LogLevel,

    /// Maximum number of feeds fetched at the same time.
    pub fetch_concurrency: usize,

    /// Upper bound for a single feed fetch, in seconds.
    pub fetch_timeout_secs: u64,

    /// Upper bound for a single episode download, in seconds.
    pub download_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_downloads: 10,
            download_dir: PathBuf::from("./downloads"),
            database_file: PathBuf::from("./podcasts.db"),
            log_time: true,
            log_level: LogLevel::Info,
            fetch_concurrency: 8,
            fetch_timeout_secs: 30,
            download_timeout_secs: 3600,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "max_downloads",
        "download_dir",
        "database_file",
        "log_time",
        "log_level",
        "fetch_concurrency",
        "fetch_timeout_secs",
        "download_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, reported by [`Config::unknown_keys`]
    ///
    /// Zero concurrency limits and zero timeouts are raised to 1.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            // Race condition: file deleted between metadata and read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Config = toml::from_str(&content)?;
        config.max_downloads = config.max_downloads.max(1);
        config.fetch_concurrency = config.fetch_concurrency.max(1);
        // A zero timeout would fail every request before it is sent
        config.fetch_timeout_secs = config.fetch_timeout_secs.max(1);
        config.download_timeout_secs = config.download_timeout_secs.max(1);
        Ok(config)
    }

    /// Keys present in the file that this version does not recognize.
    ///
    /// Config loads before logging is configured, so the caller reports these
    /// once the subscriber is installed.
    pub fn unknown_keys(path: &Path) -> Vec<String> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        let Ok(raw) = content.parse::<toml::Table>() else {
            return Vec::new();
        };
        raw.keys()
            .filter(|key| !Self::KNOWN_KEYS.contains(&key.as_str()))
            .cloned()
            .collect()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
