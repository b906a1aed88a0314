//! tasklane configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (TASKLANE_WORKERS, TASKLANE_FRAME_MS)
//! 3. Config file (./tasklane.toml or --config)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use tasklane::util::config::FileConfig;
//!
//! let config: FileConfig = toml::from_str("[scheduler]\nnum_workers = 2").unwrap();
//! assert_eq!(config.scheduler.num_workers, Some(2));
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::scheduler::SchedulerConfig;
use crate::util::logger::LogLevel;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "tasklane.toml";

/// Environment variable overriding the worker count.
pub const ENV_WORKERS: &str = "TASKLANE_WORKERS";

/// Environment variable overriding the frame interval in milliseconds.
pub const ENV_FRAME_MS: &str = "TASKLANE_FRAME_MS";

/// On-disk configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Logging settings
    #[serde(default)]
    pub log: LogSection,
}

/// `[scheduler]` section; unset keys fall back to the defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerSection {
    /// Number of worker threads
    #[serde(default)]
    pub num_workers: Option<usize>,
    /// Idle park timeout in milliseconds
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    /// Host tick interval in milliseconds
    #[serde(default)]
    pub frame_interval_ms: Option<u64>,
}

/// `[log]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    /// Level name: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Settings resolved from every layer.
#[derive(Debug, Clone)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub log_level: LogLevel,
}

impl FileConfig {
    /// Apply this file on top of the defaults.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let mut scheduler = SchedulerConfig::default();
        if let Some(n) = self.scheduler.num_workers {
            scheduler.num_workers = n;
        }
        if let Some(ms) = self.scheduler.idle_timeout_ms {
            scheduler.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.scheduler.frame_interval_ms {
            scheduler.frame_interval = Duration::from_millis(ms);
        }
        let log_level = self
            .log
            .level
            .parse()
            .map_err(ConfigError::InvalidValue)?;

        let settings = Settings {
            scheduler,
            log_level,
        };
        validate(&settings)?;
        Ok(settings)
    }
}

/// Apply environment overrides read through `lookup`.
pub fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(ENV_WORKERS) {
        settings.scheduler.num_workers = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", ENV_WORKERS, raw)))?;
    }
    if let Some(raw) = lookup(ENV_FRAME_MS) {
        let ms: u64 = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", ENV_FRAME_MS, raw)))?;
        settings.scheduler.frame_interval = Duration::from_millis(ms);
    }
    validate(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.scheduler.num_workers == 0 {
        return Err(ConfigError::InvalidValue(
            "num_workers must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Read a config file.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Resolve settings from an explicit file, or `./tasklane.toml` if present,
/// then the process environment.
pub fn load_config(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let file = match explicit {
        Some(path) => load_file(path)?,
        None => {
            let default_path = PathBuf::from(CONFIG_FILE_NAME);
            if default_path.exists() {
                load_file(&default_path)?
            } else {
                FileConfig::default()
            }
        }
    };
    let mut settings = file.resolve()?;
    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
