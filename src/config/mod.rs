//! Configuration and directory layout.
//!
//! Everything lives below one base directory (default `<data dir>/ticker`).
//! Settings are read from `<basedir>/config.toml`; a commented default file
//! is written there on first start. Missing fields use default values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::prefetch::PrefetchSettings;

pub const APP_NAME: &str = "ticker";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub interval_secs: u64,
    pub max_image_size: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        let defaults = PrefetchSettings::default();
        Self {
            workers: defaults.workers,
            batch_size: defaults.batch_size,
            interval_secs: defaults.interval.as_secs(),
            max_image_size: defaults.max_image_size,
        }
    }
}

impl PrefetchConfig {
    pub fn settings(&self) -> PrefetchSettings {
        PrefetchSettings {
            workers: self.workers,
            batch_size: self.batch_size,
            interval: Duration::from_secs(self.interval_secs.max(1)),
            max_image_size: self.max_image_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub workers: usize,
    pub idle_ms: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            idle_ms: 2500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Set from the location the file was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
    pub app_name: String,
    pub pool_size: usize,
    pub poll_interval_secs: u64,
    pub languages: Vec<String>,
    pub default_language: String,
    /// Items whose title contains one of these do not get their language
    /// detection failures logged loudly.
    pub quiet_titles: Vec<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub prefetch: PrefetchConfig,
    pub archive: ArchiveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            app_name: APP_NAME.to_string(),
            pool_size: 4,
            poll_interval_secs: 5,
            languages: vec!["de".to_string(), "en".to_string()],
            default_language: "en".to_string(),
            quiet_titles: Vec::new(),
            user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
            http_timeout_secs: 30,
            prefetch: PrefetchConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration for `base_dir`, or for the default base
    /// directory if none is given. A leading `~` is expanded.
    pub fn load(base_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let base_dir = match base_dir {
            Some(dir) => expand_tilde(dir)?,
            None => Self::default_base_dir()?,
        };
        let config_path = base_dir.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
                path: config_path.clone(),
                source: e,
            })?;
            toml::from_str::<Config>(&content).map_err(|e| ConfigError::Parse {
                path: config_path,
                source: e,
            })?
        } else {
            Config::default()
        };
        config.base_dir = base_dir;
        Ok(config)
    }

    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Creates the directory layout and a default config file. Safe to call
    /// more than once.
    pub fn init(&self) -> Result<(), ConfigError> {
        for dir in [
            self.base_dir.clone(),
            self.cache_dir(),
            self.archive_dir(),
            self.classifier_dir(),
            self.advisor_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| ConfigError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }

        let config_path = self.config_path();
        if !config_path.exists() {
            fs::write(&config_path, Self::default_config_content()).map_err(|e| ConfigError::Io {
                path: config_path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.db", self.app_name))
    }

    pub fn log_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.log", self.app_name))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.base_dir.join("archive")
    }

    pub fn classifier_dir(&self) -> PathBuf {
        self.base_dir.join("classifier")
    }

    pub fn advisor_dir(&self) -> PathBuf {
        self.base_dir.join("advisor")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn archive_idle(&self) -> Duration {
        Duration::from_millis(self.archive.idle_ms.max(1))
    }

    fn default_config_content() -> String {
        r##"# ticker configuration
#
# All paths are relative to the directory this file lives in.

# Number of database connections shared by the background tasks
pool_size = 4

# How often to check for feeds that are due, in seconds
poll_interval_secs = 5

# Languages to tell apart when rating items and suggesting tags
languages = ["de", "en"]
default_language = "en"

# Items whose title contains any of these strings do not log language
# detection failures
quiet_titles = []

http_timeout_secs = 30

[prefetch]
workers = 4
# Items picked per round
batch_size = 25
interval_secs = 5
# Larger images are dropped from item bodies (bytes)
max_image_size = 524288

[archive]
workers = 2
idle_ms = 2500
"##
        .to_string()
    }
}

/// Replaces a leading `~` with the home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf, ConfigError> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(rest))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Failed to read/write {path}: {source}")]
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
