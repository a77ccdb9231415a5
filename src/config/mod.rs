//! Configuration module for ollama-downloader
//!
//! Loads config from `--config`, `$OLLAMA_DOWNLOADER_CONFIG`, or
//! `$XDG_CONFIG_HOME/ollama-downloader/config.toml` (in that order).
//! Falls back to embedded defaults if the file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! Settings are loaded once and passed by reference into every component;
//! there is no process-wide instance.
//!
//! # Example
//!
//! ```no_run
//! use ollama_downloader::config::Settings;
//!
//! let settings = Settings::load(None).expect("Failed to load config");
//! println!("Store root: {}", settings.store_root().display());
//! ```

pub mod schema;

pub use schema::{DownloadConfig, HubConfig, LibraryConfig, ServerConfig, Settings};

use crate::error::{DownloaderError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "OLLAMA_DOWNLOADER_CONFIG";

impl Settings {
    /// Load settings from `explicit`, the environment, or the default location
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => Some(PathBuf::from(path)),
                None => default_config_path(),
            },
        };

        let settings = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) if explicit.is_some() => {
                return Err(DownloaderError::Config(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            _ => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DownloaderError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        tracing::debug!("Loaded config from {}", path.display());

        toml::from_str(&content).map_err(|e| {
            DownloaderError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }
}

/// Default config path under the XDG config directory
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ollama-downloader").join("config.toml"))
}
