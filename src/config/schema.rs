use crate::error::{DownloaderError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for configured timeouts and intervals (one day)
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

/// Connection to the Ollama runtime used for inventory checks
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Reserved; sent as a bearer token when set
    pub api_key: Option<String>,
    /// Roll back committed blobs and manifest when the runtime does not list the model
    #[serde(default)]
    pub remove_downloaded_on_error: bool,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
}

/// Ollama library registry, catalog and local store
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct LibraryConfig {
    #[serde(default = "default_models_path")]
    pub models_path: String,
    #[serde(default = "default_models_tags_cache")]
    pub models_tags_cache: String,
    #[serde(default = "default_registry_base_url")]
    pub registry_base_url: String,
    #[serde(default = "default_library_base_url")]
    pub library_base_url: String,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// `[user, group]` that should own everything written into the store
    pub user_group: Option<(String, String)>,
}

/// Hugging Face registry and API
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct HubConfig {
    #[serde(default = "default_hub_registry_base_url")]
    pub registry_base_url: String,
    #[serde(default = "default_hub_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DownloadConfig {
    /// Where in-flight blobs are staged; system temp dir when unset
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

// Default value functions
fn default_server_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_poll_attempts() -> u32 {
    3
}
fn default_poll_interval_secs() -> f64 {
    1.0
}
fn default_models_path() -> String {
    "~/.ollama/models".to_string()
}
fn default_models_tags_cache() -> String {
    "models_tags.json".to_string()
}
fn default_registry_base_url() -> String {
    "https://registry.ollama.ai/v2/library/".to_string()
}
fn default_library_base_url() -> String {
    "https://ollama.com/library/".to_string()
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> f64 {
    120.0
}
fn default_hub_registry_base_url() -> String {
    "https://hf.co/v2/".to_string()
}
fn default_hub_api_base_url() -> String {
    "https://huggingface.co/api/".to_string()
}
fn default_list_limit() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            api_key: None,
            remove_downloaded_on_error: false,
            poll_attempts: default_poll_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            models_path: default_models_path(),
            models_tags_cache: default_models_tags_cache(),
            registry_base_url: default_registry_base_url(),
            library_base_url: default_library_base_url(),
            verify_ssl: default_true(),
            timeout: default_timeout(),
            user_group: None,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            registry_base_url: default_hub_registry_base_url(),
            api_base_url: default_hub_api_base_url(),
            list_limit: default_list_limit(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            show_progress: default_true(),
        }
    }
}

impl Settings {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if !(self.library.timeout > 0.0 && self.library.timeout <= MAX_DURATION_SECS) {
            return Err(DownloaderError::Config(format!(
                "library.timeout must be between 0 and {MAX_DURATION_SECS} seconds, got {}",
                self.library.timeout
            )));
        }
        if !(self.server.poll_interval_secs >= 0.0
            && self.server.poll_interval_secs <= MAX_DURATION_SECS)
        {
            return Err(DownloaderError::Config(format!(
                "server.poll_interval_secs must be between 0 and {MAX_DURATION_SECS} seconds, got {}",
                self.server.poll_interval_secs
            )));
        }

        for (key, value) in [
            ("server.url", &self.server.url),
            ("library.registry_base_url", &self.library.registry_base_url),
            ("library.library_base_url", &self.library.library_base_url),
            ("hub.registry_base_url", &self.hub.registry_base_url),
            ("hub.api_base_url", &self.hub.api_base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| DownloaderError::Config(format!("{key} '{value}' is not a URL: {e}")))?;
        }

        if let Some((user, group)) = &self.library.user_group {
            if user.is_empty() || group.is_empty() {
                return Err(DownloaderError::Config(
                    "library.user_group needs both a user and a group".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Store root with a leading `~` expanded
    #[must_use]
    pub fn store_root(&self) -> PathBuf {
        expand_home(&self.library.models_path)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.library.timeout)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.server.poll_interval_secs)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
