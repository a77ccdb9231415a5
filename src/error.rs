use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the downloader
#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("Registry unreachable: {0}\n\nTroubleshooting:\n- Check internet connection and proxy settings\n- Verify registry_base_url in config\n- Try increasing library.timeout in config")]
    RegistryUnreachable(String),

    #[error("Manifest not found for {model} (HTTP {status})\n\nTroubleshooting:\n- Check the model name and tag, e.g. llama3.1:8b\n- List available tags: ollama-downloader list-tags <model>")]
    ManifestNotFound { model: String, status: u16 },

    #[error("Malformed manifest for {model}: {reason}")]
    ManifestMalformed { model: String, reason: String },

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    #[error("Blob store not initialized: {}\n\nTroubleshooting:\n- Is Ollama installed? The blobs directory is created by the runtime\n- Check library.models_path in config", .0.display())]
    StoreNotInitialized(PathBuf),

    #[error("Failed to persist {}: {reason}", path.display())]
    PersistenceFailed { path: PathBuf, reason: String },

    #[error("Model {0} not found in the Ollama inventory after download\n\nTroubleshooting:\n- Is the Ollama server running? Check server.url in config\n- Does the server read the same models path?")]
    NotFound(String),

    #[error("Ollama inventory unavailable: {0}\n\nTroubleshooting:\n- Is the Ollama server running? Start with: ollama serve\n- Check server.url in config")]
    InventoryUnavailable(String),

    #[error("Invalid model identifier '{0}'. Expected <model>[:<tag>] or <owner>/<repo>:<quant>")]
    InvalidIdentifier(String),

    #[error("Invalid digest '{0}'")]
    InvalidDigest(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/ollama-downloader/config.toml\n- Show the effective config: ollama-downloader show-config\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DownloaderError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::PersistenceFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloaderError>;
