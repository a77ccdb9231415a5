use crate::error::{DownloaderError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Tag assumed when a library model is named without one
pub const DEFAULT_TAG: &str = "latest";

/// A model as named on the command line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelIdentifier {
    /// Ollama library model, `name[:tag]`
    Library { name: String, tag: String },
    /// Hugging Face GGUF repository, `owner/repo:quant`
    Hub {
        owner: String,
        repo: String,
        quant: String,
    },
}

impl ModelIdentifier {
    /// Library model with an explicit tag
    pub fn library(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::Library {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Hugging Face model with a quantisation
    pub fn hub(owner: impl Into<String>, repo: impl Into<String>, quant: impl Into<String>) -> Self {
        Self::Hub {
            owner: owner.into(),
            repo: repo.into(),
            quant: quant.into(),
        }
    }

    #[must_use]
    pub fn is_hub(&self) -> bool {
        matches!(self, Self::Hub { .. })
    }

    /// Repository path relative to the registry base URL
    #[must_use]
    pub fn repository(&self) -> String {
        match self {
            Self::Library { name, .. } => name.clone(),
            Self::Hub { owner, repo, .. } => format!("{owner}/{repo}"),
        }
    }

    /// Tag or quantisation
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Library { tag, .. } => tag,
            Self::Hub { quant, .. } => quant,
        }
    }

    /// Directory path below `manifests/<registry-host>/`
    #[must_use]
    pub fn namespace_path(&self) -> PathBuf {
        match self {
            Self::Library { name, .. } => PathBuf::from("library").join(name),
            Self::Hub { owner, repo, .. } => PathBuf::from(owner).join(repo),
        }
    }

    /// Name under which the runtime lists the model
    #[must_use]
    pub fn inventory_name(&self, hub_host: &str) -> String {
        match self {
            Self::Library { .. } => self.to_string(),
            Self::Hub { .. } => format!("{hub_host}/{self}"),
        }
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library { name, tag } => write!(f, "{name}:{tag}"),
            Self::Hub { owner, repo, quant } => write!(f, "{owner}/{repo}:{quant}"),
        }
    }
}

impl FromStr for ModelIdentifier {
    type Err = DownloaderError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DownloaderError::InvalidIdentifier(s.to_string());
        let input = s.trim();

        let (path, reference) = match input.split_once(':') {
            Some((path, reference)) => {
                if reference.contains(':') || !is_valid_segment(reference) {
                    return Err(invalid());
                }
                (path, Some(reference))
            }
            None => (input, None),
        };

        match path.split_once('/') {
            Some((owner, repo)) => {
                if repo.contains('/') || !is_valid_segment(owner) || !is_valid_segment(repo) {
                    return Err(invalid());
                }
                let quant = reference.ok_or_else(invalid)?;
                Ok(Self::hub(owner, repo, quant))
            }
            None => {
                if !is_valid_segment(path) {
                    return Err(invalid());
                }
                Ok(Self::library(path, reference.unwrap_or(DEFAULT_TAG)))
            }
        }
    }
}

/// Segments end up as path components, so reject traversal and separators
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment
            .chars()
            .any(|c| c.is_whitespace() || c == '\\' || c == '/' || c.is_control())
}
