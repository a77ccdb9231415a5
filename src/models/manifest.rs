use crate::error::{DownloaderError, Result};
use crate::models::digest::Digest;
use serde::{Deserialize, Serialize};

/// Image manifest as served by the registry.
///
/// Unknown fields are ignored so newer registry schemas still parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: BlobDescriptor,
    #[serde(default)]
    pub layers: Vec<BlobDescriptor>,
}

/// A content-addressed blob referenced by a manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobDescriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
}

impl Manifest {
    /// Parse raw manifest bytes; `model` only labels the error
    pub fn parse(raw: &[u8], model: &str) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| DownloaderError::ManifestMalformed {
            model: model.to_string(),
            reason: e.to_string(),
        })
    }

    /// Config blob first, then layers in manifest order
    pub fn blobs(&self) -> impl Iterator<Item = &BlobDescriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }

    /// Sum of declared blob sizes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.blobs().map(|b| b.size).sum()
    }
}
