//! Content digests of the form `<algorithm>:<hex>`.
//!
//! Hashing is incremental so blobs can be verified while they stream in.

use crate::error::{DownloaderError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Chunk size for hashing files already on disk (8MB)
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Output size in bytes
    #[must_use]
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    #[must_use]
    pub fn hasher(self) -> DigestHasher {
        match self {
            Self::Sha256 => DigestHasher::Sha256(Sha256::new()),
            Self::Sha512 => DigestHasher::Sha512(Sha512::new()),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// A parsed, validated content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Pair a bare hex string with an algorithm, validating its length
    pub fn new(algorithm: DigestAlgorithm, encoded: &str) -> Result<Self> {
        let invalid =
            || DownloaderError::InvalidDigest(format!("{}:{encoded}", algorithm.name()));
        let bytes = hex::decode(encoded).map_err(|_| invalid())?;
        if bytes.len() != algorithm.output_len() {
            return Err(invalid());
        }
        Ok(Self {
            algorithm,
            hex: encoded.to_ascii_lowercase(),
        })
    }

    /// Digest of an in-memory payload
    #[must_use]
    pub fn of_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self {
            algorithm,
            hex: hasher.finalize_hex(),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// `<algorithm>-<hex>`, the blob file name and blob URL segment
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}", self.algorithm.name(), self.hex)
    }

    /// Shortened form for progress labels
    #[must_use]
    pub fn short(&self) -> String {
        let full = self.to_string();
        if full.len() <= 16 {
            return full;
        }
        format!("{}...{}", &full[..11], &full[full.len() - 4..])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.hex)
    }
}

impl FromStr for Digest {
    type Err = DownloaderError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, encoded) = s
            .split_once(':')
            .ok_or_else(|| DownloaderError::InvalidDigest(s.to_string()))?;
        let algorithm = DigestAlgorithm::from_name(name)
            .ok_or_else(|| DownloaderError::InvalidDigest(s.to_string()))?;
        Self::new(algorithm, encoded)
    }
}

impl TryFrom<String> for Digest {
    type Error = DownloaderError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// Incremental hash accumulator
pub enum DigestHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl DigestHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Lowercase hex of the final hash
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Check a computed hex hash against the digest a manifest declared.
///
/// The computed side carries no algorithm of its own; it is assumed to have
/// been produced by `expected.algorithm()`.
pub fn verify(computed_hex: &str, expected: &Digest) -> Result<()> {
    if computed_hex.eq_ignore_ascii_case(expected.hex()) {
        Ok(())
    } else {
        Err(DownloaderError::DigestMismatch {
            expected: expected.to_string(),
            computed: format!("{}:{}", expected.algorithm().name(), computed_hex),
        })
    }
}

/// Hash a file already on disk
pub fn hash_file(path: &Path, algorithm: DigestAlgorithm) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = algorithm.hasher();

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}
