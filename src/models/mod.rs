pub mod digest;
pub mod identifier;
pub mod manifest;

pub use digest::{Digest, DigestAlgorithm, DigestHasher};
pub use identifier::{ModelIdentifier, DEFAULT_TAG};
pub use manifest::{BlobDescriptor, Manifest};
