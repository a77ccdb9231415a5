pub mod fetcher;
pub mod pipeline;
pub mod progress;

pub use fetcher::{BlobFetcher, FetchedBlob};
pub use pipeline::{DownloadOutcome, ModelDownloader};
pub use progress::{format_bytes, Progress};
