#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod download;
pub mod error;
pub mod inventory;
pub mod models;
pub mod registry;
pub mod store;

pub use error::{DownloaderError, Result};
