#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use ollama_downloader::config::Settings;
use ollama_downloader::download::{format_bytes, DownloadOutcome, ModelDownloader};
use ollama_downloader::error::{DownloaderError, Result};
use ollama_downloader::models::ModelIdentifier;
use ollama_downloader::registry::{HubCatalog, LibraryCatalog};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ollama-downloader")]
#[command(version, about = "Download models into an Ollama model store", long_about = None)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/ollama-downloader/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    ShowConfig,
    /// List models in the Ollama library
    ListModels {
        /// Page to show (1-based)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page: Option<u32>,
        /// Models per page
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
        page_size: Option<u32>,
    },
    /// List tags of one library model, or of every model
    ListTags {
        model: Option<String>,
        /// Refresh the tags cache
        #[arg(long)]
        update: bool,
    },
    /// Download a library model, e.g. llama3.1:8b
    ModelDownload { model_tag: String },
    /// List Hugging Face models usable by Ollama
    HfListModels {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page: Option<u32>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
        page_size: Option<u32>,
    },
    /// List quantisations of a Hugging Face repository, e.g. bartowski/Llama-3.2-1B-Instruct-GGUF
    HfListTags { repo_id: String },
    /// Download a Hugging Face model, e.g. bartowski/Llama-3.2-1B-Instruct-GGUF:Q4_K_M
    HfModelDownload { user_repo_quant: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    // Dropping an in-flight download on interrupt rolls back its pending work
    let result = tokio::select! {
        result = run(cli.command, &settings, &cancel) => result,
        () = cancel.cancelled() => Err(DownloaderError::Cancelled),
    };

    // Failures are reported here; only config errors change the exit status
    if let Err(e) = result {
        match e {
            DownloaderError::Cancelled => tracing::warn!("Interrupted; anything partially downloaded was removed"),
            e => tracing::error!("{e}"),
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {e}");
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        tracing::warn!("Interrupt signal received, performing clean shutdown");
        cancel.cancel();
    });
}

async fn run(command: Commands, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
    match command {
        Commands::ShowConfig => {
            let json = serde_json::to_string_pretty(settings)
                .map_err(|e| DownloaderError::Other(format!("Failed to render config: {e}")))?;
            println!("{json}");
        }
        Commands::ListModels { page, page_size } => {
            let mut catalog = LibraryCatalog::new(settings)?;
            let models = catalog.list_models().await?;
            print_page("Model identifiers", &models, page, page_size);
        }
        Commands::ListTags { model, update } => {
            let mut catalog = LibraryCatalog::new(settings)?;
            match model {
                Some(model) => {
                    let tags = catalog.list_tags(&model, update).await?;
                    println!("Model tags: ({}): {tags:?}", tags.len());
                }
                None => {
                    let all = catalog.list_all_tags(update).await?;
                    for (model, tags) in &all {
                        println!("{model}: {tags:?}");
                    }
                    println!(
                        "Tags cache for {} models: {}",
                        all.len(),
                        catalog.cache_path().display()
                    );
                }
            }
        }
        Commands::ModelDownload { model_tag } => {
            let id: ModelIdentifier = model_tag.parse()?;
            if id.is_hub() {
                return Err(DownloaderError::InvalidIdentifier(format!(
                    "{model_tag} (use hf-model-download for Hugging Face models)"
                )));
            }
            download(settings, &id, cancel).await?;
        }
        Commands::HfListModels { page, page_size } => {
            let catalog = HubCatalog::new(settings)?;
            let models = catalog.list_models().await?;
            print_page("Model identifiers", &models, page, page_size);
        }
        Commands::HfListTags { repo_id } => {
            let catalog = HubCatalog::new(settings)?;
            let tags = catalog.list_tags(&repo_id).await?;
            println!("Model tags: ({}): {tags:?}", tags.len());
        }
        Commands::HfModelDownload { user_repo_quant } => {
            let id: ModelIdentifier = user_repo_quant.parse()?;
            if !id.is_hub() {
                return Err(DownloaderError::InvalidIdentifier(user_repo_quant));
            }
            download(settings, &id, cancel).await?;
        }
    }
    Ok(())
}

async fn download(settings: &Settings, id: &ModelIdentifier, cancel: &CancellationToken) -> Result<()> {
    let downloader = ModelDownloader::from_settings(settings)?;
    let outcome: DownloadOutcome = downloader.download(id, cancel).await?;
    println!(
        "Model {} successfully downloaded ({}) and saved on {}",
        outcome.entry.reference(),
        format_bytes(outcome.bytes_downloaded),
        outcome.entry.modified_at.format("%B %d %Y at %H:%M:%S")
    );
    Ok(())
}

fn print_page(label: &str, items: &[String], page: Option<u32>, page_size: Option<u32>) {
    if let (Some(page), Some(size)) = (page, page_size) {
        if let Some(slice) = page_slice(items, page, size) {
            println!("{label}: ({}, page {page}): {slice:?}", slice.len());
            return;
        }
        tracing::warn!(
            "No models found for page {page} with page size {size}. Showing all models instead."
        );
    }
    println!("{label}: ({}): {items:?}", items.len());
}

/// Items on a 1-based page, `None` past the end
fn page_slice(items: &[String], page: u32, size: u32) -> Option<&[String]> {
    let size = size as usize;
    let start = (page as usize).saturating_sub(1).saturating_mul(size);
    if start >= items.len() {
        return None;
    }
    let end = start.saturating_add(size).min(items.len());
    Some(&items[start..end])
}
