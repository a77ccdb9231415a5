use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use futures_util::{stream, StreamExt};
use ollama_downloader::config::Settings;
use ollama_downloader::download::ModelDownloader;
use ollama_downloader::error::{DownloaderError, Result};
use ollama_downloader::inventory::{Inventory, InventoryEntry};
use ollama_downloader::models::{Digest, DigestAlgorithm, ModelIdentifier};
use ollama_downloader::registry::{BlobResponse, Registry};
use ollama_downloader::store::PendingWork;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A model as the fake registry serves it
#[derive(Clone)]
struct SampleModel {
    manifest: Vec<u8>,
    /// Config first, then layers
    blobs: Vec<(Digest, Vec<u8>)>,
}

fn sample_model() -> SampleModel {
    let contents: Vec<Vec<u8>> = vec![
        br#"{"model_format":"gguf","model_family":"gemma3","file_type":"Q4_K_M"}"#.to_vec(),
        b"GGUF weights ".repeat(4096),
        b"{{ .System }} {{ .Prompt }}".to_vec(),
        b"Gemma Terms of Use".to_vec(),
    ];
    let blobs: Vec<(Digest, Vec<u8>)> = contents
        .into_iter()
        .map(|data| (Digest::of_bytes(DigestAlgorithm::Sha256, &data), data))
        .collect();

    let descriptor = |(digest, data): &(Digest, Vec<u8>), media: &str| {
        serde_json::json!({
            "mediaType": media,
            "digest": digest.to_string(),
            "size": data.len(),
        })
    };
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": descriptor(&blobs[0], "application/vnd.docker.container.image.v1+json"),
        "layers": [
            descriptor(&blobs[1], "application/vnd.ollama.image.model"),
            descriptor(&blobs[2], "application/vnd.ollama.image.template"),
            descriptor(&blobs[3], "application/vnd.ollama.image.license"),
        ],
    });

    SampleModel {
        // Pretty-printed so a re-serialised manifest would not compare equal
        manifest: serde_json::to_vec_pretty(&manifest).unwrap(),
        blobs,
    }
}

#[derive(Default, Clone, Copy)]
struct Faults {
    /// Fail the request for the blob at this position
    fail_open: Option<usize>,
    /// Serve altered bytes for the blob at this position
    corrupt: Option<usize>,
    /// Cancel the run when the blob at this position is requested
    cancel_at: Option<usize>,
}

struct FakeRegistry {
    manifest: Option<Vec<u8>>,
    blobs: Vec<(Digest, Vec<u8>)>,
    faults: Faults,
    requests: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
}

impl FakeRegistry {
    fn new(model: &SampleModel, faults: Faults, cancel: &CancellationToken) -> Self {
        Self {
            manifest: Some(model.manifest.clone()),
            blobs: model.blobs.clone(),
            faults,
            requests: Arc::default(),
            cancel: cancel.clone(),
        }
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn fetch_manifest(&self, id: &ModelIdentifier) -> Result<Vec<u8>> {
        self.manifest
            .clone()
            .ok_or_else(|| DownloaderError::ManifestNotFound {
                model: id.to_string(),
                status: 404,
            })
    }

    async fn open_blob(&self, _id: &ModelIdentifier, digest: &Digest) -> Result<BlobResponse> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(digest.to_string());
            requests.len() - 1
        };
        let url = format!("fake://registry/blobs/{}", digest.file_name());

        if self.faults.cancel_at == Some(index) {
            self.cancel.cancel();
        }
        if self.faults.fail_open == Some(index) {
            return Err(DownloaderError::DownloadFailed {
                url,
                reason: "connection reset by peer".to_string(),
            });
        }

        let mut data = self
            .blobs
            .iter()
            .find(|(d, _)| d == digest)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| DownloaderError::DownloadFailed {
                url: url.clone(),
                reason: "HTTP 404".to_string(),
            })?;
        if self.faults.corrupt == Some(index) {
            data[0] ^= 0xff;
        }

        let chunks: Vec<Result<Bytes>> = data
            .chunks(1000)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(BlobResponse {
            url,
            content_length: Some(data.len() as u64),
            body: stream::iter(chunks).boxed(),
        })
    }
}

/// Runtime inventory that lists one model at a fixed distance from "now"
struct FakeInventory {
    listed: Option<(String, i64)>,
}

impl FakeInventory {
    fn listing(name: &str, offset_secs: i64) -> Self {
        Self {
            listed: Some((name.to_string(), offset_secs)),
        }
    }

    fn empty() -> Self {
        Self { listed: None }
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn list(&self) -> Result<Vec<InventoryEntry>> {
        let mut entries = vec![InventoryEntry::new("unrelated:latest", Utc::now())];
        if let Some((name, offset)) = &self.listed {
            entries.push(InventoryEntry::new(
                name.clone(),
                Utc::now() + TimeDelta::seconds(*offset),
            ));
        }
        Ok(entries)
    }
}

struct Harness {
    _temp: TempDir,
    root: PathBuf,
    staging: PathBuf,
    settings: Settings,
}

impl Harness {
    fn new() -> Self {
        let harness = Self::without_store();
        fs::create_dir_all(harness.root.join("blobs")).unwrap();
        harness
    }

    /// Store root whose `blobs/` directory was never created
    fn without_store() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("models");
        let staging = temp.path().join("staging");
        fs::create_dir_all(&staging).unwrap();

        let mut settings = Settings::default();
        settings.library.models_path = root.to_string_lossy().into_owned();
        settings.download.temp_dir = Some(staging.clone());
        settings.download.show_progress = false;
        settings.server.poll_attempts = 1;
        settings.server.poll_interval_secs = 0.0;

        Self {
            _temp: temp,
            root,
            staging,
            settings,
        }
    }

    fn downloader(
        &self,
        registry: FakeRegistry,
        inventory: FakeInventory,
    ) -> ModelDownloader<FakeRegistry, FakeInventory> {
        ModelDownloader::new(&self.settings, registry, inventory).unwrap()
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join(digest.file_name())
    }

    fn library_manifest(&self, name: &str, tag: &str) -> PathBuf {
        self.root
            .join("manifests/registry.ollama.ai/library")
            .join(name)
            .join(tag)
    }

    fn staging_is_empty(&self) -> bool {
        fs::read_dir(&self.staging).unwrap().count() == 0
    }

    fn committed_blobs(&self) -> usize {
        fs::read_dir(self.root.join("blobs")).unwrap().count()
    }
}

fn gemma() -> ModelIdentifier {
    ModelIdentifier::library("gemma3", "1b")
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[tokio::test]
async fn test_library_download_end_to_end() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();
    let pending = PendingWork::new();
    let downloader = harness.downloader(
        FakeRegistry::new(&model, Faults::default(), &cancel),
        FakeInventory::listing("gemma3:1b", 2),
    );

    let outcome = downloader
        .download_with(&gemma(), &pending, &cancel)
        .await
        .unwrap();

    for (digest, data) in &model.blobs {
        let path = harness.blob_path(digest);
        assert_eq!(&fs::read(&path).unwrap(), data);
        assert_eq!(mode_of(&path), 0o640);
    }
    let manifest_path = harness.library_manifest("gemma3", "1b");
    assert_eq!(outcome.manifest_path, manifest_path);
    assert_eq!(fs::read(&manifest_path).unwrap(), model.manifest);

    assert_eq!(outcome.entry.reference(), "gemma3:1b");
    assert_eq!(outcome.blob_paths.len(), 4);
    let total: usize = model.blobs.iter().map(|(_, data)| data.len()).sum();
    assert_eq!(outcome.bytes_downloaded, total as u64);

    assert!(pending.is_empty());
    assert!(harness.staging_is_empty());
}

#[tokio::test]
async fn test_hub_download_layout() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();
    let id: ModelIdentifier = "bartowski/Llama-3.2-1B-Instruct-GGUF:Q4_K_M".parse().unwrap();
    let downloader = harness.downloader(
        FakeRegistry::new(&model, Faults::default(), &cancel),
        FakeInventory::listing("hf.co/bartowski/Llama-3.2-1B-Instruct-GGUF:Q4_K_M", -5),
    );

    let outcome = downloader.download(&id, &cancel).await.unwrap();

    assert_eq!(
        outcome.manifest_path,
        harness
            .root
            .join("manifests/hf.co/bartowski/Llama-3.2-1B-Instruct-GGUF/Q4_K_M")
    );
    assert_eq!(fs::read(&outcome.manifest_path).unwrap(), model.manifest);
}

#[tokio::test]
async fn test_blobs_requested_in_manifest_order() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();
    let registry = FakeRegistry::new(&model, Faults::default(), &cancel);
    let requests = Arc::clone(&registry.requests);
    let downloader = harness.downloader(registry, FakeInventory::listing("gemma3:1b", 0));

    downloader.download(&gemma(), &cancel).await.unwrap();

    let expected: Vec<String> = model.blobs.iter().map(|(d, _)| d.to_string()).collect();
    assert_eq!(*requests.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_failed_blob_never_exposes_manifest() {
    let model = sample_model();

    for k in 0..model.blobs.len() {
        let harness = Harness::new();
        let cancel = CancellationToken::new();
        let faults = Faults {
            fail_open: Some(k),
            ..Faults::default()
        };
        let downloader = harness.downloader(
            FakeRegistry::new(&model, faults, &cancel),
            FakeInventory::listing("gemma3:1b", 0),
        );

        let err = downloader.download(&gemma(), &cancel).await.unwrap_err();
        assert!(
            matches!(err, DownloaderError::DownloadFailed { .. }),
            "blob {k}: {err}"
        );
        assert!(!harness.root.join("manifests").exists(), "blob {k}");
        assert_eq!(harness.committed_blobs(), 0, "blob {k}");
        assert!(harness.staging_is_empty(), "blob {k}");
    }
}

#[tokio::test]
async fn test_corrupted_blob_is_rejected() {
    let model = sample_model();

    for k in 0..model.blobs.len() {
        let harness = Harness::new();
        let cancel = CancellationToken::new();
        let faults = Faults {
            corrupt: Some(k),
            ..Faults::default()
        };
        let registry = FakeRegistry::new(&model, faults, &cancel);
        let requests = Arc::clone(&registry.requests);
        let downloader = harness.downloader(registry, FakeInventory::listing("gemma3:1b", 0));

        let err = downloader.download(&gemma(), &cancel).await.unwrap_err();
        match err {
            DownloaderError::DigestMismatch { expected, .. } => {
                assert_eq!(expected, model.blobs[k].0.to_string());
            }
            other => panic!("blob {k}: unexpected error {other}"),
        }

        // Later blobs are never requested
        assert_eq!(requests.lock().unwrap().len(), k + 1);
        assert_eq!(harness.committed_blobs(), 0);
        assert!(!harness.library_manifest("gemma3", "1b").exists());
        assert!(harness.staging_is_empty());
    }
}

#[tokio::test]
async fn test_commit_failure_rolls_back_tracked_work() {
    let model = sample_model();

    for remove_on_error in [false, true] {
        let mut harness = Harness::new();
        harness.settings.server.remove_downloaded_on_error = remove_on_error;
        let cancel = CancellationToken::new();

        // A directory squatting on the third blob's name makes its commit fail
        let blocked = harness.blob_path(&model.blobs[2].0);
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("occupant"), "x").unwrap();

        let downloader = harness.downloader(
            FakeRegistry::new(&model, Faults::default(), &cancel),
            FakeInventory::listing("gemma3:1b", 0),
        );
        let err = downloader.download(&gemma(), &cancel).await.unwrap_err();
        assert!(matches!(err, DownloaderError::PersistenceFailed { .. }), "{err}");

        assert!(!harness.root.join("manifests").exists());
        assert!(harness.staging_is_empty());
        assert!(blocked.join("occupant").exists());

        // Blobs committed before the failure only go when rollback covers them
        for (digest, _) in &model.blobs[..2] {
            assert_eq!(harness.blob_path(digest).exists(), !remove_on_error);
        }
    }
}

#[tokio::test]
async fn test_uninitialized_store() {
    let harness = Harness::without_store();
    let model = sample_model();
    let cancel = CancellationToken::new();
    let downloader = harness.downloader(
        FakeRegistry::new(&model, Faults::default(), &cancel),
        FakeInventory::listing("gemma3:1b", 0),
    );

    let err = downloader.download(&gemma(), &cancel).await.unwrap_err();
    assert!(matches!(err, DownloaderError::StoreNotInitialized(_)));
    assert!(!harness.root.join("manifests").exists());
    assert!(harness.staging_is_empty());
}

#[tokio::test]
async fn test_not_listed_keeps_install_by_default() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();
    let pending = PendingWork::new();
    let downloader = harness.downloader(
        FakeRegistry::new(&model, Faults::default(), &cancel),
        FakeInventory::empty(),
    );

    let err = downloader
        .download_with(&gemma(), &pending, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloaderError::NotFound(ref name) if name == "gemma3:1b"));

    assert!(harness.library_manifest("gemma3", "1b").exists());
    assert_eq!(harness.committed_blobs(), model.blobs.len());
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_not_listed_rolls_back_when_configured() {
    let mut harness = Harness::new();
    harness.settings.server.remove_downloaded_on_error = true;
    let model = sample_model();
    let cancel = CancellationToken::new();

    // Another model already shares the license blob
    let (shared_digest, shared_data) = &model.blobs[3];
    let shared = harness.blob_path(shared_digest);
    fs::write(&shared, shared_data).unwrap();
    // And the registry directory already exists
    let library_dir = harness.root.join("manifests/registry.ollama.ai/library");
    fs::create_dir_all(&library_dir).unwrap();

    let downloader = harness.downloader(
        FakeRegistry::new(&model, Faults::default(), &cancel),
        FakeInventory::empty(),
    );
    let err = downloader.download(&gemma(), &cancel).await.unwrap_err();
    assert!(matches!(err, DownloaderError::NotFound(_)));

    assert!(!library_dir.join("gemma3").exists());
    assert!(library_dir.exists());
    for (digest, _) in &model.blobs[..3] {
        assert!(!harness.blob_path(digest).exists());
    }
    assert_eq!(&fs::read(&shared).unwrap(), shared_data);
    assert!(harness.staging_is_empty());
}

#[tokio::test]
async fn test_stale_inventory_entry_is_not_a_match() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();
    let downloader = harness.downloader(
        FakeRegistry::new(&model, Faults::default(), &cancel),
        FakeInventory::listing("gemma3:1b", -90),
    );

    let err = downloader.download(&gemma(), &cancel).await.unwrap_err();
    assert!(matches!(err, DownloaderError::NotFound(_)));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let registry = FakeRegistry::new(&model, Faults::default(), &cancel);
    let requests = Arc::clone(&registry.requests);
    let downloader = harness.downloader(registry, FakeInventory::listing("gemma3:1b", 0));

    let err = downloader.download(&gemma(), &cancel).await.unwrap_err();
    assert!(matches!(err, DownloaderError::Cancelled));
    assert!(requests.lock().unwrap().is_empty());
    assert_eq!(harness.committed_blobs(), 0);
}

#[tokio::test]
async fn test_cancelled_mid_download_cleans_up() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();
    let faults = Faults {
        cancel_at: Some(2),
        ..Faults::default()
    };
    let pending = PendingWork::new();
    let downloader = harness.downloader(
        FakeRegistry::new(&model, faults, &cancel),
        FakeInventory::listing("gemma3:1b", 0),
    );

    let err = downloader
        .download_with(&gemma(), &pending, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloaderError::Cancelled));

    assert!(pending.is_empty());
    assert!(harness.staging_is_empty());
    assert_eq!(harness.committed_blobs(), 0);
    assert!(!harness.root.join("manifests").exists());
}

#[tokio::test]
async fn test_manifest_errors_touch_nothing() {
    let harness = Harness::new();
    let model = sample_model();
    let cancel = CancellationToken::new();

    let mut missing = FakeRegistry::new(&model, Faults::default(), &cancel);
    missing.manifest = None;
    let err = harness
        .downloader(missing, FakeInventory::empty())
        .download(&gemma(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloaderError::ManifestNotFound { status: 404, .. }));

    let mut malformed = FakeRegistry::new(&model, Faults::default(), &cancel);
    malformed.manifest = Some(b"<html>rate limited</html>".to_vec());
    let err = harness
        .downloader(malformed, FakeInventory::empty())
        .download(&gemma(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloaderError::ManifestMalformed { .. }));

    assert_eq!(harness.committed_blobs(), 0);
    assert!(harness.staging_is_empty());
    assert!(!harness.root.join("manifests").exists());
}
