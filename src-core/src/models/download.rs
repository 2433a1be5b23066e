use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::cache::{DownloadMarker, ModelCache, PARTIAL_SUFFIX};
use super::catalog::ModelDescriptor;
use super::events::ProgressReporter;
use super::source::{ArtifactSource, RemoteFile};
use super::ModelFamily;

const BYTES_PER_GB: f64 = 1e9;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Server returned {status} for {url}")]
    Http { status: u16, url: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Size mismatch for {file}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        file: String,
        expected: u64,
        actual: u64,
    },
    #[error("Hash mismatch for {file}: expected {expected}, got {actual}")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("Repository {0} lists no files")]
    EmptyRepository(String),
    #[error("Refusing unsafe artifact path: {0}")]
    UnsafePath(String),
    #[error("{0}")]
    Source(String),
    #[error("Download cancelled")]
    Cancelled,
}

/// Progress wording per family.
struct ProgressLabels {
    fetching: &'static str,
    downloading: &'static str,
    complete: &'static str,
}

impl ProgressLabels {
    fn for_family(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Translation => Self {
                fetching: "Fetching model info...",
                downloading: "Downloading...",
                complete: "Download complete",
            },
            ModelFamily::Tts => Self {
                fetching: "Fetching TTS model info...",
                downloading: "Downloading TTS...",
                complete: "TTS model download complete",
            },
        }
    }

    fn downloading(&self, done: u64, total: u64) -> String {
        format!(
            "{} {:.1}/{:.1} GB",
            self.downloading,
            done as f64 / BYTES_PER_GB,
            total as f64 / BYTES_PER_GB
        )
    }
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64).min(0.99)
}

/// Fetches every artifact of a model into the cache and writes the
/// completion marker last.
pub struct DownloadCoordinator {
    source: Arc<dyn ArtifactSource>,
    cache: ModelCache,
}

impl DownloadCoordinator {
    pub fn new(source: Arc<dyn ArtifactSource>, cache: ModelCache) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download `model` into `<cache>/<id>/`.
    ///
    /// Files already present and verified are skipped; `.partial` files are
    /// resumed. Cancellation is checked between chunks and never produces a
    /// marker.
    pub async fn run(
        &self,
        model: &ModelDescriptor,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadMarker, DownloadError> {
        let labels = ProgressLabels::for_family(model.family);
        reporter.report(0.0, labels.fetching);

        if let Some(marker) = self.cache.read_marker(&model.id) {
            info!("Model '{}' already complete on disk", model.id);
            reporter.report(1.0, labels.complete);
            return Ok(marker);
        }

        let files = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            listed = self.source.list_files(&model.repo_id) => listed?,
        };
        if files.is_empty() {
            return Err(DownloadError::EmptyRepository(model.repo_id.clone()));
        }

        let model_dir = self.cache.model_dir(&model.id);
        tokio::fs::create_dir_all(&model_dir).await?;

        let total: u64 = files.iter().filter_map(|f| f.size).sum();
        let mut done = 0u64;

        info!(
            "Downloading model '{}' ({} files, {} bytes) into {:?}",
            model.id,
            files.len(),
            total,
            model_dir
        );

        for file in &files {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let written = self
                .fetch_file(model, file, &model_dir, done, total, &labels, reporter, cancel)
                .await?;
            done += written;
            reporter.report_throttled(fraction(done, total), || labels.downloading(done, total));
        }

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let marker = DownloadMarker::new(
            model.repo_id.clone(),
            files.iter().map(|f| f.path.clone()).collect(),
        );
        let cache = self.cache.clone();
        let id = model.id.clone();
        let to_write = marker.clone();
        tokio::task::spawn_blocking(move || cache.write_marker(&id, &to_write))
            .await
            .map_err(|e| DownloadError::Source(format!("marker task failed: {}", e)))??;

        info!("Model '{}' download complete: {} files", model.id, files.len());
        reporter.report(1.0, labels.complete);
        Ok(marker)
    }

    /// Fetch one artifact. Returns its final size in bytes.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_file(
        &self,
        model: &ModelDescriptor,
        file: &RemoteFile,
        model_dir: &Path,
        done_before: u64,
        total: u64,
        labels: &ProgressLabels,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let dest = artifact_path(model_dir, &file.path)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if dest.is_file() {
            match verify_file(&dest, file).await {
                Ok(size) => {
                    debug!("Skipping verified {}", file.path);
                    return Ok(size);
                }
                Err(e) => {
                    warn!("Existing {} failed verification, refetching: {}", file.path, e);
                    tokio::fs::remove_file(&dest).await?;
                }
            }
        }

        let partial = partial_path(&dest);
        let mut offset = match tokio::fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if let Some(expected) = file.size {
            if offset > expected {
                warn!("Partial {} is larger than expected, restarting", file.path);
                offset = 0;
            }
        }

        let already_complete = file.size.is_some_and(|expected| offset == expected && offset > 0);
        if !already_complete {
            if offset > 0 {
                info!("Resuming {} from {} bytes", file.path, offset);
            }

            let body = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                opened = self.source.open(&model.repo_id, file, offset) => opened?,
            };
            if !body.resumed {
                offset = 0;
            }

            // Open file for appending (if resuming) or create new
            let handle = if offset > 0 {
                tokio::fs::OpenOptions::new().append(true).open(&partial).await?
            } else {
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&partial)
                    .await?
            };

            let mut writer = tokio::io::BufWriter::new(handle);
            let mut stream = body.stream;
            let mut received = offset;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    chunk = stream.next() => Some(chunk),
                };
                let chunk = match next {
                    None => {
                        writer.flush().await?;
                        return Err(DownloadError::Cancelled);
                    }
                    Some(None) => break,
                    Some(Some(chunk)) => chunk?,
                };

                writer.write_all(&chunk).await?;
                received += chunk.len() as u64;

                let so_far = done_before + received;
                reporter.report_throttled(fraction(so_far, total), || {
                    labels.downloading(so_far, total)
                });
            }

            writer.flush().await?;
            writer.get_ref().sync_all().await?;
        }

        let size = match verify_file(&partial, file).await {
            Ok(size) => size,
            Err(e) => {
                // A corrupt partial cannot be resumed.
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, &dest).await?;
        debug!("Finished {} ({} bytes)", file.path, size);
        Ok(size)
    }
}

/// Resolve a repository path inside the model directory, rejecting anything
/// that could escape it.
fn artifact_path(model_dir: &Path, relative: &str) -> Result<PathBuf, DownloadError> {
    let mut path = model_dir.to_path_buf();
    for part in relative.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return Err(DownloadError::UnsafePath(relative.to_string()));
        }
        path.push(part);
    }
    Ok(path)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

/// Check size and (when published) SHA-256. Returns the file size.
async fn verify_file(path: &Path, file: &RemoteFile) -> Result<u64, DownloadError> {
    let actual_size = tokio::fs::metadata(path).await?.len();
    if let Some(expected) = file.size {
        if actual_size != expected {
            return Err(DownloadError::SizeMismatch {
                file: file.path.clone(),
                expected,
                actual: actual_size,
            });
        }
    }

    if let Some(expected) = &file.sha256 {
        let actual = sha256_file(path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(DownloadError::HashMismatch {
                file: file.path.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    Ok(actual_size)
}

async fn sha256_file(path: &Path) -> Result<String, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024]; // 1MB buffer

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
