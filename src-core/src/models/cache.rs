use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Name of the completion marker inside a model directory.
pub const MARKER_FILE: &str = ".complete";

/// Suffix of in-flight downloads. Partial files survive cancellation so the
/// next attempt can resume.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Contents of the completion marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadMarker {
    pub repo_id: String,
    pub files: Vec<String>,
    /// Unix seconds
    pub completed_at: u64,
}

impl DownloadMarker {
    pub fn new(repo_id: impl Into<String>, files: Vec<String>) -> Self {
        let completed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            repo_id: repo_id.into(),
            files,
            completed_at,
        }
    }
}

/// On-disk model cache: `<root>/<model id>/` holds artifacts and the marker.
///
/// A directory is complete iff its marker exists. The marker is written last
/// and atomically, so a crash at any point leaves either a complete directory
/// or one without a marker.
#[derive(Debug, Clone)]
pub struct ModelCache {
    root: PathBuf,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn marker_path(&self, id: &str) -> PathBuf {
        self.model_dir(id).join(MARKER_FILE)
    }

    pub fn read_marker(&self, id: &str) -> Option<DownloadMarker> {
        let bytes = fs::read(self.marker_path(id)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!("Ignoring unreadable marker for '{}': {}", id, e);
                None
            }
        }
    }

    pub fn is_complete(&self, id: &str) -> bool {
        self.read_marker(id).is_some()
    }

    /// Write the marker via temp file + fsync + rename.
    pub fn write_marker(&self, id: &str, marker: &DownloadMarker) -> io::Result<()> {
        let dir = self.model_dir(id);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!("{}.{}.tmp", MARKER_FILE, uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(marker).map_err(io::Error::other)?;

        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, dir.join(MARKER_FILE))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        sync_dir(&dir);
        debug!("Wrote completion marker for '{}'", id);
        Ok(())
    }

    pub fn clear_marker(&self, id: &str) -> io::Result<()> {
        match fs::remove_file(self.marker_path(id)) {
            Ok(()) => {
                info!("Removed completion marker for '{}'", id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove the model directory. The marker goes first so an interrupted
    /// delete never leaves a "complete" directory behind.
    pub fn delete(&self, id: &str) -> io::Result<()> {
        self.clear_marker(id)?;
        let dir = self.model_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Deleted model directory {:?}", dir);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Persist the rename itself.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Check that all expected safetensors weight files are present.
///
/// Accepts three layouts:
/// 1. `model.safetensors.index.json` listing shards in its `weight_map`
/// 2. `model-XXXXX-of-NNNNN.safetensors` shards without an index
/// 3. any single `*.safetensors` file
pub fn safetensors_complete(model_dir: &Path) -> bool {
    let index_file = model_dir.join("model.safetensors.index.json");
    if index_file.exists() {
        let index: serde_json::Value = match fs::read(&index_file)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
        {
            Some(v) => v,
            None => return false,
        };
        let Some(weight_map) = index.get("weight_map").and_then(|m| m.as_object()) else {
            return false;
        };
        return weight_map
            .values()
            .filter_map(|v| v.as_str())
            .all(|shard| model_dir.join(shard).is_file());
    }

    let names: Vec<String> = match fs::read_dir(model_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(_) => return false,
    };

    let shards: Vec<(u32, u32)> = names.iter().filter_map(|n| parse_shard(n)).collect();
    if let Some(&(_, expected)) = shards.first() {
        return (1..=expected).all(|i| shards.contains(&(i, expected)));
    }

    names.iter().any(|n| n.ends_with(".safetensors"))
}

/// `model-00002-of-00004.safetensors` -> `(2, 4)`
fn parse_shard(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix("model-")?.strip_suffix(".safetensors")?;
    let (index, total) = rest.split_once("-of-")?;
    Some((index.parse().ok()?, total.parse().ok()?))
}
