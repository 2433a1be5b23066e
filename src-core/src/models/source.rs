use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use log::{debug, info};
use serde::Deserialize;

use super::download::DownloadError;

/// One artifact listed by a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the repository root (may contain `/`).
    pub path: String,
    pub size: Option<u64>,
    /// Lowercase hex SHA-256, when the source publishes one.
    pub sha256: Option<String>,
}

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, DownloadError>>;

/// Body of an artifact, possibly starting at a resume offset.
pub struct RemoteBody {
    /// `true` if the stream starts at the requested offset, `false` if the
    /// source ignored the offset and sends the whole file.
    pub resumed: bool,
    pub stream: ByteStream,
}

/// Where model artifacts come from.
pub trait ArtifactSource: Send + Sync {
    fn list_files<'a>(
        &'a self,
        repo_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteFile>, DownloadError>>;

    fn open<'a>(
        &'a self,
        repo_id: &'a str,
        file: &'a RemoteFile,
        offset: u64,
    ) -> BoxFuture<'a, Result<RemoteBody, DownloadError>>;
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    oid: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Hugging Face style hub over HTTP.
pub struct HubSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HubSource {
    pub fn new(endpoint: &str) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("local-translate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn tree_url(&self, repo_id: &str) -> String {
        format!(
            "{}/api/models/{}/tree/main?recursive=true",
            self.endpoint, repo_id
        )
    }

    fn resolve_url(&self, repo_id: &str, path: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.endpoint, repo_id, path)
    }

    async fn fetch_tree(&self, repo_id: &str) -> Result<Vec<RemoteFile>, DownloadError> {
        let url = self.tree_url(repo_id);
        debug!("Listing {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Http {
                status: response.status().as_u16(),
                url,
            });
        }

        let entries: Vec<TreeEntry> = response.json().await?;
        let files: Vec<RemoteFile> = entries
            .into_iter()
            .filter(|e| e.kind == "file")
            .map(|e| {
                let (size, sha256) = match e.lfs {
                    Some(lfs) => (lfs.size.or(e.size), Some(lfs.oid.to_lowercase())),
                    None => (e.size, None),
                };
                RemoteFile {
                    path: e.path,
                    size,
                    sha256,
                }
            })
            .collect();

        info!("Repository {} lists {} files", repo_id, files.len());
        Ok(files)
    }

    async fn fetch_file(
        &self,
        repo_id: &str,
        file: &RemoteFile,
        offset: u64,
    ) -> Result<RemoteBody, DownloadError> {
        let url = self.resolve_url(repo_id, &file.path);

        // Build request with Range header for resume
        let mut request = self.client.get(&url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();
        let resumed = match status {
            reqwest::StatusCode::PARTIAL_CONTENT => true,
            s if s.is_success() => false,
            _ => {
                return Err(DownloadError::Http {
                    status: status.as_u16(),
                    url,
                })
            }
        };

        if offset > 0 && !resumed {
            info!("Server ignored range for {}, restarting file", file.path);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(DownloadError::from))
            .boxed();

        Ok(RemoteBody { resumed, stream })
    }
}

impl ArtifactSource for HubSource {
    fn list_files<'a>(
        &'a self,
        repo_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteFile>, DownloadError>> {
        self.fetch_tree(repo_id).boxed()
    }

    fn open<'a>(
        &'a self,
        repo_id: &'a str,
        file: &'a RemoteFile,
        offset: u64,
    ) -> BoxFuture<'a, Result<RemoteBody, DownloadError>> {
        self.fetch_file(repo_id, file, offset).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_hub_layout() {
        let hub = HubSource::new("https://huggingface.co/").unwrap();
        assert_eq!(
            hub.tree_url("mlx-community/translategemma-4b-it-4bit"),
            "https://huggingface.co/api/models/mlx-community/translategemma-4b-it-4bit/tree/main?recursive=true"
        );
        assert_eq!(
            hub.resolve_url("org/repo", "sub/model.safetensors"),
            "https://huggingface.co/org/repo/resolve/main/sub/model.safetensors"
        );
    }

    #[test]
    fn tree_entries_parse() {
        let body = r#"[
            {"type": "directory", "oid": "1", "size": 0, "path": "speech_tokenizer"},
            {"type": "file", "oid": "2", "size": 1200, "path": "config.json"},
            {"type": "file", "oid": "3", "size": 135, "path": "model.safetensors",
             "lfs": {"oid": "ABCDEF", "size": 2200000000, "pointerSize": 135}}
        ]"#;
        let entries: Vec<TreeEntry> = serde_json::from_str(body).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, "directory");
        let lfs = entries[2].lfs.as_ref().unwrap();
        assert_eq!(lfs.oid, "ABCDEF");
        assert_eq!(lfs.size, Some(2_200_000_000));
    }
}
