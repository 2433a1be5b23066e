//! Command gateway: the async surface a UI (or the `serve` transport) calls.
//!
//! Commands never block the caller's executor thread. Worker and disk work
//! runs on the blocking pool; downloads run as spawned tasks.

mod languages;
mod models;
mod registry;
mod tts;

pub use registry::{dispatch, COMMANDS};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::models::{ModelDescriptor, ModelManager, ModelSnapshot, ModelStatus};

/// Handles to both family managers, shared by every command.
#[derive(Clone)]
pub struct Commands {
    translation: Arc<ModelManager>,
    tts: Arc<ModelManager>,
}

impl Commands {
    pub fn new(translation: Arc<ModelManager>, tts: Arc<ModelManager>) -> Self {
        Self { translation, tts }
    }

    pub fn translation(&self) -> &Arc<ModelManager> {
        &self.translation
    }

    pub fn tts(&self) -> &Arc<ModelManager> {
        &self.tts
    }

    /// Stop both workers. Called once on exit.
    pub async fn shutdown(&self) {
        let translation = Arc::clone(&self.translation);
        let tts = Arc::clone(&self.tts);
        let stopped = tokio::task::spawn_blocking(move || {
            translation.shutdown();
            tts.shutdown();
        })
        .await;
        if let Err(e) = stopped {
            log::error!("Worker shutdown failed: {}", e);
        }
    }
}

/// Run blocking manager work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, CommandError>
where
    F: FnOnce() -> Result<T, CommandError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Model information for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub repo_id: String,
    pub ram_gb: u32,
    pub description: String,
    pub status: ModelStatus,
    pub error: Option<String>,
}

impl ModelInfo {
    pub fn new(model: ModelDescriptor, snapshot: ModelSnapshot) -> Self {
        Self {
            id: model.id,
            name: model.name,
            repo_id: model.repo_id,
            ram_gb: model.ram_gb,
            description: model.description,
            status: snapshot.status,
            error: snapshot.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatusResponse {
    pub model_id: String,
    pub status: ModelStatus,
    pub current_model_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsStatusResponse {
    pub status: ModelStatus,
    pub error: Option<String>,
}

impl From<ModelSnapshot> for TtsStatusResponse {
    fn from(snapshot: ModelSnapshot) -> Self {
        Self {
            status: snapshot.status,
            error: snapshot.error,
        }
    }
}
