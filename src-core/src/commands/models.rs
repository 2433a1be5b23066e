use std::sync::Arc;

use log::info;

use super::{blocking, Commands, ModelInfo, ModelStatusResponse};
use crate::error::CommandError;
use crate::models::{ModelManager, ModelSnapshot, ProgressSink};

fn status_response(manager: &ModelManager, id: &str, snapshot: ModelSnapshot) -> ModelStatusResponse {
    ModelStatusResponse {
        model_id: id.to_string(),
        status: snapshot.status,
        current_model_id: manager.current_model_id(),
        error: snapshot.error,
    }
}

// ===== TRANSLATION MODEL COMMANDS =====

impl Commands {
    /// Every translation model with its current status.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, CommandError> {
        let manager = Arc::clone(&self.translation);
        blocking(move || {
            Ok(manager
                .list()
                .into_iter()
                .map(|(model, snapshot)| ModelInfo::new(model, snapshot))
                .collect())
        })
        .await
    }

    pub async fn get_model_status(&self, model_id: String) -> Result<ModelStatusResponse, CommandError> {
        let manager = Arc::clone(&self.translation);
        blocking(move || {
            let snapshot = manager.status(&model_id)?;
            Ok(status_response(&manager, &model_id, snapshot))
        })
        .await
    }

    /// Download a translation model, streaming progress into `sink`.
    pub async fn download_model(
        &self,
        model_id: String,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ModelStatusResponse, CommandError> {
        download(Arc::clone(&self.translation), model_id, sink).await
    }

    pub async fn cancel_download(&self, model_id: String) -> Result<(), CommandError> {
        // Either family may own the id.
        if self.tts.descriptor(&model_id).is_ok() {
            return self.tts.cancel_download(&model_id);
        }
        self.translation.cancel_download(&model_id)
    }

    /// Load a translation model, replacing the current one.
    pub async fn load_model(&self, model_id: String) -> Result<ModelStatusResponse, CommandError> {
        let manager = Arc::clone(&self.translation);
        blocking(move || {
            let snapshot = manager.load(&model_id)?;
            Ok(status_response(&manager, &model_id, snapshot))
        })
        .await
    }

    pub async fn switch_model(&self, model_id: String) -> Result<ModelStatusResponse, CommandError> {
        let manager = Arc::clone(&self.translation);
        blocking(move || {
            let snapshot = manager.switch(&model_id)?;
            Ok(status_response(&manager, &model_id, snapshot))
        })
        .await
    }

    /// Stop the translation worker (frees memory).
    pub async fn unload_model(&self) -> Result<(), CommandError> {
        let manager = Arc::clone(&self.translation);
        blocking(move || {
            if let Some(id) = manager.unload() {
                info!("Unloaded translation model '{}'", id);
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_model(&self, model_id: String) -> Result<ModelStatusResponse, CommandError> {
        let manager = Arc::clone(&self.translation);
        blocking(move || {
            let snapshot = manager.delete(&model_id)?;
            Ok(status_response(&manager, &model_id, snapshot))
        })
        .await
    }
}

/// Run a download as its own task so it survives the caller going away.
pub(super) async fn download(
    manager: Arc<ModelManager>,
    model_id: String,
    sink: Arc<dyn ProgressSink>,
) -> Result<ModelStatusResponse, CommandError> {
    let task = tokio::spawn(async move {
        let snapshot = manager.download(&model_id, sink).await?;
        Ok::<_, CommandError>(status_response(&manager, &model_id, snapshot))
    });
    task.await?
}
