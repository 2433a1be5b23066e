use std::sync::Arc;

use super::models::download;
use super::{blocking, Commands, TtsStatusResponse};
use crate::error::CommandError;
use crate::models::{ModelManager, ProgressSink};
use crate::speech;

/// The TTS family serves a single catalog model.
fn tts_model_id(manager: &ModelManager) -> Result<String, CommandError> {
    manager
        .catalog()
        .first()
        .map(|m| m.id.clone())
        .ok_or_else(|| CommandError::Internal("no TTS model in catalog".to_string()))
}

// ===== TTS COMMANDS =====

impl Commands {
    pub async fn get_tts_status(&self) -> Result<TtsStatusResponse, CommandError> {
        let manager = Arc::clone(&self.tts);
        blocking(move || {
            let id = tts_model_id(&manager)?;
            Ok(manager.status(&id)?.into())
        })
        .await
    }

    pub async fn download_tts_model(
        &self,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<TtsStatusResponse, CommandError> {
        let id = tts_model_id(&self.tts)?;
        let response = download(Arc::clone(&self.tts), id, sink).await?;
        Ok(TtsStatusResponse {
            status: response.status,
            error: response.error,
        })
    }

    pub async fn load_tts_model(&self) -> Result<TtsStatusResponse, CommandError> {
        let manager = Arc::clone(&self.tts);
        blocking(move || {
            let id = tts_model_id(&manager)?;
            Ok(manager.load(&id)?.into())
        })
        .await
    }

    pub async fn unload_tts_model(&self) -> Result<(), CommandError> {
        let manager = Arc::clone(&self.tts);
        blocking(move || {
            manager.unload();
            Ok(())
        })
        .await
    }

    /// Synthesize speech; returns base64-encoded WAV bytes.
    pub async fn synthesize_speech(
        &self,
        text: String,
        language: String,
    ) -> Result<String, CommandError> {
        // Reject before touching the blocking pool or the worker.
        speech::synthesis_params(&text, &language)?;
        let manager = Arc::clone(&self.tts);
        blocking(move || speech::synthesize(&manager, &text, &language)).await
    }
}
