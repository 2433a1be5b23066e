use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Error returned by every gateway command.
///
/// The variant name (snake_case) is the stable `code` sent to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CommandError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Model '{0}' is not downloaded")]
    NotDownloaded(String),
    #[error("Model '{0}' is already being downloaded")]
    AlreadyInProgress(String),
    #[error("{0}")]
    Busy(String),
    #[error("No active download for model '{0}'")]
    NoActiveDownload(String),
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    #[error("Failed to load model: {0}")]
    LoadFailed(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("No model loaded")]
    NoModelLoaded,
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Worker protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        self.into()
    }
}

impl From<tokio::task::JoinError> for CommandError {
    fn from(err: tokio::task::JoinError) -> Self {
        CommandError::Internal(format!("background task failed: {}", err))
    }
}

/// Wire form of a [`CommandError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<&CommandError> for ErrorPayload {
    fn from(err: &CommandError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Process-level failures surfaced by the binary entry points.
#[derive(Debug, Display, From)]
pub enum Error {
    #[display("configuration error: {_0}")]
    #[from]
    Config(crate::config::ConfigError),

    #[display("I/O error: {_0}")]
    #[from]
    Io(std::io::Error),

    #[display("JSON error: {_0}")]
    #[from]
    Json(serde_json::Error),

    #[display("{_0}")]
    #[from]
    Command(CommandError),

    #[display("download source error: {_0}")]
    #[from]
    Download(crate::models::DownloadError),
}

impl std::error::Error for Error {}
