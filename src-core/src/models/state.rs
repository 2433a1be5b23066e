//! Model State Machine - single source of truth for valid status transitions
//!
//! State diagram:
//! ```text
//! NotDownloaded ─DownloadStarted─> Downloading ─DownloadSucceeded─> Downloaded
//! Error ─────────DownloadStarted─┘            └─DownloadFailed────> Error
//!
//! Downloaded ─LoadStarted─> Loading ─LoadSucceeded─> Ready ─Unloaded─> Downloaded
//! Error ──────LoadStarted─┘         └─LoadFailed───> Error
//!
//! Ready | Loading ─Crashed─> Error
//! Downloaded | Error | Loading ─Invalidated─> NotDownloaded
//! ```
//!
//! The error message is cleared by any transition into a non-error status.

use log::warn;

use super::status::{ModelSnapshot, ModelStatus};

/// Events that can trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ModelEvent {
    DownloadStarted,
    DownloadSucceeded,
    DownloadFailed,
    LoadStarted,
    LoadSucceeded,
    LoadFailed,
    /// Worker shut down on request
    Unloaded,
    /// Worker died or broke the protocol
    Crashed,
    /// Artifacts found missing or deleted
    Invalidated,
}

/// Reason a transition was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{attempted_event} event rejected in {current_state} state")]
pub struct TransitionRejection {
    pub current_state: ModelStatus,
    pub attempted_event: ModelEvent,
}

/// Pure function: compute the status an event leads to, if the event is
/// valid in `current`.
pub fn compute_transition(current: ModelStatus, event: ModelEvent) -> Option<ModelStatus> {
    use ModelEvent as E;
    use ModelStatus as S;

    match (current, event) {
        (S::NotDownloaded | S::Error, E::DownloadStarted) => Some(S::Downloading),
        (S::Downloading, E::DownloadSucceeded) => Some(S::Downloaded),
        (S::Downloading, E::DownloadFailed) => Some(S::Error),

        (S::Downloaded | S::Error, E::LoadStarted) => Some(S::Loading),
        (S::Loading, E::LoadSucceeded) => Some(S::Ready),
        (S::Loading, E::LoadFailed) => Some(S::Error),

        (S::Ready, E::Unloaded) => Some(S::Downloaded),
        (S::Ready | S::Loading, E::Crashed) => Some(S::Error),
        (S::Downloaded | S::Error | S::Loading, E::Invalidated) => Some(S::NotDownloaded),

        _ => None,
    }
}

/// Status plus last error for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRecord {
    status: ModelStatus,
    error: Option<String>,
}

impl ModelRecord {
    pub fn new(status: ModelStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn status(&self) -> ModelStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            status: self.status,
            error: self.error.clone(),
        }
    }

    /// Attempt a transition. This is the ONLY way to change status.
    pub fn transition(&mut self, event: ModelEvent) -> Result<ModelStatus, TransitionRejection> {
        match compute_transition(self.status, event) {
            Some(next) => {
                self.status = next;
                if next != ModelStatus::Error {
                    self.error = None;
                }
                Ok(next)
            }
            None => Err(TransitionRejection {
                current_state: self.status,
                attempted_event: event,
            }),
        }
    }

    /// Apply a failure event and record its message.
    ///
    /// A model already in `Error` (e.g. the crash hook got there first) keeps
    /// its status and takes the newer message.
    pub fn fail(&mut self, event: ModelEvent, message: impl Into<String>) {
        let message = message.into();
        match self.transition(event) {
            Ok(ModelStatus::Error) => self.error = Some(message),
            Ok(other) => warn!("{} moved model to {} instead of error", event, other),
            Err(_) if self.status == ModelStatus::Error => self.error = Some(message),
            Err(rejection) => warn!("{} (message: {})", rejection, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ModelEvent as E;
    use ModelStatus as S;

    #[test]
    fn test_valid_transitions() {
        let cases = vec![
            (S::NotDownloaded, E::DownloadStarted, S::Downloading),
            (S::Error, E::DownloadStarted, S::Downloading),
            (S::Downloading, E::DownloadSucceeded, S::Downloaded),
            (S::Downloading, E::DownloadFailed, S::Error),
            (S::Downloaded, E::LoadStarted, S::Loading),
            (S::Error, E::LoadStarted, S::Loading),
            (S::Loading, E::LoadSucceeded, S::Ready),
            (S::Loading, E::LoadFailed, S::Error),
            (S::Ready, E::Unloaded, S::Downloaded),
            (S::Ready, E::Crashed, S::Error),
            (S::Loading, E::Crashed, S::Error),
            (S::Downloaded, E::Invalidated, S::NotDownloaded),
            (S::Error, E::Invalidated, S::NotDownloaded),
            (S::Loading, E::Invalidated, S::NotDownloaded),
        ];

        for (from, event, to) in cases {
            assert_eq!(
                compute_transition(from, event),
                Some(to),
                "{} from {}",
                event,
                from
            );
        }
    }

    #[test]
    fn test_rejected_transitions() {
        let cases = vec![
            (S::Downloading, E::DownloadStarted),
            (S::Ready, E::DownloadStarted),
            (S::NotDownloaded, E::LoadStarted),
            (S::Downloading, E::LoadStarted),
            (S::Ready, E::LoadStarted),
            (S::Downloaded, E::Unloaded),
            (S::Downloaded, E::Crashed),
            (S::Ready, E::Invalidated),
            (S::Downloading, E::Invalidated),
        ];

        for (from, event) in cases {
            let mut record = ModelRecord::new(from);
            let rejection = record.transition(event).unwrap_err();
            assert_eq!(rejection.current_state, from);
            assert_eq!(record.status(), from, "{} must not change {}", event, from);
        }
    }

    #[test]
    fn error_message_lifecycle() {
        let mut record = ModelRecord::new(S::Downloading);
        record.fail(E::DownloadFailed, "Download cancelled");
        assert_eq!(record.status(), S::Error);
        assert_eq!(record.error(), Some("Download cancelled"));

        // A second failure while already in error keeps the newest message.
        record.fail(E::Crashed, "worker process exited unexpectedly");
        assert_eq!(record.error(), Some("worker process exited unexpectedly"));

        record.transition(E::DownloadStarted).unwrap();
        assert_eq!(record.error(), None);
    }
}
