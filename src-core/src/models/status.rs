use serde::{Deserialize, Serialize};

/// Lifecycle status of one model. Owned by its family's manager.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelStatus {
    #[default]
    NotDownloaded,
    Downloading,
    Downloaded,
    Loading,
    Ready,
    Error,
}

impl ModelStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Artifacts are complete on disk.
    pub fn has_artifacts(self) -> bool {
        matches!(self, Self::Downloaded | Self::Loading | Self::Ready)
    }
}

/// Point-in-time copy of a model's status, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSnapshot {
    pub status: ModelStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case() {
        let cases = vec![
            (ModelStatus::NotDownloaded, "not_downloaded"),
            (ModelStatus::Downloading, "downloading"),
            (ModelStatus::Downloaded, "downloaded"),
            (ModelStatus::Loading, "loading"),
            (ModelStatus::Ready, "ready"),
            (ModelStatus::Error, "error"),
        ];

        for (status, expected) in cases {
            assert_eq!(status.as_str(), expected);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(expected.to_string())
            );
        }
    }
}
