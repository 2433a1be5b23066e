mod cache;
mod catalog;
mod download;
pub mod events;
mod manager;
mod source;
mod state;
mod status;

pub use cache::{safetensors_complete, DownloadMarker, ModelCache, MARKER_FILE, PARTIAL_SUFFIX};
pub use catalog::{find_model, get_model_catalog, models_for_family, ModelDescriptor};
pub use download::{DownloadCoordinator, DownloadError};
pub use events::{ChannelSink, DownloadProgress, FnSink, ProgressReporter, ProgressSink};
pub use manager::{ManagerOptions, ModelManager};
pub use source::{ArtifactSource, ByteStream, HubSource, RemoteBody, RemoteFile};
pub use state::{ModelEvent, ModelRecord, TransitionRejection};
pub use status::{ModelSnapshot, ModelStatus};

use serde::{Deserialize, Serialize};

/// Group of models served by one kind of worker. At most one worker per
/// family is alive at a time.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelFamily {
    Translation,
    Tts,
}

impl ModelFamily {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}
