use serde::{Deserialize, Serialize};

use super::ModelFamily;

/// Static information about a model available for download.
/// This is hardcoded and never changes at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    /// Unique identifier, also the cache directory name (e.g., "4b")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Hub repository the artifacts come from
    pub repo_id: String,
    /// Approximate RAM usage when loaded, in GB
    pub ram_gb: u32,
    pub description: String,
    pub family: ModelFamily,
}

/// Hardcoded catalog of available models, translation first.
pub fn get_model_catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            id: "4b".into(),
            name: "TranslateGemma 4B (4-bit)".into(),
            repo_id: "mlx-community/translategemma-4b-it-4bit".into(),
            ram_gb: 4,
            description: "Default model, fast and lightweight (~2.2GB download)".into(),
            family: ModelFamily::Translation,
        },
        ModelDescriptor {
            id: "4b-8bit".into(),
            name: "TranslateGemma 4B (8-bit)".into(),
            repo_id: "mlx-community/translategemma-4b-it-8bit".into(),
            ram_gb: 6,
            description: "Higher precision 4B variant (~4.1GB download)".into(),
            family: ModelFamily::Translation,
        },
        ModelDescriptor {
            id: "27b".into(),
            name: "TranslateGemma 27B (4-bit)".into(),
            repo_id: "mlx-community/translategemma-27b-it-4bit".into(),
            ram_gb: 18,
            description: "Best quality, requires significant RAM (~15.2GB download)".into(),
            family: ModelFamily::Translation,
        },
        ModelDescriptor {
            id: "qwen3-tts-0.6b".into(),
            name: "Qwen3-TTS 0.6B".into(),
            repo_id: "mlx-community/Qwen3-TTS-12Hz-0.6B-Base-bf16".into(),
            ram_gb: 2,
            description: "Multilingual text-to-speech (~1.8GB download)".into(),
            family: ModelFamily::Tts,
        },
    ]
}

pub fn models_for_family(family: ModelFamily) -> Vec<ModelDescriptor> {
    get_model_catalog()
        .into_iter()
        .filter(|m| m.family == family)
        .collect()
}

pub fn find_model(id: &str) -> Option<ModelDescriptor> {
    get_model_catalog().into_iter().find(|m| m.id == id)
}
