//! Speech synthesis against the ready TTS worker.

use log::debug;
use serde_json::{json, Value};

use crate::error::CommandError;
use crate::models::ModelManager;
use local_translate_protocol::ops;

const TEMPERATURE: f64 = 0.2;

/// Language code to the language name the TTS model expects.
const TTS_LANGUAGES: &[(&str, &str)] = &[
    ("zh", "Chinese"),
    ("en", "English"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("de", "German"),
    ("fr", "French"),
    ("ru", "Russian"),
    ("pt", "Portuguese"),
    ("es", "Spanish"),
    ("it", "Italian"),
];

const DEFAULT_VOICES: &[(&str, &str)] = &[("zh", "Vivian"), ("en", "Chelsie")];

pub fn tts_language(code: &str) -> Option<&'static str> {
    TTS_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

pub fn default_voice(code: &str) -> Option<&'static str> {
    DEFAULT_VOICES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, voice)| *voice)
}

/// Worker parameters for one synthesis. Fails before any worker call when
/// the language is not supported.
pub fn synthesis_params(text: &str, language: &str) -> Result<Value, CommandError> {
    let name = tts_language(language)
        .ok_or_else(|| CommandError::UnsupportedLanguage(language.to_string()))?;

    let mut params = json!({
        "text": text,
        "language": name,
        "temperature": TEMPERATURE,
    });
    if let Some(voice) = default_voice(language) {
        params["voice"] = json!(voice);
    }
    Ok(params)
}

/// Synthesize `text` and return base64-encoded WAV bytes.
pub fn synthesize(manager: &ModelManager, text: &str, language: &str) -> Result<String, CommandError> {
    let params = synthesis_params(text, language)?;
    debug!("Synthesizing {} chars in {}", text.chars().count(), language);

    let result = manager.request(ops::SYNTHESIZE, params)?;
    match result {
        Value::String(audio) => Ok(audio),
        Value::Object(mut fields) => match fields.remove("audio") {
            Some(Value::String(audio)) => Ok(audio),
            _ => Err(CommandError::RequestFailed(
                "synthesis result has no audio".to_string(),
            )),
        },
        other => Err(CommandError::RequestFailed(format!(
            "unexpected synthesis result: {}",
            other
        ))),
    }
}
