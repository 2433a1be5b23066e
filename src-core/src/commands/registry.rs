use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Commands;
use crate::error::CommandError;
use crate::models::ProgressSink;

/// Single source of truth for the command names the transport accepts.
pub const COMMANDS: &[&str] = &[
    // Translation
    "list_languages",
    "translate",
    // Translation models
    "list_models",
    "get_model_status",
    "download_model",
    "cancel_download",
    "load_model",
    "switch_model",
    "unload_model",
    "delete_model",
    // Text to speech
    "get_tts_status",
    "download_tts_model",
    "load_tts_model",
    "unload_tts_model",
    "synthesize_speech",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateArgs {
    text: String,
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelArgs {
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct SynthesizeArgs {
    text: String,
    language: String,
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, CommandError> {
    // Commands without arguments may be sent with `args` omitted.
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| CommandError::InvalidArguments(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Internal(e.to_string()))
}

/// Run the command `name` with JSON `args`. Download commands report
/// progress to `sink`.
pub async fn dispatch(
    commands: &Commands,
    name: &str,
    args: Value,
    sink: Arc<dyn ProgressSink>,
) -> Result<Value, CommandError> {
    match name {
        "list_languages" => to_value(commands.list_languages().await),
        "translate" => {
            let a: TranslateArgs = parse(args)?;
            to_value(commands.translate(a.text, a.source_lang, a.target_lang).await?)
        }
        "list_models" => to_value(commands.list_models().await?),
        "get_model_status" => {
            let a: ModelArgs = parse(args)?;
            to_value(commands.get_model_status(a.model_id).await?)
        }
        "download_model" => {
            let a: ModelArgs = parse(args)?;
            to_value(commands.download_model(a.model_id, sink).await?)
        }
        "cancel_download" => {
            let a: ModelArgs = parse(args)?;
            to_value(commands.cancel_download(a.model_id).await?)
        }
        "load_model" => {
            let a: ModelArgs = parse(args)?;
            to_value(commands.load_model(a.model_id).await?)
        }
        "switch_model" => {
            let a: ModelArgs = parse(args)?;
            to_value(commands.switch_model(a.model_id).await?)
        }
        "unload_model" => to_value(commands.unload_model().await?),
        "delete_model" => {
            let a: ModelArgs = parse(args)?;
            to_value(commands.delete_model(a.model_id).await?)
        }
        "get_tts_status" => to_value(commands.get_tts_status().await?),
        "download_tts_model" => to_value(commands.download_tts_model(sink).await?),
        "load_tts_model" => to_value(commands.load_tts_model().await?),
        "unload_tts_model" => to_value(commands.unload_tts_model().await?),
        "synthesize_speech" => {
            let a: SynthesizeArgs = parse(args)?;
            to_value(commands.synthesize_speech(a.text, a.language).await?)
        }
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn args_are_camel_case() {
        let a: TranslateArgs =
            parse(json!({"text": "hi", "sourceLang": "en", "targetLang": "fr"})).unwrap();
        assert_eq!(a.source_lang, "en");
        assert_eq!(a.target_lang, "fr");

        let err = parse::<ModelArgs>(json!({"model_id": "4b"})).unwrap_err();
        assert_eq!(err.code(), "invalid_arguments");

        let err = parse::<ModelArgs>(Value::Null).unwrap_err();
        assert_eq!(err.code(), "invalid_arguments");
    }

    #[test]
    fn command_names_are_unique() {
        let mut names = COMMANDS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), COMMANDS.len());
    }
}
