//! Translation requests against the ready translation worker.

use log::{debug, warn};
use serde_json::{json, Value};

use crate::error::CommandError;
use crate::languages;
use crate::models::ModelManager;
use local_translate_protocol::ops;

const MAX_TOKENS: u32 = 2048;

/// Gemma chat-turn prompt asking for a bare translation of `text`.
pub fn build_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    let source = languages::name(source_lang);
    let target = languages::name(target_lang);
    format!(
        "<bos><start_of_turn>user\n\
         You are a professional {source} ({source_lang}) to {target} ({target_lang}) translator. \
         Your goal is to accurately convey the meaning and nuances of the original {source} text \
         while adhering to {target} grammar, vocabulary, and cultural sensitivities.\n\
         Produce only the {target} translation, without any additional explanations or commentary. \
         Please translate the following {source} text into {target}:\n\n\n\
         {text}<end_of_turn>\n<start_of_turn>model\n",
        text = text.trim(),
    )
}

/// Translate `text` with the currently loaded translation model.
pub fn translate(
    manager: &ModelManager,
    text: &str,
    source_lang: &str,
    target_lang: &str,
) -> Result<String, CommandError> {
    for code in [source_lang, target_lang] {
        if !languages::is_supported(code) {
            warn!("Translating with unlisted language code '{}'", code);
        }
    }
    let prompt = build_prompt(text, source_lang, target_lang);
    debug!(
        "Translating {} chars {} -> {}",
        text.chars().count(),
        source_lang,
        target_lang
    );

    let result = manager.request(
        ops::TRANSLATE,
        json!({ "prompt": prompt, "maxTokens": MAX_TOKENS }),
    )?;

    match result {
        Value::String(s) => Ok(s.trim().to_string()),
        other => Err(CommandError::RequestFailed(format!(
            "unexpected translate result: {}",
            other
        ))),
    }
}
