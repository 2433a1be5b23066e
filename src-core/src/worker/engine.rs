//! Loopback engines served by the built-in worker.
//!
//! They speak the real protocol without accelerator weights: the translator
//! returns the source text found in the prompt and the speech engine renders
//! a tone whose length follows the text. Real inference runs in external
//! worker programs configured per family.

use std::f32::consts::PI;
use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

use super::runtime::Engine;
use local_translate_protocol::ops;

pub const SAMPLE_RATE: u32 = 24_000;

const SECONDS_PER_CHAR: f32 = 0.06;
const MIN_SECONDS: f32 = 0.25;
const MAX_SECONDS: f32 = 10.0;

fn model_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateParams {
    prompt: String,
    #[serde(default)]
    max_tokens: Option<usize>,
}

#[derive(Default)]
pub struct LoopbackTranslator {
    model: Option<String>,
}

impl Engine for LoopbackTranslator {
    fn load(&mut self, model_path: &Path) -> Result<(), String> {
        self.model = Some(model_name(model_path));
        info!("Loopback translator serving '{}'", model_name(model_path));
        Ok(())
    }

    fn handle(&mut self, op: &str, params: &Value) -> Result<Value, String> {
        if op != ops::TRANSLATE {
            return Err(format!("Unknown op: {}", op));
        }
        let params: TranslateParams = serde_json::from_value(params.clone())
            .map_err(|e| format!("Invalid translate parameters: {}", e))?;

        let mut text = source_text(&params.prompt).to_string();
        if let Some(limit) = params.max_tokens {
            if let Some((cut, _)) = text.char_indices().nth(limit) {
                text.truncate(cut);
            }
        }
        debug!(
            "Translated {} chars with '{}'",
            text.chars().count(),
            self.model.as_deref().unwrap_or_default()
        );
        Ok(Value::String(text))
    }
}

/// The text between the last blank-line separator and the end-of-turn tag.
fn source_text(prompt: &str) -> &str {
    let start = prompt.rfind("\n\n\n").map(|i| i + 3).unwrap_or(0);
    let rest = &prompt[start..];
    let end = rest.find("<end_of_turn>").unwrap_or(rest.len());
    rest[..end].trim()
}

#[derive(Debug, Deserialize)]
struct SynthesizeParams {
    text: String,
    language: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

#[derive(Default)]
pub struct LoopbackSpeech {
    model: Option<String>,
}

impl Engine for LoopbackSpeech {
    fn load(&mut self, model_path: &Path) -> Result<(), String> {
        self.model = Some(model_name(model_path));
        info!("Loopback speech serving '{}'", model_name(model_path));
        Ok(())
    }

    fn handle(&mut self, op: &str, params: &Value) -> Result<Value, String> {
        if op != ops::SYNTHESIZE {
            return Err(format!("Unknown op: {}", op));
        }
        let params: SynthesizeParams = serde_json::from_value(params.clone())
            .map_err(|e| format!("Invalid synthesize parameters: {}", e))?;
        if params.text.trim().is_empty() {
            return Err("Text is empty".to_string());
        }

        debug!(
            "Synthesizing {} chars with '{}' in {} (voice {:?}, temperature {:?})",
            params.text.chars().count(),
            self.model.as_deref().unwrap_or_default(),
            params.language,
            params.voice,
            params.temperature
        );

        let wav = render_tone(params.text.chars().count()).map_err(|e| e.to_string())?;
        Ok(json!({
            "audio": BASE64.encode(wav),
            "sampleRate": SAMPLE_RATE,
        }))
    }
}

/// Mono 16-bit WAV of a 220 Hz tone, 60 ms per character.
fn render_tone(chars: usize) -> Result<Vec<u8>, hound::Error> {
    let seconds = (chars as f32 * SECONDS_PER_CHAR).clamp(MIN_SECONDS, MAX_SECONDS);
    let samples = (seconds * SAMPLE_RATE as f32) as u32;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for n in 0..samples {
            let t = n as f32 / SAMPLE_RATE as f32;
            let sample = (2.0 * PI * 220.0 * t).sin() * 0.3;
            writer.write_sample((sample * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_source_text_from_prompt() {
        let prompt = "<bos><start_of_turn>user\nYou are a professional translator. \
                      Please translate the following English text into Spanish:\n\n\n  Good morning  <end_of_turn>\n<start_of_turn>model\n";
        assert_eq!(source_text(prompt), "Good morning");
        assert_eq!(source_text("plain"), "plain");
    }

    #[test]
    fn translate_requires_prompt() {
        let mut engine = LoopbackTranslator::default();
        let err = engine.handle("translate", &json!({})).unwrap_err();
        assert!(err.contains("Invalid translate parameters"));

        let out = engine
            .handle(
                "translate",
                &json!({"prompt": "\n\n\nhola mundo<end_of_turn>", "maxTokens": 4}),
            )
            .unwrap();
        assert_eq!(out, json!("hola"));
    }

    #[test]
    fn synthesizes_decodable_wav() {
        let mut engine = LoopbackSpeech::default();
        let out = engine
            .handle(
                "synthesize",
                &json!({"text": "hi", "language": "English", "voice": "Chelsie", "temperature": 0.2}),
            )
            .unwrap();

        let audio = BASE64.decode(out["audio"].as_str().unwrap()).unwrap();
        let reader = hound::WavReader::new(Cursor::new(audio)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), (MIN_SECONDS * SAMPLE_RATE as f32) as u32);
    }

    #[test]
    fn empty_text_is_rejected() {
        let mut engine = LoopbackSpeech::default();
        let err = engine
            .handle("synthesize", &json!({"text": "  ", "language": "English"}))
            .unwrap_err();
        assert_eq!(err, "Text is empty");
    }
}
