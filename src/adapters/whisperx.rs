//! WhisperX parameter schema and result format, shared by every WhisperX backed adapter.

use serde::Deserialize;
use serde_json::{json, Value};

use super::schema::{ParamType, ParameterSchema};
use super::{AdapterError, ModelCapabilities};
use crate::schedule::types::{TranscriptResult, TranscriptSegment, TranscriptWord};

pub const WHISPER_MODELS: &[&str] = &[
    "tiny", "tiny.en", "base", "base.en", "small", "small.en", "medium", "medium.en", "large",
    "large-v1", "large-v2", "large-v3",
];

pub fn capabilities(model_id: &str, model_family: &str) -> ModelCapabilities {
    ModelCapabilities {
        model_id: model_id.to_string(),
        model_family: model_family.to_string(),
        description: "WhisperX transcription with alignment and speaker diarization".to_string(),
        supported_languages: vec!["auto".to_string()],
        supports_diarization: true,
        supports_word_timestamps: true,
        requires_gpu: false,
        parameters: Vec::new(),
    }
}

pub fn base_schema() -> Vec<ParameterSchema> {
    vec![
        ParameterSchema::optional("model", ParamType::String, json!("small"), "basic")
            .one_of(WHISPER_MODELS)
            .describe("Whisper model size"),
        ParameterSchema::unset("language", ParamType::String, "basic")
            .describe("ISO language code, detected when absent"),
        ParameterSchema::optional("batch_size", ParamType::Int, json!(16), "basic"),
        ParameterSchema::optional("compute_type", ParamType::String, json!("float16"), "basic")
            .one_of(&["float16", "float32", "int8"]),
        ParameterSchema::optional("device", ParamType::String, json!("auto"), "basic")
            .one_of(&["auto", "cpu", "cuda"]),
        ParameterSchema::optional("beam_size", ParamType::Int, json!(5), "quality"),
        ParameterSchema::optional("temperature", ParamType::Float, json!(0.0), "quality"),
        ParameterSchema::optional("vad_onset", ParamType::Float, json!(0.5), "quality"),
        ParameterSchema::optional("vad_offset", ParamType::Float, json!(0.363), "quality"),
        ParameterSchema::optional("diarize", ParamType::Bool, json!(false), "diarization"),
        ParameterSchema::unset("min_speakers", ParamType::Int, "diarization"),
        ParameterSchema::unset("max_speakers", ParamType::Int, "diarization"),
    ]
}

/// The base schema plus the options only the remote WhisperX workers understand.
pub fn extended_schema(base: &[ParameterSchema]) -> Vec<ParameterSchema> {
    let mut schema = base.to_vec();
    schema.extend([
        ParameterSchema::optional("no_align", ParamType::Bool, json!(false), "advanced"),
        ParameterSchema::optional("return_char_alignments", ParamType::Bool, json!(false), "advanced"),
        ParameterSchema::optional("compression_ratio_threshold", ParamType::Float, json!(2.4), "advanced"),
        ParameterSchema::optional("logprob_threshold", ParamType::Float, json!(-1.0), "advanced"),
        ParameterSchema::optional("no_speech_threshold", ParamType::Float, json!(0.6), "advanced"),
        ParameterSchema::optional("suppress_tokens", ParamType::String, json!("-1"), "advanced"),
        ParameterSchema::optional("chunk_size", ParamType::Int, json!(30), "advanced"),
        ParameterSchema::optional("length_penalty", ParamType::Int, json!(1), "advanced"),
    ]);
    schema
}

#[derive(Debug, Deserialize)]
struct WhisperxSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    text: String,
    #[serde(default)]
    speaker: Option<String>,
}

// whisperx omits timings and score for tokens it could not align
#[derive(Debug, Deserialize)]
struct WhisperxWord {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    word: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    speaker: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WhisperxResult {
    #[serde(default)]
    segments: Vec<WhisperxSegment>,
    #[serde(default)]
    word_segments: Vec<WhisperxWord>,
    #[serde(default)]
    language: String,
    #[serde(default)]
    text: Option<String>,
}

impl WhisperxResult {
    /// Accepts either a JSON object or a JSON string holding one.
    pub fn from_value(value: Value) -> Result<Self, AdapterError> {
        match value {
            Value::String(raw) => Ok(serde_json::from_str(&raw)?),
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            other => Err(AdapterError::Decode(format!(
                "expected a whisperx object, got {}",
                other
            ))),
        }
    }

    pub fn into_transcript(self) -> TranscriptResult {
        let segments = self
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                start: s.start,
                end: s.end,
                text: s.text,
                speaker: s.speaker,
            })
            .collect();
        let word_segments = self
            .word_segments
            .into_iter()
            .map(|w| TranscriptWord {
                start: w.start,
                end: w.end,
                word: w.word,
                score: w.score,
                speaker: w.speaker,
            })
            .collect();

        TranscriptResult {
            language: self.language,
            segments,
            word_segments,
            // whisperx has no aggregate confidence
            confidence: 0.0,
            ..Default::default()
        }
        .with_text_or_segments(self.text)
    }
}
