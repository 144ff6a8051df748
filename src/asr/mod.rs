use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "whisper")]
pub mod whisper;

#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("failed to load model: {0}")]
    Model(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Clone, Default)]
pub struct AsrParams {
    pub language: Option<String>,
    pub speaker_diarization: bool,
    pub word_timestamps: bool,
    pub temperature: f32,
    pub beam_size: Option<i32>,
    pub n_threads: Option<i32>,
}

impl AsrParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_language(&mut self, language: Option<String>) -> &mut Self {
        self.language = language;
        self
    }

    pub fn set_speaker_diarization(&mut self, speaker_diarization: bool) -> &mut Self {
        self.speaker_diarization = speaker_diarization;
        self
    }

    pub fn set_word_timestamps(&mut self, word_timestamps: bool) -> &mut Self {
        self.word_timestamps = word_timestamps;
        self
    }

    pub fn set_temperature(&mut self, temperature: f32) -> &mut Self {
        self.temperature = temperature;
        self
    }

    pub fn set_beam_size(&mut self, beam_size: Option<i32>) -> &mut Self {
        self.beam_size = beam_size;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeSegment {
    pub text: String,
    pub speaker_id: usize,
    /// 秒
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub probability: f32,
    pub speaker_id: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscribeResult {
    pub segments: Vec<TranscribeSegment>,
    pub words: Vec<TranscribeWord>,
    pub full_text: String,
    pub language: Option<String>,
}

/// In-process speech recognizer over 16 kHz mono samples.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(&self, audio: Vec<f32>, params: AsrParams) -> Result<TranscribeResult, AsrError>;
}
