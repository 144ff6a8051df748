use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::base::BaseAdapter;
use super::schema::ParameterSchema;
use super::{whisperx, AdapterError, AudioInput, ModelCapabilities, ProcessingContext, TranscriptionAdapter};
use crate::asr::{AsrEngine, AsrParams, TranscribeResult};
use crate::audio;
use crate::schedule::types::{Parameters, TranscriptResult, TranscriptSegment, TranscriptWord};

pub const LOCAL_WHISPER: &str = "whisper";

/// Runs an in-process `AsrEngine` on the resolved file.
pub struct LocalWhisperAdapter {
    base: BaseAdapter,
    engine: Arc<dyn AsrEngine>,
    model_path: PathBuf,
}

impl LocalWhisperAdapter {
    pub fn new(engine: Arc<dyn AsrEngine>, model_path: impl Into<PathBuf>) -> Self {
        let mut capabilities = whisperx::capabilities(LOCAL_WHISPER, "whisper.cpp");
        capabilities.description = "Embedded whisper.cpp runtime".to_string();
        Self {
            base: BaseAdapter::new(capabilities, whisperx::base_schema()),
            engine,
            model_path: model_path.into(),
        }
    }

    fn asr_params(&self, params: &Parameters) -> AsrParams {
        let mut ap = AsrParams::new();
        ap.set_language(self.base.string_param(params, "language"))
            .set_speaker_diarization(self.base.bool_param(params, "diarize"))
            .set_word_timestamps(true)
            .set_temperature(self.base.f64_param(params, "temperature").unwrap_or(0.0) as f32)
            .set_beam_size(self.base.i64_param(params, "beam_size").map(|b| b as i32));
        ap
    }
}

fn speaker_label(diarize: bool, speaker_id: usize) -> Option<String> {
    diarize.then(|| format!("SPEAKER_{:02}", speaker_id))
}

fn to_transcript(result: TranscribeResult, diarize: bool) -> TranscriptResult {
    let segments = result
        .segments
        .into_iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text,
            speaker: speaker_label(diarize, s.speaker_id),
        })
        .collect();
    let word_segments = result
        .words
        .into_iter()
        .map(|w| TranscriptWord {
            start: w.start,
            end: w.end,
            word: w.text,
            score: w.probability as f64,
            speaker: speaker_label(diarize, w.speaker_id),
        })
        .collect();

    TranscriptResult {
        language: result.language.unwrap_or_default(),
        segments,
        word_segments,
        ..Default::default()
    }
    .with_text_or_segments(Some(result.full_text))
}

#[async_trait]
impl TranscriptionAdapter for LocalWhisperAdapter {
    fn capabilities(&self) -> ModelCapabilities {
        self.base.capabilities()
    }

    fn parameter_schema(&self) -> &[ParameterSchema] {
        self.base.schema()
    }

    fn supported_models(&self) -> Vec<String> {
        self.model_path
            .file_stem()
            .map(|s| s.to_string_lossy().trim_start_matches("ggml-").to_string())
            .into_iter()
            .collect()
    }

    async fn prepare_environment(&self) -> Result<(), AdapterError> {
        if !tokio::fs::try_exists(&self.model_path).await? {
            return Err(AdapterError::Environment(format!(
                "whisper model not found at {}",
                self.model_path.display()
            )));
        }
        Ok(())
    }

    async fn transcribe(
        &self,
        input: &AudioInput,
        params: &Parameters,
        ctx: &ProcessingContext,
    ) -> Result<TranscriptResult, AdapterError> {
        let params = self.base.prepare(params)?;
        self.base.log_start(input, ctx);

        let result = async {
            let path = input.file_path.clone();
            let samples = tokio::task::spawn_blocking(move || audio::decode_to_pcm16k(&path))
                .await
                .map_err(|e| AdapterError::Runtime(e.to_string()))?
                .map_err(|e| AdapterError::Runtime(e.to_string()))?;

            let output = self
                .engine
                .transcribe(samples, self.asr_params(&params))
                .await
                .map_err(|e| AdapterError::Runtime(e.to_string()))?;

            let mut transcript = to_transcript(output, self.base.bool_param(&params, "diarize"));
            if transcript.language.is_empty() {
                transcript.language = self.base.string_param(&params, "language").unwrap_or_default();
            }
            transcript.processing_time = ctx.elapsed_ms();
            transcript.model_used = self.supported_models().into_iter().next().unwrap_or_default();
            transcript.metadata = self.base.default_metadata(&params);
            Ok::<_, AdapterError>(transcript)
        }
        .await;

        self.base.log_end(ctx, &result);
        result
    }
}
