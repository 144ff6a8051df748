use std::sync::Arc;

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::asr::{AsrEngine, AsrError, AsrParams, TranscribeResult, TranscribeSegment, TranscribeWord};

/// whisper.cpp 时间戳单位是 10ms
const CENTISECONDS: f64 = 100.0;

pub struct WhisperAsr {
    whisper_ctx: Arc<WhisperContext>,
}

impl WhisperAsr {
    pub fn new(model_path: &str) -> Result<Self, AsrError> {
        info!("Loading whisper model from {}", model_path);
        let whisper_ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| AsrError::Model(format!("failed to open whisper model: {}", e)))?;
        Ok(Self {
            whisper_ctx: Arc::new(whisper_ctx),
        })
    }
}

fn build_params(ap: &AsrParams) -> FullParams<'_, '_> {
    let strategy = match ap.beam_size {
        Some(beam_size) if beam_size > 1 => SamplingStrategy::BeamSearch {
            beam_size,
            patience: -1.0,
        },
        _ => SamplingStrategy::Greedy { best_of: 1 },
    };
    let mut params = FullParams::new(strategy);

    // 未指定语言时由模型自动检测
    params.set_language(Some(ap.language.as_deref().unwrap_or("auto")));

    // tinydiarize 说话人切换检测
    params.set_tdrz_enable(ap.speaker_diarization);
    params.set_token_timestamps(ap.word_timestamps);
    params.set_temperature(ap.temperature);
    params.set_n_threads(ap.n_threads.unwrap_or(4));

    params.set_translate(false);
    params.set_no_context(false);
    params.set_single_segment(false);
    params.set_suppress_blank(true);
    params.set_suppress_non_speech_tokens(true);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params
}

fn run(ctx: &WhisperContext, audio: &[f32], ap: &AsrParams) -> Result<TranscribeResult, whisper_rs::WhisperError> {
    let mut state = ctx.create_state()?;
    state.full(build_params(ap), audio)?;

    let num_segments = state.full_n_segments()?;
    let mut result = TranscribeResult {
        language: ap.language.clone(),
        ..Default::default()
    };
    let mut current_speaker = 0;

    for i in 0..num_segments {
        if i > 0 && ap.speaker_diarization && state.full_get_segment_speaker_turn_next(i - 1) {
            current_speaker += 1;
        }

        let text = state.full_get_segment_text(i)?;
        let start = state.full_get_segment_t0(i)? as f64 / CENTISECONDS;
        let end = state.full_get_segment_t1(i)? as f64 / CENTISECONDS;

        if ap.word_timestamps {
            for t in 0..state.full_n_tokens(i)? {
                let token = state.full_get_token_text(i, t)?;
                // 跳过 [_BEG_]、[_TT_xxx] 等特殊 token
                if token.starts_with("[_") {
                    continue;
                }
                let data = state.full_get_token_data(i, t)?;
                result.words.push(TranscribeWord {
                    text: token.trim().to_string(),
                    start: data.t0 as f64 / CENTISECONDS,
                    end: data.t1 as f64 / CENTISECONDS,
                    probability: data.p,
                    speaker_id: current_speaker,
                });
            }
        }

        result.full_text.push_str(&text);
        result.segments.push(TranscribeSegment {
            text: text.trim().to_string(),
            speaker_id: current_speaker,
            start,
            end,
        });
    }

    debug!("whisper produced {} segments", result.segments.len());
    result.full_text = result.full_text.trim().to_string();
    Ok(result)
}

#[async_trait::async_trait]
impl AsrEngine for WhisperAsr {
    async fn transcribe(&self, audio: Vec<f32>, params: AsrParams) -> Result<TranscribeResult, AsrError> {
        let ctx = self.whisper_ctx.clone();
        tokio::task::spawn_blocking(move || run(&ctx, &audio, &params))
            .await
            .map_err(|e| AsrError::Inference(format!("whisper task panicked: {}", e)))?
            .map_err(|e| AsrError::Inference(e.to_string()))
    }
}
