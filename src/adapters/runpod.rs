use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::base::BaseAdapter;
use super::schema::ParameterSchema;
use super::whisperx::{self, WhisperxResult};
use super::{AdapterError, AudioInput, ModelCapabilities, ProcessingContext, TranscriptionAdapter};
use crate::schedule::types::{Parameters, TranscriptResult};

pub const WHISPERX_RUNPOD: &str = "whisperx-runpod";
pub const WHISPERX_LOCAL: &str = "whisperx-local";

/// How the worker gets hold of the audio bytes.
#[derive(Debug, Clone, Default)]
pub enum AudioDelivery {
    /// Base64 encoded into `audio_base64`.
    #[default]
    Inline,
    /// The worker downloads `{base_url}/api/v1/transcription/{job_id}/audio` itself.
    Callback {
        base_url: String,
        headers: HashMap<String, String>,
    },
}

#[derive(Debug, Deserialize)]
struct RunSyncResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// WhisperX worker reached through the RunPod `runsync` protocol.
pub struct RunPodAdapter {
    base: BaseAdapter,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    delivery: AudioDelivery,
}

impl RunPodAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            base: Self::base_for(WHISPERX_RUNPOD, WHISPERX_RUNPOD),
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: None,
            delivery: AudioDelivery::Inline,
        }
    }

    fn base_for(model_id: &str, family: &str) -> BaseAdapter {
        let mut capabilities = whisperx::capabilities(model_id, family);
        capabilities.requires_gpu = true;
        BaseAdapter::new(capabilities, whisperx::extended_schema(&whisperx::base_schema()))
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    /// Registers the same protocol under another id, e.g. a self-hosted WhisperX worker.
    pub fn with_model_family(mut self, model_id: &str, family: &str) -> Self {
        self.base = Self::base_for(model_id, family);
        self
    }

    pub fn with_delivery(mut self, delivery: AudioDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn build_input(
        &self,
        input: &AudioInput,
        mut params: Parameters,
        ctx: &ProcessingContext,
    ) -> Result<Parameters, AdapterError> {
        match &self.delivery {
            AudioDelivery::Inline => {
                let bytes = tokio::fs::read(&input.file_path).await?;
                params.insert("audio_base64".to_string(), Value::String(STANDARD.encode(bytes)));
            }
            AudioDelivery::Callback { base_url, headers } => {
                let url = format!(
                    "{}/api/v1/transcription/{}/audio",
                    base_url.trim_end_matches('/'),
                    ctx.job_id
                );
                params.insert("audio".to_string(), Value::String(url));
                if !headers.is_empty() {
                    params.insert(
                        "download_headers".to_string(),
                        serde_json::to_value(headers).map_err(|e| AdapterError::Encoding(e.to_string()))?,
                    );
                }
            }
        }
        Ok(params)
    }

    async fn run_sync(&self, input: Parameters) -> Result<Value, AdapterError> {
        let url = format!("{}/runsync", self.endpoint);
        debug!("Executing RunPod request against {}", url);

        let mut request = self.client.post(&url).json(&serde_json::json!({ "input": input }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let body: RunSyncResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(AdapterError::Backend {
                status: status.as_u16(),
                body: error,
            });
        }
        if !body.status.is_empty() && body.status != "COMPLETED" {
            return Err(AdapterError::Backend {
                status: status.as_u16(),
                body: format!("runpod job {} ended in state {}", body.id, body.status),
            });
        }
        body.output
            .ok_or_else(|| AdapterError::Decode("runpod response has no output".to_string()))
    }
}

#[async_trait]
impl TranscriptionAdapter for RunPodAdapter {
    fn capabilities(&self) -> ModelCapabilities {
        self.base.capabilities()
    }

    fn parameter_schema(&self) -> &[ParameterSchema] {
        self.base.schema()
    }

    fn supported_models(&self) -> Vec<String> {
        whisperx::WHISPER_MODELS.iter().map(|m| m.to_string()).collect()
    }

    async fn prepare_environment(&self) -> Result<(), AdapterError> {
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
            let request = self.build_input(input, params.clone(), ctx).await?;
            let output = self.run_sync(request).await?;

            let mut transcript = WhisperxResult::from_value(output)?.into_transcript();
            transcript.processing_time = ctx.elapsed_ms();
            transcript.model_used = self.base.string_param(&params, "model").unwrap_or_default();
            transcript.metadata = self.base.default_metadata(&params);
            debug!(
                job_id = %ctx.job_id,
                segments = transcript.segments.len(),
                words = transcript.word_segments.len(),
                "RunPod transcription parsed"
            );
            Ok::<_, AdapterError>(transcript)
        }
        .await;

        self.base.log_end(ctx, &result);
        result
    }
}
