use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::debug;

use super::base::BaseAdapter;
use super::schema::ParameterSchema;
use super::whisperx::{self, WhisperxResult};
use super::{AdapterError, AudioInput, ModelCapabilities, ProcessingContext, TranscriptionAdapter};
use crate::schedule::types::{Parameters, TranscriptResult};

pub const MODAL_WHISPERX: &str = "whisperx-modal";

/// WhisperX deployed as a remote compute function behind an HTTP endpoint.
pub struct ModalAdapter {
    base: BaseAdapter,
    client: reqwest::Client,
    function_url: String,
    token: Option<String>,
}

impl ModalAdapter {
    pub fn new(function_url: impl Into<String>) -> Self {
        let capabilities = whisperx::capabilities(MODAL_WHISPERX, MODAL_WHISPERX);
        Self {
            base: BaseAdapter::new(capabilities, whisperx::extended_schema(&whisperx::base_schema())),
            client: reqwest::Client::new(),
            function_url: function_url.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn call(&self, job_id: &str, params: Parameters) -> Result<Value, AdapterError> {
        debug!("Calling modal function {}", self.function_url);
        let mut request = self
            .client
            .post(&self.function_url)
            .json(&json!({ "args": [job_id, params] }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Backend {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TranscriptionAdapter for ModalAdapter {
    fn capabilities(&self) -> ModelCapabilities {
        self.base.capabilities()
    }

    fn parameter_schema(&self) -> &[ParameterSchema] {
        self.base.schema()
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["modal-cloud".to_string()]
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
            let bytes = tokio::fs::read(&input.file_path).await?;
            let mut request = params.clone();
            request.insert("audio_base64".to_string(), Value::String(STANDARD.encode(bytes)));

            let output = self.call(&ctx.job_id, request).await?;
            let mut transcript = WhisperxResult::from_value(output)?.into_transcript();
            transcript.processing_time = ctx.elapsed_ms();
            transcript.model_used = self.base.string_param(&params, "model").unwrap_or_default();
            transcript.metadata = self.base.default_metadata(&params);
            Ok::<_, AdapterError>(transcript)
        }
        .await;

        self.base.log_end(ctx, &result);
        result
    }
}
