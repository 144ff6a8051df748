use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::schedule::types::{Parameters, TranscriptResult};

pub mod base;
pub mod local;
pub mod modal;
pub mod registry;
pub mod runpod;
pub mod schema;
pub mod whisperx;

pub use base::BaseAdapter;
pub use local::LocalWhisperAdapter;
pub use modal::ModalAdapter;
pub use registry::{AdapterRegistry, AdapterRegistryBuilder};
pub use runpod::{AudioDelivery, RunPodAdapter};
pub use schema::{ParamType, ParameterSchema};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("model not registered: {0}")]
    UnknownModel(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("audio io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("could not encode request: {0}")]
    Encoding(String),
    #[error("could not decode backend result: {0}")]
    Decode(String),
    #[error("environment not ready: {0}")]
    Environment(String),
    #[error("transcription failed: {0}")]
    Runtime(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AdapterError::Decode(e.to_string())
        } else {
            AdapterError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Decode(e.to_string())
    }
}

/// What a registered model can do, as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub model_id: String,
    pub model_family: String,
    pub description: String,
    pub supported_languages: Vec<String>,
    pub supports_diarization: bool,
    pub supports_word_timestamps: bool,
    pub requires_gpu: bool,
    pub parameters: Vec<ParameterSchema>,
}

/// A local, already-resolved audio file.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub file_path: PathBuf,
    pub format: Option<String>,
}

impl AudioInput {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let file_path = path.as_ref().to_path_buf();
        let format = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        Self { file_path, format }
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Per-call context handed to an adapter.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub job_id: String,
    pub started_at: Instant,
    pub metadata: HashMap<String, String>,
}

impl ProcessingContext {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            started_at: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

#[async_trait]
pub trait TranscriptionAdapter: Send + Sync + 'static {
    fn capabilities(&self) -> ModelCapabilities;

    fn parameter_schema(&self) -> &[ParameterSchema];

    fn validate_parameters(&self, params: &Parameters) -> Result<(), AdapterError> {
        schema::validate(self.parameter_schema(), params)
    }

    /// Model names the backend accepts in its `model` parameter.
    fn supported_models(&self) -> Vec<String>;

    /// One time readiness check, run at startup.
    async fn prepare_environment(&self) -> Result<(), AdapterError>;

    async fn transcribe(
        &self,
        input: &AudioInput,
        params: &Parameters,
        ctx: &ProcessingContext,
    ) -> Result<TranscriptResult, AdapterError>;
}
