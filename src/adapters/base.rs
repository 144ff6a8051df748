use std::collections::HashMap;

use serde_json::Value;
use tracing::{error, info};

use super::schema::{self, ParameterSchema};
use super::{AdapterError, AudioInput, ModelCapabilities, ProcessingContext};
use crate::schedule::types::Parameters;

/// Shared state and helpers that concrete adapters delegate to.
#[derive(Debug, Clone)]
pub struct BaseAdapter {
    capabilities: ModelCapabilities,
    schema: Vec<ParameterSchema>,
}

impl BaseAdapter {
    pub fn new(mut capabilities: ModelCapabilities, schema: Vec<ParameterSchema>) -> Self {
        capabilities.parameters = schema.clone();
        Self { capabilities, schema }
    }

    pub fn capabilities(&self) -> ModelCapabilities {
        self.capabilities.clone()
    }

    pub fn model_id(&self) -> &str {
        &self.capabilities.model_id
    }

    pub fn schema(&self) -> &[ParameterSchema] {
        &self.schema
    }

    pub fn validate(&self, params: &Parameters) -> Result<(), AdapterError> {
        schema::validate(&self.schema, params)
    }

    /// Validates, then returns the parameters with schema defaults filled in.
    pub fn prepare(&self, params: &Parameters) -> Result<Parameters, AdapterError> {
        self.validate(params)?;
        Ok(schema::apply_defaults(&self.schema, params))
    }

    pub fn string_param(&self, params: &Parameters, name: &str) -> Option<String> {
        self.lookup(params, name)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn bool_param(&self, params: &Parameters, name: &str) -> bool {
        self.lookup(params, name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn f64_param(&self, params: &Parameters, name: &str) -> Option<f64> {
        self.lookup(params, name).and_then(Value::as_f64)
    }

    pub fn i64_param(&self, params: &Parameters, name: &str) -> Option<i64> {
        self.lookup(params, name).and_then(Value::as_i64)
    }

    fn lookup<'a>(&'a self, params: &'a Parameters, name: &str) -> Option<&'a Value> {
        match params.get(name) {
            Some(Value::Null) | None => self
                .schema
                .iter()
                .find(|p| p.name == name)
                .and_then(|p| p.default.as_ref()),
            Some(value) => Some(value),
        }
    }

    pub fn default_metadata(&self, params: &Parameters) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("adapter".to_string(), self.capabilities.model_id.clone());
        metadata.insert("model_family".to_string(), self.capabilities.model_family.clone());
        if let Some(model) = self.string_param(params, "model") {
            metadata.insert("model".to_string(), model);
        }
        metadata.insert(
            "language".to_string(),
            self.string_param(params, "language").unwrap_or_else(|| "auto".to_string()),
        );
        metadata.insert("diarize".to_string(), self.bool_param(params, "diarize").to_string());
        metadata
    }

    pub fn log_start(&self, input: &AudioInput, ctx: &ProcessingContext) {
        info!(
            job_id = %ctx.job_id,
            adapter = %self.capabilities.model_id,
            file = %input.file_path.display(),
            "Starting transcription"
        );
    }

    pub fn log_end<T>(&self, ctx: &ProcessingContext, result: &Result<T, AdapterError>) {
        match result {
            Ok(_) => info!(
                job_id = %ctx.job_id,
                adapter = %self.capabilities.model_id,
                elapsed_ms = ctx.elapsed_ms(),
                "Transcription finished"
            ),
            Err(e) => error!(
                job_id = %ctx.job_id,
                adapter = %self.capabilities.model_id,
                elapsed_ms = ctx.elapsed_ms(),
                "Transcription failed: {}", e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::whisperx;
    use serde_json::json;

    fn base() -> BaseAdapter {
        BaseAdapter::new(whisperx::capabilities("whisperx-test", "whisperx"), whisperx::base_schema())
    }

    #[test]
    fn test_params_fall_back_to_schema_defaults() {
        let adapter = base();
        let params = json!({"model": "large-v3", "diarize": true}).as_object().cloned().unwrap();

        assert_eq!(adapter.string_param(&params, "model").as_deref(), Some("large-v3"));
        assert_eq!(adapter.string_param(&params, "compute_type").as_deref(), Some("float16"));
        assert_eq!(adapter.i64_param(&params, "batch_size"), Some(16));
        assert!(adapter.bool_param(&params, "diarize"));
        assert_eq!(adapter.string_param(&params, "language"), None);
    }

    #[test]
    fn test_default_metadata() {
        let adapter = base();
        let metadata = adapter.default_metadata(&Parameters::new());
        assert_eq!(metadata["adapter"], "whisperx-test");
        assert_eq!(metadata["model"], "small");
        assert_eq!(metadata["language"], "auto");
        assert_eq!(metadata["diarize"], "false");
    }

    #[test]
    fn test_capabilities_carry_schema() {
        let adapter = base();
        assert_eq!(adapter.capabilities().parameters.len(), adapter.schema().len());
    }
}
