use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::{AdapterError, ModelCapabilities, TranscriptionAdapter};
use crate::schedule::types::Parameters;

#[derive(Default)]
pub struct AdapterRegistryBuilder {
    adapters: HashMap<String, Arc<dyn TranscriptionAdapter>>,
}

impl AdapterRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model_id: impl Into<String>, adapter: Arc<dyn TranscriptionAdapter>) -> &mut Self {
        let model_id = model_id.into();
        if self.adapters.insert(model_id.clone(), adapter).is_some() {
            warn!("Adapter for model '{}' registered twice, keeping the last one", model_id);
        }
        info!("Registered transcription adapter '{}'", model_id);
        self
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            adapters: self.adapters,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterStatus {
    pub model_id: String,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Model id to adapter lookup, frozen once built.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn TranscriptionAdapter>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::new()
    }

    pub fn get(&self, model_id: &str) -> Result<Arc<dyn TranscriptionAdapter>, AdapterError> {
        self.adapters
            .get(model_id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownModel(model_id.to_string()))
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.adapters.contains_key(model_id)
    }

    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn capabilities(&self) -> Vec<ModelCapabilities> {
        self.model_ids()
            .iter()
            .filter_map(|id| self.adapters.get(id))
            .map(|a| a.capabilities())
            .collect()
    }

    pub fn supported_models(&self) -> BTreeMap<String, Vec<String>> {
        self.adapters
            .iter()
            .map(|(id, a)| (id.clone(), a.supported_models()))
            .collect()
    }

    pub fn validate(&self, model_id: &str, params: &Parameters) -> Result<(), AdapterError> {
        self.get(model_id)?.validate_parameters(params)
    }

    /// Runs every adapter's readiness check. A failing adapter stays registered.
    pub async fn prepare_all(&self) -> Vec<AdapterStatus> {
        let mut statuses = Vec::with_capacity(self.adapters.len());
        for model_id in self.model_ids() {
            let Some(adapter) = self.adapters.get(&model_id) else {
                continue;
            };
            let status = match adapter.prepare_environment().await {
                Ok(()) => AdapterStatus {
                    model_id,
                    ready: true,
                    error: None,
                },
                Err(e) => {
                    warn!("Adapter '{}' is not ready: {}", model_id, e);
                    AdapterStatus {
                        model_id,
                        ready: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            statuses.push(status);
        }
        statuses
    }
}
