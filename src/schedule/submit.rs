use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::adapters::{AdapterError, AdapterRegistry};
use crate::schedule::queue::TaskQueue;
use crate::schedule::types::{Job, JobError, JobStatus, Parameters, Tag};
use crate::storage::job::JobRepository;
use crate::storage::profile::{self, ProfileRepository};
use crate::storage::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transition(#[from] JobError),
    #[error("model not registered: {0}")]
    UnknownModel(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

impl SubmitError {
    /// Errors caused by the request itself rather than by the service.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SubmitError::UnknownModel(_) | SubmitError::InvalidParameters(_))
    }
}

impl From<AdapterError> for SubmitError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::UnknownModel(model) => SubmitError::UnknownModel(model),
            AdapterError::InvalidParameters(reason) => SubmitError::InvalidParameters(reason),
            other => SubmitError::InvalidParameters(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    pub title: Option<String>,
    pub audio_uri: Option<String>,
    pub audio_path: Option<PathBuf>,
    /// Falls back to the default profile, then to the configured default model.
    pub model_id: Option<String>,
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub diarization: bool,
    pub output_bucket: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Creates jobs and hands them to the queue.
pub struct Submission {
    jobs: Arc<dyn JobRepository>,
    profiles: Option<Arc<dyn ProfileRepository>>,
    queue: Arc<TaskQueue>,
    registry: Arc<AdapterRegistry>,
    default_model: String,
}

impl Submission {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        queue: Arc<TaskQueue>,
        registry: Arc<AdapterRegistry>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            profiles: None,
            queue,
            registry,
            default_model: default_model.into(),
        }
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileRepository>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    async fn model_and_parameters(&self, request: &SubmitRequest) -> Result<(String, Parameters, bool), SubmitError> {
        if let Some(model_id) = &request.model_id {
            return Ok((
                model_id.clone(),
                request.parameters.clone().unwrap_or_default(),
                request.diarization,
            ));
        }

        if let Some(profiles) = &self.profiles {
            if let Some(profile) = profile::default_or_first(profiles.as_ref()).await? {
                let mut parameters = profile.parameters;
                // 请求参数覆盖 profile
                if let Some(overrides) = &request.parameters {
                    parameters.extend(overrides.clone());
                }
                return Ok((profile.model_id, parameters, request.diarization || profile.diarization));
            }
        }

        Ok((
            self.default_model.clone(),
            request.parameters.clone().unwrap_or_default(),
            request.diarization,
        ))
    }

    /// Persists a `Pending` job and enqueues it. If the queue refuses, the job is parked
    /// as `Uploaded` and the id is still returned.
    ///
    /// The resolved model and parameters are checked against the registry first; nothing
    /// is persisted for a rejected request.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, SubmitError> {
        let (model_id, parameters, diarization) = self.model_and_parameters(&request).await?;

        let mut job = Job::new(model_id, parameters);
        job.title = request.title;
        job.audio_uri = request.audio_uri;
        job.audio_path = request.audio_path;
        job.diarization = diarization;
        job.output_bucket = request.output_bucket;
        job.tags = request.tags;

        self.registry.validate(&job.model_id, &job.effective_parameters())?;
        self.jobs.create(&job).await?;
        info!("Created job {} for model {}", job.id, job.model_id);

        if let Err(e) = self.queue.enqueue_job(&job.id) {
            warn!("Failed to enqueue job {}, parking it as uploaded: {}", job.id, e);
            job.transition_to(JobStatus::Uploaded)?;
            self.jobs.update(&job).await?;
        }
        Ok(job.id)
    }

    /// Moves every `Uploaded` job back to `Pending` and enqueues it again.
    /// Returns how many were enqueued.
    pub async fn requeue_uploaded(&self) -> Result<usize, SubmitError> {
        let parked = self.jobs.list_by_status(JobStatus::Uploaded).await?;
        let mut requeued = 0;
        for mut job in parked {
            job.transition_to(JobStatus::Pending)?;
            self.jobs.update(&job).await?;

            match self.queue.enqueue_job(&job.id) {
                Ok(()) => requeued += 1,
                Err(e) => {
                    warn!("Failed to requeue job {}: {}", job.id, e);
                    job.transition_to(JobStatus::Uploaded)?;
                    self.jobs.update(&job).await?;
                }
            }
        }
        if requeued > 0 {
            info!("Requeued {} uploaded jobs", requeued);
        }
        Ok(requeued)
    }

    /// Enqueues jobs left `Pending` by a previous run. Only call before accepting submissions.
    pub async fn resume_pending(&self) -> Result<usize, SubmitError> {
        let pending = self.jobs.list_by_status(JobStatus::Pending).await?;
        let mut resumed = 0;
        for mut job in pending {
            match self.queue.enqueue_job(&job.id) {
                Ok(()) => resumed += 1,
                Err(e) => {
                    warn!("Failed to resume job {}, parking it as uploaded: {}", job.id, e);
                    job.transition_to(JobStatus::Uploaded)?;
                    self.jobs.update(&job).await?;
                }
            }
        }
        if resumed > 0 {
            info!("Resumed {} pending jobs", resumed);
        }
        Ok(resumed)
    }
}
