use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, instrument, warn};

use super::{JobOutcome, JobProcessor, ProcessError};
use crate::adapters::{AdapterRegistry, AudioInput, ProcessingContext};
use crate::files::FileService;
use crate::schedule::publish::ResultPublisher;
use crate::schedule::types::{Job, JobStatus, TranscriptResult};
use crate::storage::job::JobRepository;

pub struct TranscriptionJobProcessor {
    jobs: Arc<dyn JobRepository>,
    registry: Arc<AdapterRegistry>,
    files: Arc<FileService>,
    publisher: Option<ResultPublisher>,
    job_timeout: Option<Duration>,
}

impl TranscriptionJobProcessor {
    pub fn new(jobs: Arc<dyn JobRepository>, registry: Arc<AdapterRegistry>, files: Arc<FileService>) -> Self {
        Self {
            jobs,
            registry,
            files,
            publisher: None,
            job_timeout: None,
        }
    }

    pub fn with_publisher(mut self, publisher: ResultPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Everything between `Processing` and the terminal write.
    async fn run(&self, job: &mut Job) -> Result<TranscriptResult, ProcessError> {
        let adapter = self.registry.get(&job.model_id)?;
        let params = job.effective_parameters();
        adapter.validate_parameters(&params)?;

        let reference = job
            .audio_reference()
            .ok_or_else(|| ProcessError::MissingAudio(job.id.clone()))?;
        let path = self.files.resolve(&reference).await?;
        if job.audio_path.as_ref() != Some(&path) {
            job.audio_path = Some(path.clone());
            self.jobs.update(job).await?;
        }

        let input = AudioInput::from_path(&path);
        let ctx = ProcessingContext::new(job.id.clone());
        let transcription = adapter.transcribe(&input, &params, &ctx);
        let transcript = match self.job_timeout {
            Some(limit) => tokio::time::timeout(limit, transcription)
                .await
                .map_err(|_| ProcessError::TimedOut(limit))??,
            None => transcription.await?,
        };
        Ok(transcript)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl JobProcessor for TranscriptionJobProcessor {
    #[instrument(skip(self), fields(model))]
    async fn process_job(&self, job_id: &str) -> Result<JobOutcome, ProcessError> {
        let mut job = self.jobs.find_by_id(job_id).await?;
        tracing::Span::current().record("model", job.model_id.as_str());

        if job.status != JobStatus::Pending {
            warn!("Skipping job {} in status {}", job.id, job.status);
            return Ok(JobOutcome::Skipped);
        }

        job.transition_to(JobStatus::Processing)?;
        self.jobs.update(&job).await?;
        info!("Processing job {} with model {}", job.id, job.model_id);

        // panic 也要落到 Failed
        let result = AssertUnwindSafe(self.run(&mut job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessError::Panicked(panic_message(panic.as_ref()))));

        let failure = match result {
            Ok(transcript) => {
                job.transcript = Some(transcript);
                job.error_message = None;
                job.transition_to(JobStatus::Completed)?;
                None
            }
            Err(e) => {
                error!("Job {} failed: {}", job.id, e);
                job.error_message = Some(e.to_string());
                job.transition_to(JobStatus::Failed)?;
                Some(e)
            }
        };
        // 终态写入
        self.jobs.update(&job).await?;
        info!("Job {} finished as {}", job.id, job.status);

        if let Some(publisher) = &self.publisher {
            publisher.spawn(job);
        }

        match failure {
            None => Ok(JobOutcome::Completed),
            Some(e) => Err(e),
        }
    }
}
