use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod events;

pub use events::{BroadcastEventPublisher, BusEvent, EventPublisher, HttpEventPublisher};

use crate::files::{ObjectStorage, StorageError};
use crate::schedule::types::{Job, Tag};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);
pub const JOB_ID_TAG: &str = "transcription-job-id";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to serialize transcript: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("event delivery failed: {0}")]
    Transport(String),
    #[error("event endpoint rejected the event with status {status}")]
    Rejected { status: u16 },
    #[error("{0} timed out after {1:?}")]
    TimedOut(&'static str, Duration),
}

/// Uploads finished transcripts and announces terminal states, off the worker's path.
#[derive(Clone)]
pub struct ResultPublisher {
    storage: Arc<dyn ObjectStorage>,
    events: Arc<dyn EventPublisher>,
    bus: String,
    source: String,
    timeout: Duration,
}

impl ResultPublisher {
    pub fn new(storage: Arc<dyn ObjectStorage>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            storage,
            events,
            bus: events::DEFAULT_BUS.to_string(),
            source: events::DEFAULT_SOURCE.to_string(),
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_bus(mut self, bus: impl Into<String>, source: impl Into<String>) -> Self {
        self.bus = bus.into();
        self.source = source.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publishes in a detached task. Failures are logged, the job is not touched.
    pub fn spawn(&self, job: Job) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move { publisher.publish(&job).await })
    }

    pub async fn publish(&self, job: &Job) {
        match tokio::time::timeout(self.timeout, self.upload_transcript(job)).await {
            Ok(Ok(Some(key))) => info!(job_id = %job.id, "Uploaded transcript as {}", key),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => error!(job_id = %job.id, "Failed to upload transcript: {}", e),
            Err(_) => error!(
                job_id = %job.id,
                "{}",
                PublishError::TimedOut("transcript upload", self.timeout)
            ),
        }

        match tokio::time::timeout(self.timeout, self.notify(job)).await {
            Ok(Ok(())) => info!(job_id = %job.id, status = %job.status, bus = %self.bus, "Published job event"),
            Ok(Err(e)) => error!(job_id = %job.id, "Failed to publish job event: {}", e),
            Err(_) => error!(
                job_id = %job.id,
                "{}",
                PublishError::TimedOut("event publication", self.timeout)
            ),
        }
    }

    /// Writes `<job name>.json` to the output bucket. `None` when there is nothing to upload.
    pub async fn upload_transcript(&self, job: &Job) -> Result<Option<String>, PublishError> {
        let (Some(transcript), Some(bucket)) = (&job.transcript, &job.output_bucket) else {
            return Ok(None);
        };

        let key = format!("{}.json", job.name());
        let body = Bytes::from(serde_json::to_vec(transcript)?);
        let mut tags = job.tags.clone();
        tags.push(Tag::new(JOB_ID_TAG, job.id.clone()));

        self.storage.put_object(bucket, &key, body, &tags).await?;
        Ok(Some(key))
    }

    pub async fn notify(&self, job: &Job) -> Result<(), PublishError> {
        let event = BusEvent::for_job(job, &self.bus, &self.source);
        self.events.publish(&event).await
    }
}
