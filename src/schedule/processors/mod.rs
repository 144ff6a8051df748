pub mod transcribe;

use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::AdapterError;
use crate::files::ResolveError;
use crate::schedule::types::JobError;
use crate::storage::RepositoryError;

pub use transcribe::TranscriptionJobProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Not `Pending` when dequeued, left untouched.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transition(#[from] JobError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("failed to resolve audio: {0}")]
    Resolve(#[from] ResolveError),
    #[error("job {0} has no audio reference")]
    MissingAudio(String),
    #[error("transcription timed out after {0:?}")]
    TimedOut(Duration),
    #[error("transcription panicked: {0}")]
    Panicked(String),
}

/// Runs one job to a terminal state.
///
/// An `Err` means the job failed; by then `Failed` has been persisted whenever the
/// repository allowed it.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process_job(&self, job_id: &str) -> Result<JobOutcome, ProcessError>;
}
