pub mod processors;
pub mod publish;
pub mod queue;
pub mod submit;
pub mod types;

#[cfg(test)]
mod tests;

// 重导出主要类型
pub use types::{Job, JobError, JobStatus, Parameters, Tag, TranscriptResult};

pub use processors::{JobOutcome, JobProcessor, ProcessError, TranscriptionJobProcessor};
pub use publish::{BroadcastEventPublisher, BusEvent, EventPublisher, HttpEventPublisher, ResultPublisher};
pub use queue::{QueueConfig, QueueError, QueueStats, TaskQueue};
pub use submit::{SubmitError, SubmitRequest, Submission};
