use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use super::PublishError;
use crate::schedule::types::{Job, JobStatus};

pub const DETAIL_TYPE: &str = "Transcribe Job State Change";
pub const DEFAULT_BUS: &str = "default";
pub const DEFAULT_SOURCE: &str = "asr-jobs.transcribe";

/// A job state change, shaped like an event bus entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BusEvent {
    pub event_bus_name: String,
    pub source: String,
    pub detail_type: String,
    pub detail: Value,
    pub time: DateTime<Utc>,
}

impl BusEvent {
    pub fn for_job(job: &Job, bus: &str, source: &str) -> Self {
        let now = Utc::now();
        let status = if job.status == JobStatus::Completed {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        let mut detail = json!({
            "TranscriptionJobName": job.name(),
            "TranscriptionJobID": job.id,
            "TranscriptionJobStatus": status.as_str(),
            "DeliveredAt": now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        });
        if let (JobStatus::Completed, Some(transcript)) = (status, &job.transcript) {
            detail["Result"] = json!(transcript);
        }
        if let (JobStatus::Failed, Some(error)) = (status, &job.error_message) {
            detail["FailureReason"] = json!(error);
        }

        Self {
            event_bus_name: bus.to_string(),
            source: source.to_string(),
            detail_type: DETAIL_TYPE.to_string(),
            detail,
            time: now,
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, event: &BusEvent) -> Result<(), PublishError>;
}

/// POSTs each event as JSON to a fixed endpoint.
pub struct HttpEventPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: &BusEvent) -> Result<(), PublishError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PublishError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// 进程内事件广播
#[derive(Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<BusEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<BusEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: &BusEvent) -> Result<(), PublishError> {
        // 没有订阅者不算失败
        if self.sender.send(event.clone()).is_err() {
            debug!("No subscribers for event of job {}", event.detail["TranscriptionJobID"]);
        }
        Ok(())
    }
}
