use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model specific options, validated against the adapter's parameter schema.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Stored but never scheduled, left behind by a failed enqueue.
    Uploaded,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "UPLOADED",
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The transition graph. `Uploaded -> Pending` is only taken by an explicit re-enqueue.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Uploaded)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Uploaded, Pending)
        )
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;
    fn try_from(status: String) -> Result<Self, Self::Error> {
        match status.as_str() {
            "UPLOADED" => Ok(JobStatus::Uploaded),
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", status)),
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JobError {
    #[error("invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// An opaque annotation carried to the output object and to notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub start: f64,
    pub end: f64,
    pub word: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Canonical transcript shape every adapter produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub language: String,
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub word_segments: Vec<TranscriptWord>,
    pub confidence: f64,
    /// Milliseconds spent inside the adapter.
    pub processing_time: u64,
    pub model_used: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TranscriptResult {
    /// Falls back to the segment texts joined by a single space when the backend sent no text.
    pub fn with_text_or_segments(mut self, text: Option<String>) -> Self {
        self.text = match text {
            Some(text) if !text.is_empty() => text,
            _ => self
                .segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        };
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: Option<String>,
    pub audio_path: Option<PathBuf>,
    pub audio_uri: Option<String>,
    pub model_id: String,
    pub parameters: Parameters,
    pub diarization: bool,
    pub status: JobStatus,
    pub transcript: Option<TranscriptResult>,
    pub error_message: Option<String>,
    pub output_bucket: Option<String>,
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(model_id: impl Into<String>, parameters: Parameters) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: None,
            audio_path: None,
            audio_uri: None,
            model_id: model_id.into(),
            parameters,
            diarization: false,
            status: JobStatus::Pending,
            transcript: None,
            error_message: None,
            output_bucket: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Title when one was given, otherwise the id.
    pub fn name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// The reference the worker has to resolve: the remote uri wins over the local path.
    pub fn audio_reference(&self) -> Option<String> {
        self.audio_uri
            .clone()
            .or_else(|| self.audio_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
    }

    /// Parameters as sent to the adapter, with the job level diarization flag folded in.
    pub fn effective_parameters(&self) -> Parameters {
        let mut params = self.parameters.clone();
        if self.diarization {
            params.insert("diarize".to_string(), serde_json::Value::Bool(true));
        }
        params
    }

    pub fn transition_to(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            JobStatus::Processing => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
