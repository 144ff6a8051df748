use std::path::PathBuf;

use sea_orm::ActiveValue::Set;

use crate::schedule::types::{Job, JobStatus};
use crate::storage::job::entity::{ActiveModel as JobActiveModel, Model as JobModel};
use crate::storage::RepositoryError;

impl TryFrom<JobModel> for Job {
    type Error = RepositoryError;

    fn try_from(model: JobModel) -> Result<Self, Self::Error> {
        Ok(Job {
            status: JobStatus::try_from(model.status).map_err(RepositoryError::Serialization)?,
            parameters: serde_json::from_str(&model.parameters)?,
            transcript: model
                .transcript
                .map(|t| serde_json::from_str(&t))
                .transpose()?,
            tags: serde_json::from_str(&model.tags)?,
            audio_path: model.audio_path.map(PathBuf::from),
            id: model.id,
            title: model.title,
            audio_uri: model.audio_uri,
            model_id: model.model_id,
            diarization: model.diarization,
            error_message: model.error_message,
            output_bucket: model.output_bucket,
            created_at: model.created_at,
            updated_at: model.updated_at,
            started_at: model.started_at,
            completed_at: model.completed_at,
        })
    }
}

impl TryFrom<&Job> for JobActiveModel {
    type Error = RepositoryError;

    fn try_from(job: &Job) -> Result<Self, Self::Error> {
        Ok(JobActiveModel {
            id: Set(job.id.clone()),
            title: Set(job.title.clone()),
            audio_path: Set(job
                .audio_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())),
            audio_uri: Set(job.audio_uri.clone()),
            model_id: Set(job.model_id.clone()),
            parameters: Set(serde_json::to_string(&job.parameters)?),
            diarization: Set(job.diarization),
            status: Set(job.status.to_string()),
            transcript: Set(job
                .transcript
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?),
            error_message: Set(job.error_message.clone()),
            output_bucket: Set(job.output_bucket.clone()),
            tags: Set(serde_json::to_string(&job.tags)?),
            created_at: Set(job.created_at),
            updated_at: Set(job.updated_at),
            started_at: Set(job.started_at),
            completed_at: Set(job.completed_at),
        })
    }
}
