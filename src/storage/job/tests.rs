use super::*;
use crate::schedule::types::{Parameters, Tag, TranscriptResult, TranscriptSegment};
use crate::storage::profile::{ProfileRepository, SqliteProfileRepository, TranscriptionProfile};
use crate::storage::{connect, RepositoryError};
use std::path::PathBuf;
use tempfile::TempDir;

async fn setup_storage() -> (SqliteJobRepository, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("jobs.db").display());
    let db = connect(&url).await.unwrap();
    (SqliteJobRepository::new(db), temp_dir)
}

fn create_test_job() -> Job {
    let mut params = Parameters::new();
    params.insert("model".into(), serde_json::json!("small"));
    let mut job = Job::new("whisperx-runpod", params);
    job.audio_uri = Some("s3://bucket/clip.mp3".into());
    job.output_bucket = Some("transcripts".into());
    job.tags = vec![Tag::new("team", "support")];
    job
}

#[tokio::test]
async fn test_create_and_find_job() {
    let (storage, _dir) = setup_storage().await;
    let job = create_test_job();

    storage.create(&job).await.unwrap();
    let stored = storage.find_by_id(&job.id).await.unwrap();

    assert_eq!(stored.id, job.id);
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.audio_uri, job.audio_uri);
    assert_eq!(stored.parameters, job.parameters);
    assert_eq!(stored.tags, job.tags);
    assert!(stored.transcript.is_none());
}

#[tokio::test]
async fn test_create_duplicate_job() {
    let (storage, _dir) = setup_storage().await;
    let job = create_test_job();

    storage.create(&job).await.unwrap();
    let err = storage.create(&job).await.unwrap_err();
    assert!(matches!(err, RepositoryError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_find_missing_job_is_not_found() {
    let (storage, _dir) = setup_storage().await;
    let err = storage.find_by_id("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_update_job_with_result() {
    let (storage, _dir) = setup_storage().await;
    let mut job = create_test_job();
    storage.create(&job).await.unwrap();

    job.transition_to(JobStatus::Processing).unwrap();
    job.audio_path = Some(PathBuf::from("/tmp/uploads/clip.mp3"));
    storage.update(&job).await.unwrap();

    job.transcript = Some(TranscriptResult {
        language: "en".into(),
        segments: vec![TranscriptSegment {
            start: 0.0,
            end: 1.5,
            text: "hello".into(),
            speaker: Some("SPEAKER_00".into()),
        }],
        ..Default::default()
    }
    .with_text_or_segments(None));
    job.transition_to(JobStatus::Completed).unwrap();
    storage.update(&job).await.unwrap();

    let stored = storage.find_by_id(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.audio_path, job.audio_path);
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.transcript.unwrap().text, "hello");
}

#[tokio::test]
async fn test_update_missing_job_is_not_found() {
    let (storage, _dir) = setup_storage().await;
    let job = create_test_job();
    let err = storage.update(&job).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_jobs_by_status() {
    let (storage, _dir) = setup_storage().await;
    let pending = create_test_job();
    let mut uploaded = create_test_job();
    uploaded.transition_to(JobStatus::Uploaded).unwrap();

    storage.create(&pending).await.unwrap();
    storage.create(&uploaded).await.unwrap();

    let found = storage.list_by_status(JobStatus::Uploaded).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, uploaded.id);
}

#[tokio::test]
async fn test_in_memory_repository_records_history() {
    let storage = InMemoryJobRepository::new();
    let mut job = create_test_job();
    storage.create(&job).await.unwrap();
    job.transition_to(JobStatus::Processing).unwrap();
    storage.update(&job).await.unwrap();
    // a second write in the same status is not a new step
    storage.update(&job).await.unwrap();
    job.transition_to(JobStatus::Failed).unwrap();
    storage.update(&job).await.unwrap();

    assert_eq!(
        storage.status_history(&job.id),
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Failed]
    );
}

#[tokio::test]
async fn test_profiles_default_and_list() {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("jobs.db").display());
    let profiles = SqliteProfileRepository::new(connect(&url).await.unwrap());

    assert!(profiles.find_default().await.unwrap_err().is_not_found());

    let plain = TranscriptionProfile::new("plain", "whisper", Parameters::new());
    let mut default = TranscriptionProfile::new("default", "whisperx-runpod", Parameters::new());
    default.is_default = true;
    profiles.create(&plain).await.unwrap();
    profiles.create(&default).await.unwrap();

    assert_eq!(profiles.find_default().await.unwrap().id, default.id);
    let (page, total) = profiles.list(0, 1).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(page.len(), 1);
}
