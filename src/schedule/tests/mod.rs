use super::*;
use crate::adapters::{
    whisperx, AdapterError, AdapterRegistry, AudioInput, BaseAdapter, ModelCapabilities, ParameterSchema,
    ProcessingContext, TranscriptionAdapter,
};
use crate::files::object_storage::read_object;
use crate::files::{BucketStorage, DownloadCache, FileService, ObjectStorage};
use crate::schedule::types::TranscriptSegment;
use crate::storage::job::{InMemoryJobRepository, JobRepository};
use crate::storage::profile::{InMemoryProfileRepository, ProfileRepository, TranscriptionProfile};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const MODEL: &str = "whisperx-test";

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Hang,
    Panic,
}

struct FakeAdapter {
    base: BaseAdapter,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeAdapter {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            base: BaseAdapter::new(whisperx::capabilities(MODEL, "whisperx"), whisperx::base_schema()),
            behaviour,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranscriptionAdapter for FakeAdapter {
    fn capabilities(&self) -> ModelCapabilities {
        self.base.capabilities()
    }

    fn parameter_schema(&self) -> &[ParameterSchema] {
        self.base.schema()
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["small".into()]
    }

    async fn prepare_environment(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn transcribe(
        &self,
        input: &AudioInput,
        params: &Parameters,
        ctx: &ProcessingContext,
    ) -> Result<TranscriptResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let params = self.base.prepare(params)?;
        match self.behaviour {
            Behaviour::Fail => Err(AdapterError::Backend {
                status: 503,
                body: "no capacity".into(),
            }),
            Behaviour::Panic => panic!("decoder blew up"),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(AdapterError::Runtime("unreachable".into()))
            }
            Behaviour::Succeed => {
                let bytes = tokio::fs::read(&input.file_path).await?;
                Ok(TranscriptResult {
                    language: "en".into(),
                    segments: vec![
                        TranscriptSegment {
                            start: 0.0,
                            end: 1.0,
                            text: String::from_utf8_lossy(&bytes).into_owned(),
                            speaker: None,
                        },
                        TranscriptSegment {
                            start: 1.0,
                            end: 2.0,
                            text: "done".into(),
                            speaker: None,
                        },
                    ],
                    processing_time: ctx.elapsed_ms(),
                    model_used: self.base.string_param(&params, "model").unwrap_or_default(),
                    metadata: self.base.default_metadata(&params),
                    ..Default::default()
                }
                .with_text_or_segments(None))
            }
        }
    }
}

struct Pipeline {
    _dir: TempDir,
    jobs: Arc<InMemoryJobRepository>,
    storage: Arc<BucketStorage>,
    adapter: Arc<FakeAdapter>,
    registry: Arc<AdapterRegistry>,
    queue: Arc<TaskQueue>,
    submission: Submission,
    events: broadcast::Receiver<BusEvent>,
    upload_dir: std::path::PathBuf,
}

async fn pipeline(behaviour: Behaviour, job_timeout: Option<Duration>) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let upload_dir = dir.path().join("uploads");
    let jobs = Arc::new(InMemoryJobRepository::new());
    let storage = Arc::new(BucketStorage::in_memory());
    storage
        .put_object("bucket", "clip.mp3", Bytes::from_static(b"hello"), &[])
        .await
        .unwrap();

    let adapter = Arc::new(FakeAdapter::new(behaviour));
    let mut builder = AdapterRegistry::builder();
    builder.register(MODEL, adapter.clone());
    let registry = Arc::new(builder.build());

    let files = Arc::new(FileService::new(&upload_dir, storage.clone(), Arc::new(DownloadCache::default())));
    let (events, receiver) = BroadcastEventPublisher::new(16);
    let publisher = ResultPublisher::new(storage.clone(), Arc::new(events));

    let processor = TranscriptionJobProcessor::new(jobs.clone(), registry.clone(), files)
        .with_publisher(publisher)
        .with_job_timeout(job_timeout);
    let queue = Arc::new(TaskQueue::new(QueueConfig::default(), Arc::new(processor)));
    let submission = Submission::new(jobs.clone(), queue.clone(), registry.clone(), MODEL);

    Pipeline {
        _dir: dir,
        jobs,
        storage,
        adapter,
        registry,
        queue,
        submission,
        events: receiver,
        upload_dir,
    }
}

fn s3_request(model: Option<&str>) -> SubmitRequest {
    SubmitRequest {
        audio_uri: Some("s3://bucket/clip.mp3".into()),
        model_id: model.map(str::to_string),
        output_bucket: Some("transcripts".into()),
        tags: vec![Tag::new("team", "support")],
        ..Default::default()
    }
}

/// Bypasses submission checks, as a job stored by an older deployment would.
async fn enqueue_stored(p: &Pipeline, model: &str, parameters: Parameters) -> String {
    let mut job = Job::new(model, parameters);
    job.audio_uri = Some("s3://bucket/clip.mp3".into());
    p.jobs.create(&job).await.unwrap();
    p.queue.enqueue_job(&job.id).unwrap();
    job.id
}

async fn wait_for_terminal(jobs: &InMemoryJobRepository, job_id: &str) -> Job {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = jobs.find_by_id(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state")
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn assert_valid_history(history: &[JobStatus]) {
    assert_eq!(history.first(), Some(&JobStatus::Pending));
    for pair in history.windows(2) {
        assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
    }
}

#[tokio::test]
async fn test_s3_job_is_downloaded_and_completed() {
    let mut p = pipeline(Behaviour::Succeed, None).await;
    p.queue.start().await.unwrap();

    let job_id = p.submission.submit(s3_request(Some(MODEL))).await.unwrap();
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.audio_path, Some(p.upload_dir.join("clip.mp3")));
    let transcript = job.transcript.unwrap();
    assert_eq!(transcript.text, "hello done");
    assert_eq!(transcript.model_used, "small");
    assert!(job.error_message.is_none());
    assert_eq!(
        p.jobs.status_history(&job_id),
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
    );

    let event = p.events.recv().await.unwrap();
    assert_eq!(event.detail["TranscriptionJobStatus"], "COMPLETED");
    assert_eq!(event.detail["Result"]["text"], "hello done");

    let uploaded = read_object(p.storage.as_ref(), "transcripts", &format!("{}.json", job_id))
        .await
        .unwrap();
    let uploaded: TranscriptResult = serde_json::from_slice(&uploaded).unwrap();
    assert_eq!(uploaded.text, "hello done");

    p.queue.stop().await;
}

#[tokio::test]
async fn test_unregistered_model_fails_without_backend_call() {
    let mut p = pipeline(Behaviour::Succeed, None).await;
    p.queue.start().await.unwrap();

    let job_id = enqueue_stored(&p, "no-such-model", Parameters::new()).await;
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("no-such-model"));
    assert_eq!(p.adapter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        p.jobs.status_history(&job_id),
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Failed]
    );
    assert_eq!(p.events.recv().await.unwrap().detail["TranscriptionJobStatus"], "FAILED");
    p.queue.stop().await;
}

#[tokio::test]
async fn test_invalid_parameters_fail_before_transcription() {
    let p = pipeline(Behaviour::Succeed, None).await;
    p.queue.start().await.unwrap();

    let params = json!({"model": "enormous"}).as_object().cloned().unwrap();
    let job_id = enqueue_stored(&p, MODEL, params).await;
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("enormous"));
    assert_eq!(p.adapter.calls.load(Ordering::SeqCst), 0);
    // nothing was downloaded
    assert!(!p.upload_dir.join("clip.mp3").exists());
    p.queue.stop().await;
}

#[tokio::test]
async fn test_enqueue_failure_parks_job_as_uploaded() {
    let p = pipeline(Behaviour::Succeed, None).await;

    // queue never started
    let job_id = p.submission.submit(s3_request(Some(MODEL))).await.unwrap();
    let job = p.jobs.find_by_id(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Uploaded);
    assert_eq!(p.jobs.status_history(&job_id), vec![JobStatus::Pending, JobStatus::Uploaded]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(p.adapter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(p.queue.stats().enqueued, 0);
}

#[tokio::test]
async fn test_requeue_uploaded_recovers_parked_jobs() {
    let p = pipeline(Behaviour::Succeed, None).await;
    let job_id = p.submission.submit(s3_request(Some(MODEL))).await.unwrap();

    // still not running: the job goes back to uploaded
    assert_eq!(p.submission.requeue_uploaded().await.unwrap(), 0);
    assert_eq!(p.jobs.find_by_id(&job_id).await.unwrap().status, JobStatus::Uploaded);

    p.queue.start().await.unwrap();
    assert_eq!(p.submission.requeue_uploaded().await.unwrap(), 1);
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let history = p.jobs.status_history(&job_id);
    assert_valid_history(&history);
    assert_eq!(history.last(), Some(&JobStatus::Completed));
    p.queue.stop().await;
}

#[tokio::test]
async fn test_resume_pending_after_restart() {
    let p = pipeline(Behaviour::Succeed, None).await;
    let mut orphan = Job::new(MODEL, Parameters::new());
    orphan.audio_uri = Some("s3://bucket/clip.mp3".into());
    p.jobs.create(&orphan).await.unwrap();

    p.queue.start().await.unwrap();
    assert_eq!(p.submission.resume_pending().await.unwrap(), 1);
    assert_eq!(wait_for_terminal(&p.jobs, &orphan.id).await.status, JobStatus::Completed);
    p.queue.stop().await;
}

#[tokio::test]
async fn test_backend_error_marks_job_failed() {
    let p = pipeline(Behaviour::Fail, None).await;
    p.queue.start().await.unwrap();

    let job_id = p.submission.submit(s3_request(None)).await.unwrap();
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("503"));
    assert!(job.transcript.is_none());
    assert_eq!(p.adapter.calls.load(Ordering::SeqCst), 1);
    wait_until(|| p.queue.stats().failed == 1).await;
    p.queue.stop().await;
}

#[tokio::test]
async fn test_missing_object_marks_job_failed() {
    let p = pipeline(Behaviour::Succeed, None).await;
    p.queue.start().await.unwrap();

    let mut request = s3_request(Some(MODEL));
    request.audio_uri = Some("s3://bucket/missing.mp3".into());
    let job_id = p.submission.submit(request).await.unwrap();
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("missing.mp3"));
    assert_eq!(p.adapter.calls.load(Ordering::SeqCst), 0);
    p.queue.stop().await;
}

#[tokio::test]
async fn test_job_timeout_marks_job_failed() {
    let p = pipeline(Behaviour::Hang, Some(Duration::from_millis(50))).await;
    p.queue.start().await.unwrap();

    let job_id = p.submission.submit(s3_request(Some(MODEL))).await.unwrap();
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("timed out"));
    p.queue.stop().await;
}

#[tokio::test]
async fn test_redelivered_job_is_skipped() {
    let p = pipeline(Behaviour::Succeed, None).await;
    let job_id = p.submission.submit(s3_request(Some(MODEL))).await.unwrap();
    // parked because the queue was not running; put it back by hand
    let mut job = p.jobs.find_by_id(&job_id).await.unwrap();
    job.transition_to(JobStatus::Pending).unwrap();
    p.jobs.update(&job).await.unwrap();

    p.queue.start().await.unwrap();
    p.queue.enqueue_job(&job_id).unwrap();
    wait_for_terminal(&p.jobs, &job_id).await;
    // redelivered after completion
    p.queue.enqueue_job(&job_id).unwrap();

    wait_until(|| {
        let stats = p.queue.stats();
        stats.skipped + stats.processed == 2
    })
    .await;
    assert_eq!(p.adapter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.queue.stats().processed, 1);
    assert_eq!(p.queue.stats().skipped, 1);
    p.queue.stop().await;
}

#[tokio::test]
async fn test_default_profile_supplies_model_and_parameters() {
    let mut p = pipeline(Behaviour::Succeed, None).await;
    let profiles = Arc::new(InMemoryProfileRepository::new());
    let mut profile = TranscriptionProfile::new(
        "meetings",
        MODEL,
        json!({"model": "medium", "language": "en"}).as_object().cloned().unwrap(),
    );
    profile.is_default = true;
    profile.diarization = true;
    profiles.create(&profile).await.unwrap();
    p.submission =
        Submission::new(p.jobs.clone(), p.queue.clone(), p.registry.clone(), "unused").with_profiles(profiles);

    let mut request = s3_request(None);
    request.parameters = json!({"language": "de"}).as_object().cloned();
    let job_id = p.submission.submit(request).await.unwrap();
    let job = p.jobs.find_by_id(&job_id).await.unwrap();

    assert_eq!(job.model_id, MODEL);
    assert!(job.diarization);
    assert_eq!(job.parameters["model"], "medium");
    assert_eq!(job.parameters["language"], "de");
}

#[tokio::test]
async fn test_every_history_follows_the_state_graph() {
    let p = pipeline(Behaviour::Succeed, None).await;
    p.queue.start().await.unwrap();

    let mut ids = Vec::new();
    for model in [Some(MODEL), None] {
        ids.push(p.submission.submit(s3_request(model)).await.unwrap());
    }
    ids.push(enqueue_stored(&p, "unknown", Parameters::new()).await);
    for id in &ids {
        wait_for_terminal(&p.jobs, id).await;
        assert_valid_history(&p.jobs.status_history(id));
    }
    p.queue.stop().await;
}

#[tokio::test]
async fn test_panicking_adapter_marks_job_failed() {
    let p = pipeline(Behaviour::Panic, None).await;
    p.queue.start().await.unwrap();

    let job_id = p.submission.submit(s3_request(Some(MODEL))).await.unwrap();
    let job = wait_for_terminal(&p.jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("decoder blew up"));
    assert_eq!(
        p.jobs.status_history(&job_id),
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Failed]
    );
    wait_until(|| p.queue.stats().failed == 1).await;

    // the worker survives and takes the next job
    let next = p.submission.submit(s3_request(Some(MODEL))).await.unwrap();
    assert_eq!(wait_for_terminal(&p.jobs, &next).await.status, JobStatus::Failed);
    p.queue.stop().await;
}

#[tokio::test]
async fn test_submission_rejects_unknown_model_and_bad_parameters() {
    let p = pipeline(Behaviour::Succeed, None).await;
    p.queue.start().await.unwrap();

    let err = p.submission.submit(s3_request(Some("no-such-model"))).await.unwrap_err();
    assert!(matches!(err, SubmitError::UnknownModel(ref m) if m == "no-such-model"));
    assert!(err.is_rejection());

    let mut request = s3_request(Some(MODEL));
    request.parameters = json!({"model": "enormous"}).as_object().cloned();
    let err = p.submission.submit(request).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidParameters(ref r) if r.contains("enormous")));

    assert!(p.jobs.list_by_status(JobStatus::Pending).await.unwrap().is_empty());
    assert_eq!(p.queue.stats().enqueued, 0);
    assert_eq!(p.adapter.calls.load(Ordering::SeqCst), 0);
    p.queue.stop().await;
}

#[tokio::test]
async fn test_profile_with_unregistered_model_is_rejected() {
    let mut p = pipeline(Behaviour::Succeed, None).await;
    let profiles = Arc::new(InMemoryProfileRepository::new());
    let mut profile = TranscriptionProfile::new("legacy", "retired-model", Parameters::new());
    profile.is_default = true;
    profiles.create(&profile).await.unwrap();
    p.submission =
        Submission::new(p.jobs.clone(), p.queue.clone(), p.registry.clone(), MODEL).with_profiles(profiles);

    let err = p.submission.submit(s3_request(None)).await.unwrap_err();
    assert!(matches!(err, SubmitError::UnknownModel(ref m) if m == "retired-model"));
    assert!(p.jobs.list_by_status(JobStatus::Pending).await.unwrap().is_empty());
    assert!(p.jobs.list_by_status(JobStatus::Uploaded).await.unwrap().is_empty());

    // configured default model is checked too
    let p = pipeline(Behaviour::Succeed, None).await;
    let submission = Submission::new(p.jobs.clone(), p.queue.clone(), p.registry.clone(), "not-deployed");
    assert!(matches!(
        submission.submit(s3_request(None)).await,
        Err(SubmitError::UnknownModel(_))
    ));
}
