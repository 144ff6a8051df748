use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::schedule::types::{Parameters, Tag};
use crate::schedule::{SubmitError, SubmitRequest};
use crate::web::ApiResponse;
use crate::AppContext;

pub fn jobs_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/s3", post(submit_s3))
        .route("/aws-transcribe", post(submit_aws_transcribe))
        .route("/requeue", post(requeue))
        .route("/:id", get(get_job))
        .route("/:id/audio", get(get_audio))
        .with_state(ctx)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::error(status.as_u16(), message))).into_response()
}

/// 400 when the request itself was refused (unknown model, bad parameters).
fn submit_error(e: SubmitError) -> Response {
    if e.is_rejection() {
        warn!("Rejected submission: {}", e);
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    error!("Failed to create job: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to create job: {}", e))
}

#[derive(Debug, Deserialize)]
pub struct S3TranscriptionRequest {
    pub uri: String,
    pub output_bucket: Option<String>,
    pub model: Option<String>,
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    job_id: String,
}

async fn submit_s3(State(ctx): State<Arc<AppContext>>, Json(req): Json<S3TranscriptionRequest>) -> Response {
    if req.uri.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "uri is required");
    }

    let request = SubmitRequest {
        audio_uri: Some(req.uri),
        model_id: req.model,
        parameters: req.parameters,
        output_bucket: req.output_bucket,
        tags: req.tags,
        ..Default::default()
    };
    match ctx.submission.submit(request).await {
        Ok(job_id) => {
            info!("Accepted s3 transcription job {}", job_id);
            (StatusCode::OK, Json(ApiResponse::success(SubmitResponse { job_id }))).into_response()
        }
        Err(e) => submit_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Media {
    pub media_file_uri: Option<String>,
}

/// Body shaped like a StartTranscriptionJob call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsTranscribeRequest {
    pub transcription_job_name: Option<String>,
    pub language_code: Option<String>,
    pub media: Option<Media>,
    pub output_bucket_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub model_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AwsTranscribeResponse {
    #[serde(rename = "JobID")]
    job_id: String,
    transcription_job_name: Option<String>,
    output_bucket_name: Option<String>,
}

async fn submit_aws_transcribe(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<AwsTranscribeRequest>,
) -> Response {
    let Some(uri) = req
        .media
        .and_then(|m| m.media_file_uri)
        .filter(|uri| !uri.trim().is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "Media.MediaFileUri is required");
    };

    // en-US -> en
    let mut parameters = Parameters::new();
    if let Some(code) = req.language_code.as_deref().and_then(|c| c.split('-').next()) {
        if !code.is_empty() {
            parameters.insert("language".to_string(), Value::String(code.to_lowercase()));
        }
    }

    let request = SubmitRequest {
        title: req.transcription_job_name.clone(),
        audio_uri: Some(uri),
        model_id: req.model_id,
        parameters: Some(parameters),
        diarization: true,
        output_bucket: req.output_bucket_name.clone(),
        tags: req.tags,
        ..Default::default()
    };
    match ctx.submission.submit(request).await {
        Ok(job_id) => Json(AwsTranscribeResponse {
            job_id,
            transcription_job_name: req.transcription_job_name,
            output_bucket_name: req.output_bucket_name,
        })
        .into_response(),
        Err(e) => submit_error(e),
    }
}

async fn get_job(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> Response {
    match ctx.jobs.find_by_id(&id).await {
        Ok(job) => (StatusCode::OK, Json(ApiResponse::success(job))).into_response(),
        Err(e) if e.is_not_found() => error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(e) => {
            error!("Failed to get job {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Streams a job's audio. Remote references are fetched into the upload dir first.
/// Read-only towards the job: the worker owns every write to the record.
async fn get_audio(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> Response {
    let job = match ctx.jobs.find_by_id(&id).await {
        Ok(job) => job,
        Err(e) if e.is_not_found() => return error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(e) => {
            error!("Failed to get job {}: {}", id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    let Some(reference) = job.audio_reference() else {
        return error_response(StatusCode::NOT_FOUND, "job has no audio");
    };

    let path = match ctx.files.resolve(&reference).await {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to resolve audio for job {}: {}", id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to fetch audio: {}", e));
        }
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open {:?}: {}", path, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type(&path)));
    response
}

#[derive(Debug, Serialize)]
struct RequeueResponse {
    requeued: usize,
}

async fn requeue(State(ctx): State<Arc<AppContext>>) -> Response {
    match ctx.submission.requeue_uploaded().await {
        Ok(requeued) => (StatusCode::OK, Json(ApiResponse::success(RequeueResponse { requeued }))).into_response(),
        Err(e) => {
            error!("Failed to requeue uploaded jobs: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
