use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::adapters::ModelCapabilities;
use crate::storage::profile::TranscriptionProfile;
use crate::web::{ApiResponse, Pagination};
use crate::AppContext;

pub fn system_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/models", get(list_models))
        .route("/queue/stats", get(queue_stats))
        .route("/profiles", get(list_profiles))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    #[serde(flatten)]
    capabilities: ModelCapabilities,
    models: Vec<String>,
}

async fn list_models(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let supported = ctx.registry.supported_models();
    let models: Vec<ModelInfo> = ctx
        .registry
        .capabilities()
        .into_iter()
        .map(|capabilities| ModelInfo {
            models: supported.get(&capabilities.model_id).cloned().unwrap_or_default(),
            capabilities,
        })
        .collect();
    Json(ApiResponse::success(models))
}

async fn queue_stats(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(ApiResponse::success(ctx.queue.stats()))
}

#[derive(Debug, Serialize)]
struct ProfilePage {
    items: Vec<TranscriptionProfile>,
    total: u64,
    index: u64,
    size: u64,
}

async fn list_profiles(State(ctx): State<Arc<AppContext>>, Query(pagination): Query<Pagination>) -> Response {
    let pagination = pagination.check();
    match ctx.profiles.list(pagination.offset(), pagination.limit()).await {
        Ok((items, total)) => Json(ApiResponse::success(ProfilePage {
            items,
            total,
            index: pagination.index,
            size: pagination.size,
        }))
        .into_response(),
        Err(e) => {
            error!("Failed to list profiles: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(500, e.to_string())),
            )
                .into_response()
        }
    }
}
