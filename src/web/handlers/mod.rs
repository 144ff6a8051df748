use axum::Router;
use std::sync::Arc;
use crate::AppContext;

pub mod jobs;
pub mod system;


pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .nest("/transcription", jobs::jobs_router(ctx.clone()))
            .merge(system::system_router(ctx)),
    )
}
