//! API Routes
//!
//! - `/api/analyze` - Submit documents for analysis
//! - `/api/jobs/{job_id}` - Poll and cancel analysis jobs
//! - `/api/corpus/{kind}` - Rules, laws and keywords
//! - `/api/health` - Health checks

pub mod health;
pub mod jobs;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::corpus;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .merge(jobs::router(state.clone()))
        .merge(corpus::routes::router(state.clone()))
        .merge(health::router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
