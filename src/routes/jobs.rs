//! Analysis job endpoints
//!
//! - POST /api/analyze - multipart upload (`documents` fields), returns 202 with the job id
//! - GET /api/jobs/{job_id} - current status and, once finished, the report
//! - POST /api/jobs/{job_id}/cancel - cooperative stop request

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, info};

use crate::extraction::Artifact;
use crate::models::{AppState, CancelResponse, SubmitResponse};
use crate::queue::{Job, JobId, JobStatus};
use crate::types::{AppError, AppResult};

const UPLOAD_FIELDS: [&str; 2] = ["documents", "document"];

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(submit_analysis))
        .route("/api/jobs/{job_id}", get(get_job))
        .route("/api/jobs/{job_id}/cancel", post(cancel_job))
        .with_state(state)
}

async fn submit_analysis(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let mut artifacts = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Malformed upload: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        let Some(filename) = field.file_name().map(|f| f.to_string()) else {
            debug!(field = %field_name, "Skipping non-file form field");
            continue;
        };
        if !UPLOAD_FIELDS.contains(&field_name.as_str()) {
            debug!(field = %field_name, "Skipping unexpected upload field");
            continue;
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("Failed to read {}: {}", filename, e)))?;
        artifacts.push(Artifact::new(filename, data));
    }

    let job_id = state.jobs.submit(artifacts).await?;
    info!(job_id = %job_id, "Analysis accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<Job>> {
    Ok(Json(state.jobs.poll(job_id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<(StatusCode, Json<CancelResponse>)> {
    let status = state.jobs.cancel(job_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            cancel_requested: true,
            status,
        }),
    ))
}
