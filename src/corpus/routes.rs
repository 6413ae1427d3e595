//! Corpus API Routes
//!
//! - GET /api/corpus/{kind} - List entries
//! - POST /api/corpus/{kind} - Add an entry `{ "text": ... }`
//! - DELETE /api/corpus/{kind} - Delete an entry `{ "id": ... }`
//!
//! `kind` is one of `rules`, `laws`, `keywords`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::{CorpusEntry, CorpusKind};
use crate::models::AppState;
use crate::types::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct AddEntryRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteEntryRequest {
    pub id: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/corpus/{kind}",
            get(list_entries).post(add_entry).delete(delete_entry),
        )
        .with_state(state)
}

async fn list_entries(
    State(state): State<AppState>,
    Path(kind): Path<CorpusKind>,
) -> Json<Vec<CorpusEntry>> {
    Json(state.corpus.list(kind).await)
}

async fn add_entry(
    State(state): State<AppState>,
    Path(kind): Path<CorpusKind>,
    Json(request): Json<AddEntryRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let entry = state.corpus.add(kind, &request.text).await?;
    info!(kind = %kind, id = entry.id, "Corpus entry added");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "added",
            "id": entry.id,
            "text": entry.text,
        })),
    ))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(kind): Path<CorpusKind>,
    Json(request): Json<DeleteEntryRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.corpus.remove(kind, request.id).await {
        return Err(AppError::NotFound(format!("{} entry {}", kind, request.id)));
    }
    info!(kind = %kind, id = request.id, "Corpus entry deleted");

    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
